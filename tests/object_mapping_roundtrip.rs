//! End-to-end: a master registers an `INSTANCE`-change-type object on
//! one `LocalNode`; a second `LocalNode` maps it over a real TCP
//! connection, then observes a subsequent commit propagate.

use std::sync::Arc;
use std::time::Duration;

use collage_core::{
    ChangeType, ConnectionDescription, Distributable, InstanceSerializable, LocalNode, NodeManagedObject, NodeSettings,
    Result, Runtime,
};

#[derive(Clone, Default)]
struct Counter(u32);

impl InstanceSerializable for Counter {
    fn to_bytes(&self) -> Vec<u8> {
        self.0.to_le_bytes().to_vec()
    }

    fn from_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.0 = u32::from_le_bytes(data.try_into().unwrap());
        Ok(())
    }
}

#[test]
fn slave_maps_then_observes_a_later_commit() {
    let master_node = LocalNode::new(Runtime::new(), NodeSettings::default());
    master_node.listen(&[ConnectionDescription::tcp("127.0.0.1", 0)]).unwrap();
    let master_addr = master_node.local_addr().unwrap();

    let master_obj = Arc::new(Distributable::new(ChangeType::Instance, Counter(7)));
    let object_id = master_obj.register(Some(master_node.instance_cache())).unwrap();
    master_node.register_object(master_obj.clone() as Arc<dyn NodeManagedObject>).unwrap();

    let slave_node = LocalNode::new(Runtime::new(), NodeSettings::default());
    slave_node.listen(&[ConnectionDescription::tcp("127.0.0.1", 0)]).unwrap();
    let master_id = slave_node.connect(&ConnectionDescription::tcp("127.0.0.1", master_addr.port())).unwrap();

    let slave_obj = Arc::new(Distributable::new(ChangeType::Instance, Counter(0)));
    let request_id = slave_node
        .map_object_nb(master_id, object_id, collage_core::ObjectVersion::HEAD, slave_obj.clone())
        .unwrap();
    let mapped_id = slave_node.map_object_sync(request_id, Some(Duration::from_secs(2))).unwrap();
    assert_eq!(mapped_id, object_id);
    slave_obj.with_data(|c| assert_eq!(c.0, 7));

    master_obj.with_data_mut(|c| c.0 = 42);
    let new_version = master_obj.commit().unwrap();
    slave_obj.sync(new_version, Some(Duration::from_secs(2))).unwrap();
    slave_obj.with_data(|c| assert_eq!(c.0, 42));

    slave_node.close();
    master_node.close();
}
