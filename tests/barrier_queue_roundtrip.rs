//! End-to-end: `Barrier` and `QueueMaster`/`QueueSlave` mapped across a
//! real TCP connection between two `LocalNode`s, exercising
//! `BARRIER_ENTER`/`BARRIER_LEAVE` and `QUEUE_POP`/`QUEUE_ITEM`/
//! `QUEUE_EMPTY` rather than the bare in-process primitives.

use std::sync::Arc;
use std::time::Duration;

use collage_core::{Barrier, ConnectionDescription, LocalNode, NodeSettings, QueueMaster, QueueSlave, Runtime};

#[test]
fn remote_slave_enters_barrier_hosted_on_another_node() {
    let master_node = LocalNode::new(Runtime::new(), NodeSettings::default());
    master_node.listen(&[ConnectionDescription::tcp("127.0.0.1", 0)]).unwrap();
    let master_addr = master_node.local_addr().unwrap();

    let master_barrier = Barrier::new(2);
    let object_id = master_barrier.register(&master_node);

    let slave_node = LocalNode::new(Runtime::new(), NodeSettings::default());
    slave_node.listen(&[ConnectionDescription::tcp("127.0.0.1", 0)]).unwrap();
    let master_id = slave_node.connect(&ConnectionDescription::tcp("127.0.0.1", master_addr.port())).unwrap();

    let slave_barrier = Barrier::new(0);
    slave_barrier.map(&slave_node, master_id, object_id, 2);

    let remote = std::thread::spawn(move || slave_barrier.enter(Some(Duration::from_secs(2))));
    let local = master_barrier.enter(Some(Duration::from_secs(2)));

    local.unwrap();
    remote.join().unwrap().unwrap();

    slave_node.close();
    master_node.close();
}

#[test]
fn remote_slave_pops_items_pushed_on_another_node() {
    let master_node = LocalNode::new(Runtime::new(), NodeSettings::default());
    master_node.listen(&[ConnectionDescription::tcp("127.0.0.1", 0)]).unwrap();
    let master_addr = master_node.local_addr().unwrap();

    let master_queue = QueueMaster::new();
    let object_id = master_queue.register(&master_node);
    master_queue.push().write_u32(7).commit();

    let slave_node = LocalNode::new(Runtime::new(), NodeSettings::default());
    slave_node.listen(&[ConnectionDescription::tcp("127.0.0.1", 0)]).unwrap();
    let master_id = slave_node.connect(&ConnectionDescription::tcp("127.0.0.1", master_addr.port())).unwrap();

    let slave_queue = QueueSlave::map(&slave_node, master_id, object_id);
    let mut first = slave_queue.pop(Some(Duration::from_secs(2))).unwrap();
    assert_eq!(first.istream().read_u32().unwrap(), 7);

    master_queue.push().write_u32(9).commit();
    let mut second = slave_queue.pop(Some(Duration::from_secs(2))).unwrap();
    assert_eq!(second.istream().read_u32().unwrap(), 9);

    master_queue.close();
    assert!(slave_queue.pop(Some(Duration::from_secs(2))).unwrap().is_invalid());

    slave_node.close();
    master_node.close();
}
