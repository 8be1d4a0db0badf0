use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use parking_lot::{Condvar, Mutex, RwLock};

use super::{ChangeManager, ChangeType, InstanceCache, InstanceId, NodeManagedObject, ObjectId, ObjectVersion, Role, VersionedId};
use crate::command::{command_type, node_opcode};
use crate::error::{Error, Result};

/// The dirty-bit mask meaning "everything changed" — sent as the
/// initial full state on first mapping (§4.H).
pub const DIRTY_ALL: u64 = u64::MAX;

/// Contract for `DELTA` change-type objects: `commit` serializes only
/// what the subclass marked dirty, via a 64-bit mask.
pub trait DeltaSerializable: Send + Sync + 'static {
    /// Full state, used to answer the initial mapping (`DIRTY_ALL`).
    fn to_bytes(&self) -> Vec<u8>;
    fn from_bytes(&mut self, data: &[u8]) -> Result<()>;

    /// Bits currently marked dirty; `0` means nothing to commit.
    fn dirty_mask(&self) -> u64;
    /// Serialize only the fields selected by `mask`.
    fn serialize_dirty(&self, mask: u64) -> Vec<u8>;
    /// Apply a previously-serialized delta for the given `mask`.
    fn apply_dirty(&mut self, mask: u64, data: &[u8]) -> Result<()>;
    fn clear_dirty(&mut self);
}

/// A wire-level delta: `(dirty_mask: u64, payload)`.
fn encode_delta(mask: u64, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + payload.len());
    out.extend_from_slice(&mask.to_le_bytes());
    out.extend_from_slice(payload);
    out
}

fn decode_delta(bytes: &[u8]) -> Result<(u64, &[u8])> {
    if bytes.len() < 8 {
        return Err(Error::Protocol("delta frame truncated".into()));
    }
    let mask = u64::from_le_bytes(bytes[0..8].try_into().unwrap());
    Ok((mask, &bytes[8..]))
}

/// `DELTA` strategy counterpart to [`super::Distributable`] (§4.H).
/// Kept as its own struct rather than folded into `Distributable`
/// because the wire format (dirty mask + partial payload) is
/// structurally different from a full-instance serialization, not
/// because the bookkeeping differs — registry state, version tracking
/// and the `sync` gate are identical in shape to `Distributable`'s.
pub struct DeltaObject<T: DeltaSerializable> {
    instance_id: InstanceId,
    id: RwLock<Option<ObjectId>>,
    role: RwLock<Option<Role>>,
    data: RwLock<T>,
    version: ArcSwap<ObjectVersion>,
    cm: Mutex<ChangeManager>,
    slaves: RwLock<Vec<Arc<dyn crate::connection::Connection>>>,
    instance_cache: RwLock<Option<Arc<InstanceCache>>>,
    sync_gate: (Mutex<ObjectVersion>, Condvar),
    pending_deltas: Mutex<std::collections::BTreeMap<u128, Vec<u8>>>,
}

impl<T: DeltaSerializable> DeltaObject<T> {
    pub fn new(data: T) -> Self {
        Self {
            instance_id: InstanceId::generate(),
            id: RwLock::new(None),
            role: RwLock::new(None),
            data: RwLock::new(data),
            version: ArcSwap::new(Arc::new(ObjectVersion::NONE)),
            cm: Mutex::new(ChangeManager::new(ChangeType::Delta)),
            slaves: RwLock::new(Vec::new()),
            instance_cache: RwLock::new(None),
            sync_gate: (Mutex::new(ObjectVersion::NONE), Condvar::new()),
            pending_deltas: Mutex::new(std::collections::BTreeMap::new()),
        }
    }

    pub fn auto_obsolete(&self, n: u32) {
        self.cm.lock().auto_obsolete(n);
    }

    pub fn id(&self) -> Option<ObjectId> {
        *self.id.read()
    }

    pub fn get_version(&self) -> ObjectVersion {
        **self.version.load()
    }

    pub fn register(&self, instance_cache: Option<Arc<InstanceCache>>) -> Result<ObjectId> {
        let mut id = self.id.write();
        if id.is_some() {
            return Err(Error::Protocol("object already attached".into()));
        }
        let new_id = ObjectId::generate();
        *id = Some(new_id);
        *self.role.write() = Some(Role::Master);
        self.version.store(Arc::new(ObjectVersion::FIRST));
        *self.instance_cache.write() = instance_cache;
        Ok(new_id)
    }

    /// `full_state` is the `(DIRTY_ALL, bytes)` frame returned by
    /// [`instance_data_for_mapping`](Self::instance_data_for_mapping).
    pub fn map_slave(&self, id: ObjectId, full_state: &[u8], version: ObjectVersion) -> Result<()> {
        let (mask, payload) = decode_delta(full_state)?;
        self.data.write().apply_dirty(mask, payload)?;
        *self.id.write() = Some(id);
        *self.role.write() = Some(Role::Slave);
        self.version.store(Arc::new(version));
        *self.sync_gate.0.lock() = version;
        self.sync_gate.1.notify_all();
        Ok(())
    }

    pub fn add_mapped_slave(&self, conn: Arc<dyn crate::connection::Connection>) {
        self.slaves.write().push(conn);
    }

    /// Master-side commit: serializes only the dirty fields. A
    /// never-dirty commit still allocates a version (matching
    /// `Distributable`'s `INSTANCE` semantics) but records an empty
    /// delta.
    pub fn commit(&self) -> Result<ObjectVersion> {
        self.id().ok_or(Error::NotRegistered(ObjectId(0)))?;
        if self.role() != Some(Role::Master) {
            return Err(Error::Protocol("commit called on a non-master object".into()));
        }
        let mask = self.data.read().dirty_mask();
        let payload = self.data.read().serialize_dirty(mask);
        self.data.write().clear_dirty();

        let next = self.get_version().next();
        self.version.store(Arc::new(next));
        let frame = encode_delta(mask, &payload);
        self.cm.lock().record(next, frame.clone());

        let id = self.id().unwrap_or(ObjectId(0));
        if let Some(cache) = self.instance_cache.read().clone() {
            cache.add(VersionedId::new(id, next), self.instance_id, frame.clone());
        }

        let mut wire_payload = VersionedId::new(id, next).to_bytes().to_vec();
        wire_payload.extend_from_slice(&frame);
        for slave in self.slaves.read().iter() {
            let _ = crate::wire::send_frame(slave.as_ref(), command_type::OBJECT, node_opcode::INSTANCE, &wire_payload);
        }
        Ok(next)
    }

    pub fn role(&self) -> Option<Role> {
        *self.role.read()
    }

    /// Master-side: read the bytes a new mapper should receive — the
    /// full state (`DIRTY_ALL`) when mapping at the current version,
    /// the instance cache's delta frame otherwise.
    pub fn instance_data_for_mapping(&self, requested: ObjectVersion) -> Result<Vec<u8>> {
        let id = self.id().ok_or(Error::NotRegistered(ObjectId(0)))?;
        if requested == self.get_version() || requested == ObjectVersion::HEAD {
            return Ok(encode_delta(DIRTY_ALL, &self.data.read().to_bytes()));
        }
        if let Some(cache) = self.instance_cache.read().as_ref() {
            if let Some(entry) = cache.lookup_version(id, requested) {
                let bytes = entry.bytes.clone();
                cache.release(id, 1);
                return Ok(bytes);
            }
        }
        Err(Error::VersionUnavailable(id))
    }

    /// Slave-side: apply a delta frame that arrived for `version`. If
    /// it arrives out of order relative to what has already been
    /// applied, it is parked until its predecessor lands — deltas must
    /// never be skipped (§4.H invariant).
    pub fn apply_delta_frame(&self, version: ObjectVersion, frame: &[u8]) -> Result<()> {
        self.pending_deltas.lock().insert(version.0, frame.to_vec());
        self.drain_ready_deltas()
    }

    fn drain_ready_deltas(&self) -> Result<()> {
        loop {
            let current = self.get_version();
            let next_key = current.next().0;
            let frame = self.pending_deltas.lock().remove(&next_key);
            let Some(frame) = frame else { return Ok(()) };
            let (mask, payload) = decode_delta(&frame)?;
            self.data.write().apply_dirty(mask, payload)?;
            let next = ObjectVersion(next_key);
            self.version.store(Arc::new(next));
            *self.sync_gate.0.lock() = next;
            self.sync_gate.1.notify_all();
        }
    }

    pub fn sync(&self, target: ObjectVersion, timeout: Option<Duration>) -> Result<()> {
        let mut guard = self.sync_gate.0.lock();
        let deadline = timeout.map(|t| Instant::now() + t);
        while *guard < target {
            match deadline {
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        return Err(Error::Timeout);
                    }
                    self.sync_gate.1.wait_for(&mut guard, d - now);
                }
                None => self.sync_gate.1.wait(&mut guard),
            }
        }
        Ok(())
    }

    pub fn with_data<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.data.read())
    }

    pub fn with_data_mut<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.data.write())
    }
}

impl<T: DeltaSerializable> NodeManagedObject for DeltaObject<T> {
    fn id(&self) -> Option<ObjectId> {
        DeltaObject::id(self)
    }

    fn change_type(&self) -> ChangeType {
        ChangeType::Delta
    }

    fn role(&self) -> Option<Role> {
        DeltaObject::role(self)
    }

    fn get_version(&self) -> ObjectVersion {
        DeltaObject::get_version(self)
    }

    fn add_mapped_slave(&self, conn: Arc<dyn crate::connection::Connection>) {
        DeltaObject::add_mapped_slave(self, conn)
    }

    fn instance_data_for_mapping(&self, requested: ObjectVersion) -> Result<Vec<u8>> {
        DeltaObject::instance_data_for_mapping(self, requested)
    }

    fn apply_wire_update(&self, version: ObjectVersion, bytes: &[u8]) -> Result<()> {
        self.apply_delta_frame(version, bytes)
    }

    fn attach_as_slave(&self, id: ObjectId, initial_data: &[u8], version: ObjectVersion) -> Result<()> {
        DeltaObject::map_slave(self, id, initial_data, version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Three independent fields, each gated by its own dirty bit —
    /// enough to exercise masked delta commits.
    #[derive(Default)]
    struct Fields {
        a: String,
        b: String,
        c: String,
        dirty: u64,
    }

    impl DeltaSerializable for Fields {
        fn to_bytes(&self) -> Vec<u8> {
            self.serialize_dirty(DIRTY_ALL)
        }

        fn from_bytes(&mut self, data: &[u8]) -> Result<()> {
            self.apply_dirty(DIRTY_ALL, data)
        }

        fn dirty_mask(&self) -> u64 {
            self.dirty
        }

        fn serialize_dirty(&self, mask: u64) -> Vec<u8> {
            let mut os = crate::stream::DataOStream::new();
            os.write_u64(mask);
            if mask & 0x1 != 0 {
                os.write_str(&self.a);
            }
            if mask & 0x2 != 0 {
                os.write_str(&self.b);
            }
            if mask & 0x4 != 0 {
                os.write_str(&self.c);
            }
            os.finish()
        }

        fn apply_dirty(&mut self, _mask: u64, data: &[u8]) -> Result<()> {
            let mut is = crate::stream::DataIStream::from_bytes(data.to_vec());
            let mask = is.read_u64()?;
            if mask & 0x1 != 0 {
                self.a = is.read_string()?;
            }
            if mask & 0x2 != 0 {
                self.b = is.read_string()?;
            }
            if mask & 0x4 != 0 {
                self.c = is.read_string()?;
            }
            Ok(())
        }

        fn clear_dirty(&mut self) {
            self.dirty = 0;
        }
    }

    #[test]
    fn three_masked_deltas_apply_in_order_on_slave() {
        let master = DeltaObject::new(Fields::default());
        master.register(None).unwrap();
        let slave = DeltaObject::new(Fields::default());
        slave.map_slave(master.id().unwrap(), &master.with_data(|d| d.to_bytes()), ObjectVersion::FIRST).unwrap();

        master.with_data_mut(|d| {
            d.a = "a".into();
            d.dirty = 0x1;
        });
        let v1 = master.commit().unwrap();
        let frame1 = master.cm.lock().get(v1).unwrap().to_vec();

        master.with_data_mut(|d| {
            d.b = "b".into();
            d.dirty = 0x2;
        });
        let v2 = master.commit().unwrap();
        let frame2 = master.cm.lock().get(v2).unwrap().to_vec();

        master.with_data_mut(|d| {
            d.c = "c".into();
            d.dirty = 0x4;
        });
        let v3 = master.commit().unwrap();
        let frame3 = master.cm.lock().get(v3).unwrap().to_vec();

        // Deliver out of order; slave must still apply in version order.
        slave.apply_delta_frame(v2, &frame2).unwrap();
        slave.apply_delta_frame(v3, &frame3).unwrap();
        slave.apply_delta_frame(v1, &frame1).unwrap();

        slave.sync(v3, Some(Duration::from_secs(2))).unwrap();
        slave.with_data(|d| {
            assert_eq!(d.a, "a");
            assert_eq!(d.b, "b");
            assert_eq!(d.c, "c");
        });
    }
}
