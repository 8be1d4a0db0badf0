use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use parking_lot::{Condvar, Mutex, RwLock};

use super::{ChangeManager, ChangeType, InstanceCache, InstanceId, NodeManagedObject, ObjectId, ObjectVersion, Role, VersionedId};
use crate::command::{command_type, node_opcode};
use crate::error::{Error, Result};

/// Minimal contract a user type must implement to be carried by a
/// [`Distributable`]. Grounded in the Design Notes' replacement for the
/// source's CRTP `Zerobuf`/`Serializable` wrappers: `to_bytes`/
/// `from_bytes` stand in for `toBinary`/`fromBinary`, which the
/// serializable-object toolkit (an external collaborator, §1) would
/// otherwise supply.
pub trait InstanceSerializable: Send + Sync + 'static {
    fn to_bytes(&self) -> Vec<u8>;
    fn from_bytes(&mut self, data: &[u8]) -> Result<()>;
}

/// Unifies what the source duplicated as `Distributable<T>` and
/// `ZeroBuf<T>` (Open Question b): one generic adapter that wraps any
/// [`InstanceSerializable`] type and implements the master/slave object
/// role for the `STATIC`, `INSTANCE` and `UNBUFFERED` change types.
/// `DELTA` objects use [`super::DeltaObject`] instead, since delta
/// serialization needs a wire format (dirty mask + partial bytes) the
/// plain `InstanceSerializable` contract does not carry.
pub struct Distributable<T: InstanceSerializable> {
    change_type: ChangeType,
    instance_id: InstanceId,
    id: RwLock<Option<ObjectId>>,
    role: RwLock<Option<Role>>,
    data: RwLock<T>,
    version: ArcSwap<ObjectVersion>,
    cm: Mutex<ChangeManager>,
    slaves: RwLock<Vec<Arc<dyn crate::connection::Connection>>>,
    instance_cache: RwLock<Option<Arc<InstanceCache>>>,
    sync_gate: (Mutex<ObjectVersion>, Condvar),
}

impl<T: InstanceSerializable> Distributable<T> {
    /// Constructed detached: no identifier, no role (§4.H lifecycle 1).
    pub fn new(change_type: ChangeType, data: T) -> Self {
        Self {
            change_type,
            instance_id: InstanceId::generate(),
            id: RwLock::new(None),
            role: RwLock::new(None),
            data: RwLock::new(data),
            version: ArcSwap::new(Arc::new(ObjectVersion::NONE)),
            cm: Mutex::new(ChangeManager::new(change_type)),
            slaves: RwLock::new(Vec::new()),
            instance_cache: RwLock::new(None),
            sync_gate: (Mutex::new(ObjectVersion::NONE), Condvar::new()),
        }
    }

    pub fn auto_obsolete(&self, n: u32) {
        self.cm.lock().auto_obsolete(n);
    }

    pub fn id(&self) -> Option<ObjectId> {
        *self.id.read()
    }

    pub fn instance_id(&self) -> InstanceId {
        self.instance_id
    }

    pub fn role(&self) -> Option<Role> {
        *self.role.read()
    }

    pub fn is_attached(&self) -> bool {
        self.id.read().is_some()
    }

    pub fn get_version(&self) -> ObjectVersion {
        **self.version.load()
    }

    pub fn is_dirty(&self) -> bool {
        // Static/Instance/Unbuffered objects have no partial-dirty
        // concept; "dirty" means "never committed yet".
        self.get_version() == ObjectVersion::NONE
    }

    /// Registers as master (§4.H lifecycle 2): assigns an identifier,
    /// sets role `MASTER`, initial version `FIRST`.
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

    /// Remote mapping (§4.H lifecycle 3): attach as `SLAVE`, load the
    /// initial instance data the master sent, at the version it was
    /// captured at.
    pub fn map_slave(&self, id: ObjectId, initial_data: &[u8], version: ObjectVersion) -> Result<()> {
        self.data.write().from_bytes(initial_data)?;
        *self.id.write() = Some(id);
        *self.role.write() = Some(Role::Slave);
        self.version.store(Arc::new(version));
        *self.sync_gate.0.lock() = version;
        self.sync_gate.1.notify_all();
        Ok(())
    }

    pub fn unmap(&self) -> Result<()> {
        self.require_attached()?;
        *self.role.write() = None;
        *self.id.write() = None;
        Ok(())
    }

    pub fn deregister(&self) -> Result<()> {
        if self.role() != Some(Role::Master) {
            return Err(Error::NotRegistered(self.id().unwrap_or(ObjectId(0))));
        }
        *self.id.write() = None;
        *self.role.write() = None;
        self.slaves.write().clear();
        Ok(())
    }

    fn require_attached(&self) -> Result<ObjectId> {
        self.id().ok_or(Error::NotRegistered(ObjectId(0)))
    }

    /// Master-side: register a slave connection to push future commits
    /// to, and read the data needed to answer a `MAP_REPLY` — the
    /// instance cache is consulted first, falling back to a fresh
    /// serialization.
    pub fn add_mapped_slave(&self, conn: Arc<dyn crate::connection::Connection>) {
        self.slaves.write().push(conn);
    }

    /// Read the bytes a new mapper should receive at `requested`
    /// version: the instance cache's copy if present, otherwise a
    /// fresh full serialization of the current state (only valid if
    /// `requested` is the current version — older versions with no
    /// cache entry fail per §4.H's `VERSION_UNAVAILABLE` invariant).
    pub fn instance_data_for_mapping(&self, requested: ObjectVersion) -> Result<Vec<u8>> {
        let id = self.require_attached()?;
        if let Some(cache) = self.instance_cache.read().as_ref() {
            if let Some(entry) = cache.lookup_version(id, requested) {
                let bytes = entry.bytes.clone();
                cache.release(id, 1);
                return Ok(bytes);
            }
        }
        if requested == self.get_version() || requested == ObjectVersion::HEAD {
            Ok(self.data.read().to_bytes())
        } else {
            Err(Error::VersionUnavailable(id))
        }
    }

    /// Allocate the next version and, for `INSTANCE` objects, serialize
    /// the full state into the change manager's history and push it to
    /// mapped slaves. `STATIC` commits are a no-op that returns the
    /// constant version; `UNBUFFERED` commits bump the version but
    /// never retain history.
    pub fn commit(&self) -> Result<ObjectVersion> {
        self.require_attached()?;
        if self.role() != Some(Role::Master) {
            return Err(Error::Protocol("commit called on a non-master object".into()));
        }
        if self.change_type == ChangeType::Static {
            return Ok(self.get_version());
        }

        let next = self.get_version().next();
        self.version.store(Arc::new(next));
        let bytes = self.data.read().to_bytes();
        self.cm.lock().record(next, bytes.clone());

        if let (Some(id), Some(cache)) = (self.id(), self.instance_cache.read().clone()) {
            cache.add(VersionedId::new(id, next), self.instance_id, bytes.clone());
        }

        let id = self.id().unwrap_or(ObjectId(0));
        let mut payload = VersionedId::new(id, next).to_bytes().to_vec();
        payload.extend_from_slice(&bytes);
        for slave in self.slaves.read().iter() {
            let _ = crate::wire::send_frame(slave.as_ref(), command_type::OBJECT, node_opcode::INSTANCE, &payload);
        }

        Ok(next)
    }

    /// Slave-side: apply instance data that has arrived out of band
    /// (e.g. via the node-layer `INSTANCE` command handler) and wake up
    /// anyone blocked in `sync`.
    pub fn apply_instance_data(&self, version: ObjectVersion, bytes: &[u8]) -> Result<()> {
        self.data.write().from_bytes(bytes)?;
        self.version.store(Arc::new(version));
        *self.sync_gate.0.lock() = version;
        self.sync_gate.1.notify_all();
        Ok(())
    }

    /// Slave-side: block until the locally-applied version is `>=
    /// target`, or `timeout` elapses.
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

impl<T: InstanceSerializable> NodeManagedObject for Distributable<T> {
    fn id(&self) -> Option<ObjectId> {
        Distributable::id(self)
    }

    fn change_type(&self) -> ChangeType {
        self.change_type
    }

    fn role(&self) -> Option<Role> {
        Distributable::role(self)
    }

    fn get_version(&self) -> ObjectVersion {
        Distributable::get_version(self)
    }

    fn add_mapped_slave(&self, conn: Arc<dyn crate::connection::Connection>) {
        Distributable::add_mapped_slave(self, conn)
    }

    fn instance_data_for_mapping(&self, requested: ObjectVersion) -> Result<Vec<u8>> {
        Distributable::instance_data_for_mapping(self, requested)
    }

    fn apply_wire_update(&self, version: ObjectVersion, bytes: &[u8]) -> Result<()> {
        self.apply_instance_data(version, bytes)
    }

    fn attach_as_slave(&self, id: ObjectId, initial_data: &[u8], version: ObjectVersion) -> Result<()> {
        Distributable::map_slave(self, id, initial_data, version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone)]
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
    fn versions_strictly_increase_across_commits() {
        let obj = Distributable::new(ChangeType::Instance, Counter(0));
        obj.register(None).unwrap();
        let v1 = obj.commit().unwrap();
        obj.with_data_mut(|c| c.0 = 1);
        let v2 = obj.commit().unwrap();
        assert!(v2 > v1);
    }

    #[test]
    fn static_commit_is_a_noop() {
        let obj = Distributable::new(ChangeType::Static, Counter(7));
        obj.register(None).unwrap();
        let v1 = obj.commit().unwrap();
        let v2 = obj.commit().unwrap();
        assert_eq!(v1, v2);
    }

    #[test]
    fn slave_sync_unblocks_on_apply() {
        let obj = Arc::new(Distributable::new(ChangeType::Instance, Counter(0)));
        obj.map_slave(ObjectId::generate(), &0u32.to_le_bytes(), ObjectVersion::FIRST).unwrap();
        let obj2 = obj.clone();
        let target = ObjectVersion(5);
        let handle = std::thread::spawn(move || obj2.sync(target, Some(Duration::from_secs(2))));
        std::thread::sleep(Duration::from_millis(20));
        obj.apply_instance_data(target, &5u32.to_le_bytes()).unwrap();
        handle.join().unwrap().unwrap();
        assert_eq!(obj.get_version(), target);
    }
}
