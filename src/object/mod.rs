//! Distributed-object layer (spec §3, §4.H, §4.I, §4.J).

mod change_manager;
mod delta;
mod distributable;
mod instance_cache;

pub mod barrier;
pub mod queue_object;

pub use change_manager::ChangeManager;
pub use delta::{DeltaObject, DeltaSerializable};
pub use distributable::{Distributable, InstanceSerializable};
pub use instance_cache::{CacheEntry, InstanceCache};

pub use crate::ids::{InstanceId, ObjectId, ObjectVersion, VersionedId};

use std::sync::Arc;

/// Uniform, type-erased handle the node layer's object registry holds
/// for any attached [`Distributable`] or [`DeltaObject`] (§4.G): enough
/// to answer a `MAP_REQUEST` and to apply an incoming `INSTANCE` wire
/// update, without the registry needing to be generic over the
/// object's payload type.
pub trait NodeManagedObject: Send + Sync {
    fn id(&self) -> Option<ObjectId>;
    fn change_type(&self) -> ChangeType;
    fn role(&self) -> Option<Role>;
    fn get_version(&self) -> ObjectVersion;
    fn add_mapped_slave(&self, conn: Arc<dyn crate::connection::Connection>);
    fn instance_data_for_mapping(&self, requested: ObjectVersion) -> crate::error::Result<Vec<u8>>;
    /// Slave-side: apply the raw bytes carried by an `INSTANCE` command
    /// for `version` — the same bytes the master's `commit` sent over
    /// the wire (a full serialization for `Distributable`, a
    /// `(mask, delta)` frame for `DeltaObject`).
    fn apply_wire_update(&self, version: ObjectVersion, bytes: &[u8]) -> crate::error::Result<()>;
    /// Slave-side first attachment (§4.H lifecycle 3): record the
    /// master-assigned identifier and load the initial instance data a
    /// `MAP_REPLY` carried, the moment a `LocalNode` completes a
    /// mapping request on this object's behalf.
    fn attach_as_slave(&self, id: ObjectId, initial_data: &[u8], version: ObjectVersion) -> crate::error::Result<()>;
}

/// How an object is serialized (§3, §4.H).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    /// Instance data exists but never changes; `commit` is a no-op.
    Static,
    /// Every `commit` serializes the full instance data.
    Instance,
    /// `commit` serializes only what the subclass marked dirty.
    Delta,
    /// Master never retains history; mapping must read a fresh commit.
    Unbuffered,
}

/// Authoritative vs. replicated instance of a distributed object (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Master,
    Slave,
}
