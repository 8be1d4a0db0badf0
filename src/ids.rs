//! Identity and version types (spec §3).

use std::fmt;

/// A 128-bit globally-unique peer identity, minted once at `LocalNode`
/// construction and carried by every command so the receiver can look
/// up the originating proxy.
///
/// Generated with [`rand`], the same crate the `technomunk-gnet`
/// reference implementation uses to mint connection-local identifiers.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u128);

impl NodeId {
    pub fn generate() -> Self {
        NodeId(rand::random())
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({:032x})", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// A 128-bit identifier unique, for its lifetime, across the whole mesh.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId(pub u128);

impl ObjectId {
    pub fn generate() -> Self {
        ObjectId(rand::random())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({:032x})", self.0)
    }
}

/// A 32-bit identifier unique per local instance of an object (a master
/// and each of its slaves each have their own).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InstanceId(pub u32);

impl InstanceId {
    pub fn generate() -> Self {
        InstanceId(rand::random())
    }
}

/// Monotonically-increasing object version, with the sentinel values
/// from §3. Ordering and equality are the plain integer ordering;
/// `NEXT` is never compared, it is only ever passed to `commit` to mean
/// "allocate the next version".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectVersion(pub u128);

impl ObjectVersion {
    pub const NONE: ObjectVersion = ObjectVersion(0);
    pub const FIRST: ObjectVersion = ObjectVersion(1);
    pub const OLDEST: ObjectVersion = ObjectVersion(1);
    pub const NEXT: ObjectVersion = ObjectVersion(u128::MAX - 1);
    pub const INVALID: ObjectVersion = ObjectVersion(u128::MAX);
    pub const HEAD: ObjectVersion = ObjectVersion(u128::MAX - 2);

    pub fn is_sentinel(self) -> bool {
        matches!(self, ObjectVersion::NEXT | ObjectVersion::INVALID | ObjectVersion::HEAD)
    }

    pub fn next(self) -> ObjectVersion {
        debug_assert!(!self.is_sentinel());
        ObjectVersion(self.0 + 1)
    }
}

/// `(identifier, version)` pair; serialized form is 32 bytes (two u128,
/// little-endian) per §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VersionedId {
    pub id: ObjectId,
    pub version: ObjectVersion,
}

impl VersionedId {
    pub fn new(id: ObjectId, version: ObjectVersion) -> Self {
        Self { id, version }
    }

    pub fn to_bytes(self) -> [u8; 32] {
        let mut out = [0u8; 32];
        out[0..16].copy_from_slice(&self.id.0.to_le_bytes());
        out[16..32].copy_from_slice(&self.version.0.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        let id = u128::from_le_bytes(bytes[0..16].try_into().unwrap());
        let version = u128::from_le_bytes(bytes[16..32].try_into().unwrap());
        Self { id: ObjectId(id), version: ObjectVersion(version) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versioned_id_round_trips() {
        let v = VersionedId::new(ObjectId::generate(), ObjectVersion(42));
        assert_eq!(VersionedId::from_bytes(&v.to_bytes()), v);
    }

    #[test]
    fn node_ids_are_distinct() {
        assert_ne!(NodeId::generate(), NodeId::generate());
    }
}
