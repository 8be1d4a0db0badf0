use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};

use dashmap::DashMap;

use super::{InstanceId, ObjectId, ObjectVersion, VersionedId};

/// One memoized instance-data frame (§3, §4.I).
#[derive(Clone)]
pub struct CacheEntry {
    pub version: ObjectVersion,
    pub master_instance: InstanceId,
    pub bytes: Vec<u8>,
    refcount: std::sync::Arc<AtomicU32>,
}

/// Memoizes recent instance-data buffers, keyed by object identifier,
/// for bulk sync of newly-mapped slaves (§4.I). Process-wide and
/// lock-guarded, as the spec requires; built on `dashmap` for the
/// per-object bucket map, the same crate the teacher reaches for in
/// its own registries (`kernel/mod.rs`, `pipeline/internal.rs`).
pub struct InstanceCache {
    entries: DashMap<ObjectId, VecDeque<CacheEntry>>,
    total_bytes: AtomicI64,
    cap_bytes: i64,
}

impl InstanceCache {
    pub fn new(cap_bytes: usize) -> Self {
        Self { entries: DashMap::new(), total_bytes: AtomicI64::new(0), cap_bytes: cap_bytes as i64 }
    }

    /// Stores the serialized instance data for `(id, version)`, subject
    /// to the total-bytes cap: evicts least-recently-added entries with
    /// a zero refcount until there is room, or returns `false` if no
    /// room could be freed.
    pub fn add(&self, versioned: VersionedId, master_instance: InstanceId, bytes: Vec<u8>) -> bool {
        let size = bytes.len() as i64;
        if size > self.cap_bytes {
            return false;
        }
        while self.total_bytes.load(Ordering::SeqCst) + size > self.cap_bytes {
            if !self.evict_one() {
                return false;
            }
        }
        let mut list = self.entries.entry(versioned.id).or_insert_with(VecDeque::new);
        list.push_back(CacheEntry {
            version: versioned.version,
            master_instance,
            bytes,
            refcount: std::sync::Arc::new(AtomicU32::new(0)),
        });
        self.total_bytes.fetch_add(size, Ordering::SeqCst);
        true
    }

    fn evict_one(&self) -> bool {
        for mut list in self.entries.iter_mut() {
            if let Some(pos) = list.iter().position(|e| e.refcount.load(Ordering::SeqCst) == 0) {
                let removed = list.remove(pos).unwrap();
                self.total_bytes.fetch_sub(removed.bytes.len() as i64, Ordering::SeqCst);
                return true;
            }
        }
        false
    }

    /// Bumps the entry's refcount; caller must later `release` it.
    pub fn lookup_version(&self, id: ObjectId, version: ObjectVersion) -> Option<CacheEntry> {
        let list = self.entries.get(&id)?;
        let entry = list.iter().find(|e| e.version == version)?;
        entry.refcount.fetch_add(1, Ordering::SeqCst);
        Some(entry.clone())
    }

    pub fn lookup_latest(&self, id: ObjectId) -> Option<CacheEntry> {
        let list = self.entries.get(&id)?;
        let entry = list.back()?;
        entry.refcount.fetch_add(1, Ordering::SeqCst);
        Some(entry.clone())
    }

    pub fn release(&self, id: ObjectId, count: u32) {
        if let Some(list) = self.entries.get(&id) {
            for entry in list.iter() {
                let mut remaining = count;
                while remaining > 0 {
                    let current = entry.refcount.load(Ordering::SeqCst);
                    if current == 0 {
                        break;
                    }
                    entry.refcount.fetch_sub(1, Ordering::SeqCst);
                    remaining -= 1;
                }
            }
        }
    }

    /// Removes the object's whole entry list; succeeds only when every
    /// held entry has a zero refcount.
    pub fn erase(&self, id: ObjectId) -> bool {
        let Some(list) = self.entries.get(&id) else { return true };
        if list.iter().any(|e| e.refcount.load(Ordering::SeqCst) > 0) {
            return false;
        }
        drop(list);
        if let Some((_, list)) = self.entries.remove(&id) {
            let freed: i64 = list.iter().map(|e| e.bytes.len() as i64).sum();
            self.total_bytes.fetch_sub(freed, Ordering::SeqCst);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_then_lookup_returns_identical_bytes() {
        let cache = InstanceCache::new(1024);
        let id = ObjectId::generate();
        let inst = InstanceId::generate();
        cache.add(VersionedId::new(id, ObjectVersion(1)), inst, vec![1, 2, 3]);
        let entry = cache.lookup_version(id, ObjectVersion(1)).unwrap();
        assert_eq!(entry.bytes, vec![1, 2, 3]);
        assert_eq!(entry.master_instance, inst);
    }

    #[test]
    fn erase_fails_while_refcount_held_then_succeeds() {
        let cache = InstanceCache::new(1024);
        let id = ObjectId::generate();
        cache.add(VersionedId::new(id, ObjectVersion(1)), InstanceId::generate(), vec![9]);
        let _entry = cache.lookup_version(id, ObjectVersion(1)).unwrap();
        assert!(!cache.erase(id));
        cache.release(id, 1);
        assert!(cache.erase(id));
        assert!(cache.erase(id)); // idempotent
    }

    #[test]
    fn late_join_receives_exact_version_byte_for_byte() {
        let cache = InstanceCache::new(1024);
        let id = ObjectId::generate();
        let inst = InstanceId::generate();
        cache.add(VersionedId::new(id, ObjectVersion(1)), inst, b"v1".to_vec());
        cache.add(VersionedId::new(id, ObjectVersion(2)), inst, b"v2".to_vec());
        cache.add(VersionedId::new(id, ObjectVersion(3)), inst, b"v3".to_vec());
        let entry = cache.lookup_version(id, ObjectVersion(2)).unwrap();
        assert_eq!(entry.bytes, b"v2");
    }

    #[test]
    fn eviction_respects_byte_cap() {
        let cache = InstanceCache::new(8);
        let id = ObjectId::generate();
        let inst = InstanceId::generate();
        assert!(cache.add(VersionedId::new(id, ObjectVersion(1)), inst, vec![0; 6]));
        assert!(cache.add(VersionedId::new(id, ObjectVersion(2)), inst, vec![0; 6]));
        // second add evicts the first (refcount 0), total stays <= cap
        assert!(cache.lookup_version(id, ObjectVersion(1)).is_none());
        assert!(cache.lookup_version(id, ObjectVersion(2)).is_some());
    }
}
