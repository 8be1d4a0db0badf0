use bytes::BytesMut;
use std::sync::Arc;

use super::Buffer;

/// A free-list of buffers bucketed by size, meant to be owned by one
/// thread (typically a receiver thread) at a time. Cloning a
/// `BufferCache` shares the same underlying buckets — call sites that
/// want true thread-affinity should keep one cache per thread rather
/// than share a clone, but sharing is not unsound, only against the
/// grain of the design (see `spark-buffer::pool`, which this mirrors).
#[derive(Clone)]
pub struct BufferCache {
    buckets: Arc<parking_lot::Mutex<Vec<Vec<BytesMut>>>>,
}

const BUCKET_COUNT: usize = 24; // covers bucket sizes up to 2^23 (8 MiB)

impl BufferCache {
    pub fn new() -> Self {
        Self { buckets: Arc::new(parking_lot::Mutex::new(vec![Vec::new(); BUCKET_COUNT])) }
    }

    fn bucket_for(min_size: usize) -> usize {
        let size = min_size.max(1);
        (usize::BITS - (size - 1).leading_zeros()) as usize
    }

    /// Returns a buffer with refcount 1 and capacity >= `min_size`,
    /// reused from the free list when a suitable one is available.
    pub fn alloc(&self, min_size: usize) -> Buffer {
        let bucket = Self::bucket_for(min_size).min(BUCKET_COUNT - 1);
        let bytes = {
            let mut buckets = self.buckets.lock();
            buckets[bucket].pop()
        };
        let mut bytes = bytes.unwrap_or_else(|| BytesMut::with_capacity(1 << bucket));
        bytes.clear();
        Buffer::pooled(bytes, self.clone())
    }

    pub(super) fn recycle(&self, bytes: BytesMut) {
        let bucket = Self::bucket_for(bytes.capacity()).min(BUCKET_COUNT - 1);
        self.buckets.lock()[bucket].push(bytes);
    }

    /// Number of buffers currently parked in the free list, across all
    /// buckets. Exposed for tests and diagnostics only.
    pub fn pooled_count(&self) -> usize {
        self.buckets.lock().iter().map(Vec::len).sum()
    }
}

impl Default for BufferCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn released_buffer_returns_to_cache_not_freed() {
        let cache = BufferCache::new();
        assert_eq!(cache.pooled_count(), 0);
        let buf = cache.alloc(64);
        drop(buf);
        assert_eq!(cache.pooled_count(), 1);
    }

    #[test]
    fn reuse_bounds_distinct_backing_addresses() {
        // Single-threaded alloc/drop loop: the pool should keep handing
        // back the same backing storage, so at most 2 distinct
        // addresses are ever observed (the initial allocation and,
        // rarely, one extra from bucket growth).
        let cache = BufferCache::new();
        let mut addrs = std::collections::HashSet::new();
        for _ in 0..50 {
            let buf = cache.alloc(128);
            addrs.insert(buf.backing_addr());
            drop(buf);
        }
        assert!(addrs.len() <= 2, "observed {} distinct addresses", addrs.len());
    }

    #[test]
    fn shared_cache_recycles_buffers_across_reader_threads() {
        // Several threads share one cloned cache, each allocating and
        // releasing repeatedly; nothing should be lost or double-freed,
        // and every buffer handed out lands back in the free list.
        let cache = BufferCache::new();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        let buf = cache.alloc(256);
                        assert_eq!(buf.len(), 0);
                        buf.extend_from_slice(&[7u8; 256]);
                        assert_eq!(buf.len(), 256);
                        drop(buf);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert!(cache.pooled_count() >= 1);
        assert!(cache.pooled_count() <= 4);
    }
}
