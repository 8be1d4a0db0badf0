//! Reference-counted reusable byte buffers (spec §3, §4.C).
//!
//! A [`Buffer`] is the atomic unit received from the wire: one frame,
//! one buffer. It wraps `bytes::BytesMut` behind an `Arc`, grounded in
//! the teacher's `spark-buffer` crate (`pool.rs`/`pooled_buffer.rs`)
//! which pools the same way for the same reason — amortizing
//! allocation on the hot receive path — but reimplemented here with a
//! return-to-cache-on-drop contract instead of return-to-allocator.

mod cache;

pub use cache::BufferCache;

use bytes::BytesMut;
use std::sync::Arc;

/// A resizable byte vector, cheap to clone (the clone is a refcount
/// bump over the same backing storage, never a copy).
#[derive(Clone, Debug)]
pub struct Buffer {
    inner: Arc<parking_lot::Mutex<BytesMut>>,
    origin: Option<BufferCache>,
}

impl Buffer {
    /// Allocate a detached buffer with no originating cache (returned
    /// to the allocator on drop, not pooled). Useful in tests and for
    /// one-off sends.
    pub fn detached(min_size: usize) -> Self {
        Self {
            inner: Arc::new(parking_lot::Mutex::new(BytesMut::with_capacity(min_size))),
            origin: None,
        }
    }

    pub(crate) fn pooled(bytes: BytesMut, origin: BufferCache) -> Self {
        Self { inner: Arc::new(parking_lot::Mutex::new(bytes)), origin: Some(origin) }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    pub fn extend_from_slice(&self, data: &[u8]) {
        self.inner.lock().extend_from_slice(data);
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.inner.lock().to_vec()
    }

    /// Address of the backing storage, exposed for pool-reuse tests.
    pub fn backing_addr(&self) -> usize {
        self.inner.lock().as_ptr() as usize
    }

    /// Number of live references to this buffer's backing storage.
    /// While this is `> 1` the buffer's storage must be treated as
    /// potentially observed by another reader.
    pub fn refcount(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        // Only the last strong reference triggers the return-to-cache:
        // `Arc::strong_count` observed here is racy by nature for any
        // count > 1, but == 1 right before drop means we are it.
        if Arc::strong_count(&self.inner) == 1 {
            if let Some(cache) = self.origin.take() {
                let bytes = std::mem::replace(&mut *self.inner.lock(), BytesMut::new());
                cache.recycle(bytes);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clone_is_refcount_bump_not_copy() {
        let b = Buffer::detached(16);
        b.extend_from_slice(b"hello");
        let c = b.clone();
        assert_eq!(b.refcount(), 2);
        c.extend_from_slice(b" world");
        assert_eq!(b.to_vec(), b"hello world");
    }
}
