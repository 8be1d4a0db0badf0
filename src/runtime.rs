//! Explicit process-wide handle (Design Notes: replaces the source's
//! `init`/`exit` globals). Create one `Runtime` before any `LocalNode`
//! and keep it alive until the last `LocalNode` has been closed.

use std::sync::Arc;

use crate::observability::{NodeObserver, TracingObserver};

/// Everything crate-wide state hangs off. Cheap to clone (it is just an
/// `Arc` of shared config + observer).
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

struct RuntimeInner {
    observer: Arc<dyn NodeObserver>,
}

impl Runtime {
    pub fn new() -> Self {
        Self::with_observer(Arc::new(TracingObserver))
    }

    pub fn with_observer(observer: Arc<dyn NodeObserver>) -> Self {
        Self { inner: Arc::new(RuntimeInner { observer }) }
    }

    pub fn observer(&self) -> Arc<dyn NodeObserver> {
        self.inner.observer.clone()
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}
