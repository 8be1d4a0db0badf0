//! Observability facade (ambient stack, §1 — logging is listed as an
//! external collaborator, but the facade seam itself is carried
//! regardless of that Non-goal).
//!
//! The teacher wraps OpenTelemetry/metrics behind `ObservabilityFacade`
//! and keeps `spark-core` itself free of concrete logging crates. This
//! crate has no such split to maintain, so `NodeObserver` forwards
//! straight to `tracing`; the trait exists so callers can swap in their
//! own sink (a test harness that counts events, for instance) without
//! this crate depending on anything beyond `tracing`.

use crate::ids::{NodeId, ObjectId};

/// Hook points a `LocalNode`/`Object` reports through. All methods have
/// no-op defaults; implement only what you need.
pub trait NodeObserver: Send + Sync {
    fn peer_connected(&self, _peer: NodeId) {}
    fn peer_disconnected(&self, _peer: NodeId) {}
    fn object_committed(&self, _object: ObjectId, _version: u128) {}
    fn object_mapped(&self, _object: ObjectId, _master: NodeId) {}
    fn unknown_command(&self, _type_id: u32, _opcode: u32) {}
}

/// Default observer: everything goes through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl NodeObserver for TracingObserver {
    fn peer_connected(&self, peer: NodeId) {
        tracing::info!(%peer, "peer connected");
    }

    fn peer_disconnected(&self, peer: NodeId) {
        tracing::warn!(%peer, "peer disconnected");
    }

    fn object_committed(&self, object: ObjectId, version: u128) {
        tracing::debug!(?object, version, "object committed");
    }

    fn object_mapped(&self, object: ObjectId, master: NodeId) {
        tracing::debug!(?object, %master, "object mapped");
    }

    fn unknown_command(&self, type_id: u32, opcode: u32) {
        tracing::warn!(type_id, opcode, "dropping unknown command");
    }
}
