//! Crate-wide error taxonomy (spec §7).
//!
//! Mirrors the teacher's stable-code-plus-cause error shape, but as a
//! plain `std` `thiserror` enum rather than a hand-rolled `no_std`
//! `CoreError`: this crate has no `no_std` track, so the idiomatic
//! choice is a derived `std::error::Error` impl.

use crate::ids::{NodeId, ObjectId};

/// Crate-wide result alias, re-exported from the crate root.
pub type Result<T> = std::result::Result<T, Error>;

/// The error taxonomy of §7, one variant per kind.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Reachability failure during `connect`/`listen`.
    #[error("connect failed: {0}")]
    Connect(String),

    /// Mid-frame transport failure; always closes the connection.
    #[error("io error on connection: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed frame, unknown command, version mismatch.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Object-layer call against a detached object.
    #[error("object {0:?} is not registered")]
    NotRegistered(ObjectId),

    /// Object-layer call against a slave that was never mapped.
    #[error("object {0:?} is not mapped")]
    NotMapped(ObjectId),

    /// Mapping requested a version the instance cache no longer holds.
    #[error("version unavailable for object {0:?}")]
    VersionUnavailable(ObjectId),

    /// A blocking operation exceeded its timeout.
    #[error("operation timed out")]
    Timeout,

    /// Master or slave was lost before the operation completed.
    #[error("peer {0:?} disconnected")]
    Disconnected(NodeId),
}

impl Error {
    pub fn is_fatal_for_node_command(&self) -> bool {
        matches!(self, Error::Protocol(_) | Error::Io(_))
    }
}
