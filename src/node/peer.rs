use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::ConnectionDescription;
use crate::connection::{ConnectionHandle, ConnectionState};
use crate::ids::NodeId;

/// A remote peer's identity, reachability info and current connection
/// slot (§3, §4.G). `LocalNode` is the same shape for the local
/// process, with a listener set, registries and worker threads wrapped
/// around it — `Peer` stays thin on purpose.
pub struct Peer {
    pub id: NodeId,
    pub descriptions: Vec<ConnectionDescription>,
    state: RwLock<ConnectionState>,
    connection: RwLock<Option<ConnectionHandle>>,
}

impl Peer {
    pub fn new(id: NodeId, descriptions: Vec<ConnectionDescription>) -> Arc<Self> {
        Arc::new(Self {
            id,
            descriptions,
            state: RwLock::new(ConnectionState::Closed),
            connection: RwLock::new(None),
        })
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn connection(&self) -> Option<ConnectionHandle> {
        self.connection.read().clone()
    }

    pub(crate) fn set_connection(&self, conn: Option<ConnectionHandle>) {
        *self.state.write() = if conn.is_some() { ConnectionState::Connected } else { ConnectionState::Closed };
        *self.connection.write() = conn;
    }
}
