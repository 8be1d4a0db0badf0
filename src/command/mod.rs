//! Typed command envelope and the dispatch/queue pipeline that routes
//! it (spec §4.E, §4.F, §6).

mod dispatcher;
mod queue;

pub use dispatcher::{Dispatcher, Handler, Route};
pub use queue::CommandQueue;

use crate::buffer::Buffer;
use crate::ids::NodeId;

/// Command-type space (§6): `NODE=0`, `OBJECT=1`, `CUSTOM=128`.
/// Opcode space is per type.
pub mod command_type {
    pub const NODE: u32 = 0;
    pub const OBJECT: u32 = 1;
    pub const CUSTOM: u32 = 128;
}

/// Node-layer opcodes (§6).
pub mod node_opcode {
    pub const HANDSHAKE: u32 = 0;
    pub const CONNECT_ACK: u32 = 1;
    pub const DISCONNECT: u32 = 2;
    pub const MAP_REQUEST: u32 = 3;
    pub const MAP_REPLY: u32 = 4;
    pub const INSTANCE: u32 = 5;
    pub const OBJECT_PUSH: u32 = 6;
    pub const BARRIER_ENTER: u32 = 7;
    pub const BARRIER_LEAVE: u32 = 8;
    pub const QUEUE_ITEM: u32 = 9;
    pub const QUEUE_EMPTY: u32 = 10;
    pub const CUSTOM: u32 = 11;
    /// Slave's pull signal to the queue master (§4.J): not named in §6's
    /// prose opcode list, but required plumbing for `QueueSlave::pop` to
    /// reach a master in a different process, the same way `CONNECT_ACK`
    /// is required plumbing alongside `HANDSHAKE`.
    pub const QUEUE_POP: u32 = 12;
}

/// A view over a buffer plus routing metadata (§3). Cheap to clone: the
/// clone shares the underlying buffer via refcount, it never copies
/// the payload.
#[derive(Clone)]
pub struct Command {
    pub type_id: u32,
    pub opcode: u32,
    pub payload: Buffer,
    pub originator: NodeId,
    pub local: NodeId,
}

impl Command {
    pub fn new(type_id: u32, opcode: u32, payload: Buffer, originator: NodeId, local: NodeId) -> Self {
        Self { type_id, opcode, payload, originator, local }
    }

    pub fn istream(&self) -> crate::stream::DataIStream {
        crate::stream::DataIStream::from_buffers(vec![self.payload.clone()])
    }
}
