#![doc = "collage-core: a peer-to-peer distributed-object replication engine."]
#![doc = ""]
#![doc = "A process joins a mesh of peers ([`node::LocalNode`]), each identified"]
#![doc = "by a stable [`ids::NodeId`]; peers exchange typed [`command::Command`]s"]
#![doc = "over [`connection::Connection`]s, and they share versioned"]
#![doc = "[`object`] state replicated from a master instance to any number of"]
#![doc = "mapped slave instances."]
#![doc = ""]
#![doc = "This crate targets `std` unconditionally: the thread-per-role"]
#![doc = "concurrency model (receiver / command / object-command threads) needs"]
#![doc = "blocking sockets, `std::thread` and OS timers, so there is no"]
#![doc = "`no_std` track."]

pub mod buffer;
pub mod command;
pub mod config;
pub mod connection;
pub mod error;
pub mod ids;
pub mod node;
pub mod object;
pub mod observability;
pub mod runtime;
pub mod stream;
pub mod wire;

pub use buffer::{Buffer, BufferCache};
pub use command::{command_type, node_opcode, Command, CommandQueue, Dispatcher, Handler, Route};
pub use config::{ConnectionDescription, ConnectionType, NodeSettings};
pub use connection::{BufferConnection, Connection, ConnectionHandle, ConnectionSet, ConnectionState, Event, TcpConnection, TcpListener};
pub use error::{Error, Result};
pub use ids::{InstanceId, NodeId, ObjectId, ObjectVersion, VersionedId};
pub use node::{LocalNode, Node, NodeCommandBuilder};
pub use object::{
    barrier::Barrier,
    queue_object::{QueueItem, QueueMaster, QueueSlave},
    CacheEntry, ChangeManager, ChangeType, DeltaObject, DeltaSerializable, Distributable, InstanceCache,
    InstanceSerializable, NodeManagedObject, Role,
};
pub use observability::{NodeObserver, TracingObserver};
pub use runtime::Runtime;
pub use stream::{Compressor, DataIStream, DataOStream, NoopCompressor};
