//! `LocalNode`: peer identity, listener set, peer table, handshake,
//! send APIs, receiver/command/object-command threads, object
//! registry (spec §4.G).
//!
//! Cyclic ownership (`LocalNode` ↔ `Connection`, `LocalNode` ↔
//! `Object`) is resolved per the Design Notes: `LocalNode` strongly
//! owns its `Connection`s, its object registry and its dispatch
//! closures; the closures only ever hold a [`Weak`] back-reference to
//! the node that installed them, so a `LocalNode` can still be dropped
//! once its `Arc` count reaches zero.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::{Condvar, Mutex, RwLock};

use crate::buffer::BufferCache;
use crate::command::{command_type, node_opcode, Command, Dispatcher, Handler};
use crate::config::{ConnectionDescription, ConnectionType, NodeSettings};
use crate::connection::{Connection, ConnectionHandle, ConnectionSet, Event, TcpConnection, TcpListener};
use crate::error::{Error, Result};
use crate::ids::{NodeId, ObjectId, ObjectVersion};
use crate::object::barrier::Barrier;
use crate::object::queue_object::{PopOutcome, QueueMaster, QueueSlave};
use crate::object::{InstanceCache, NodeManagedObject};
use crate::observability::NodeObserver;
use crate::runtime::Runtime;
use crate::stream::DataIStream;

use super::builder::NodeCommandBuilder;
use super::peer::Peer;

type PushHandlerFn = dyn Fn(NodeId, u32, ObjectId, DataIStream) + Send + Sync;
type CustomHandlerFn = dyn Fn(&Command) -> bool + Send + Sync;

/// Outcome of a completed `MAP_REQUEST`/`MAP_REPLY` round trip.
struct MapOutcome {
    object_id: ObjectId,
    version: ObjectVersion,
    bytes: Vec<u8>,
}

/// One in-flight mapping or one-shot sync request (§4.G
/// `map_object_nb`/`sync_object`).
struct PendingMap {
    object: Arc<dyn NodeManagedObject>,
    oneshot: bool,
    result: Mutex<Option<Result<MapOutcome>>>,
    condvar: Condvar,
}

/// A process's own peer identity plus everything that makes it
/// addressable: listeners, the multiplexed connection set, the peer
/// table, the object registry, the instance cache, and the three
/// worker threads of §5 (receiver, command, object-command).
pub struct LocalNode {
    id: NodeId,
    runtime: Runtime,
    settings: NodeSettings,
    observer: Arc<dyn NodeObserver>,
    listeners: RwLock<Vec<Arc<TcpListener>>>,
    conn_set: Arc<ConnectionSet>,
    peers: DashMap<NodeId, Arc<Peer>>,
    conn_peer: DashMap<u64, NodeId>,
    dispatcher: Arc<Dispatcher>,
    node_queue: Arc<crate::command::CommandQueue>,
    object_queue: Arc<crate::command::CommandQueue>,
    objects: DashMap<ObjectId, Arc<dyn NodeManagedObject>>,
    barriers: DashMap<ObjectId, Arc<Barrier>>,
    queue_masters: DashMap<ObjectId, Arc<QueueMaster>>,
    queue_slaves: DashMap<ObjectId, Arc<QueueSlave>>,
    instance_cache: Arc<InstanceCache>,
    pending_maps: DashMap<u64, Arc<PendingMap>>,
    next_request_id: AtomicU64,
    push_handlers: DashMap<u32, Arc<PushHandlerFn>>,
    shutdown: Arc<AtomicBool>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    handshake_cache: BufferCache,
}

impl LocalNode {
    /// Constructs a detached `LocalNode`: no listeners bound yet, no
    /// threads running. Call [`listen`](Self::listen) to start serving.
    pub fn new(runtime: Runtime, settings: NodeSettings) -> Arc<Self> {
        let observer = runtime.observer();
        let node = Arc::new(Self {
            id: NodeId::generate(),
            runtime,
            instance_cache: Arc::new(InstanceCache::new(settings.instance_cache_bytes)),
            settings,
            observer: observer.clone(),
            listeners: RwLock::new(Vec::new()),
            conn_set: ConnectionSet::new(),
            peers: DashMap::new(),
            conn_peer: DashMap::new(),
            dispatcher: Arc::new(Dispatcher::new(observer)),
            node_queue: Arc::new(crate::command::CommandQueue::new()),
            object_queue: Arc::new(crate::command::CommandQueue::new()),
            objects: DashMap::new(),
            barriers: DashMap::new(),
            queue_masters: DashMap::new(),
            queue_slaves: DashMap::new(),
            pending_maps: DashMap::new(),
            next_request_id: AtomicU64::new(1),
            push_handlers: DashMap::new(),
            shutdown: Arc::new(AtomicBool::new(false)),
            threads: Mutex::new(Vec::new()),
            handshake_cache: BufferCache::new(),
        });
        node.install_object_handlers();
        node
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn instance_cache(&self) -> Arc<InstanceCache> {
        self.instance_cache.clone()
    }

    pub fn settings(&self) -> &NodeSettings {
        &self.settings
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub fn peer(&self, id: NodeId) -> Option<Arc<Peer>> {
        self.peers.get(&id).map(|p| p.clone())
    }

    /// Registers the fixed (non-custom) object-layer routes: every
    /// `LocalNode` understands `MAP_REQUEST`/`MAP_REPLY`, `INSTANCE`,
    /// `OBJECT_PUSH` and the `Barrier`/queue opcodes regardless of
    /// which objects it happens to host, so these are wired once at
    /// construction rather than left for application code to register.
    fn install_object_handlers(self: &Arc<Self>) {
        let weak: Weak<LocalNode> = Arc::downgrade(self);
        let w = weak.clone();
        self.dispatcher.register(
            command_type::OBJECT,
            node_opcode::MAP_REQUEST,
            handler(move |cmd| w.upgrade().map(|n| n.handle_map_request(cmd)).unwrap_or(false)),
            Some(self.object_queue.clone()),
        );
        let w = weak.clone();
        self.dispatcher.register(
            command_type::OBJECT,
            node_opcode::MAP_REPLY,
            handler(move |cmd| w.upgrade().map(|n| n.handle_map_reply(cmd)).unwrap_or(false)),
            Some(self.object_queue.clone()),
        );
        let w = weak.clone();
        self.dispatcher.register(
            command_type::OBJECT,
            node_opcode::INSTANCE,
            handler(move |cmd| w.upgrade().map(|n| n.handle_instance(cmd)).unwrap_or(false)),
            Some(self.object_queue.clone()),
        );
        let w = weak.clone();
        self.dispatcher.register(
            command_type::OBJECT,
            node_opcode::OBJECT_PUSH,
            handler(move |cmd| w.upgrade().map(|n| n.handle_object_push(cmd)).unwrap_or(false)),
            Some(self.object_queue.clone()),
        );
        let w = weak.clone();
        self.dispatcher.register(
            command_type::OBJECT,
            node_opcode::BARRIER_ENTER,
            handler(move |cmd| w.upgrade().map(|n| n.handle_barrier_enter(cmd)).unwrap_or(false)),
            Some(self.object_queue.clone()),
        );
        let w = weak.clone();
        self.dispatcher.register(
            command_type::OBJECT,
            node_opcode::BARRIER_LEAVE,
            handler(move |cmd| w.upgrade().map(|n| n.handle_barrier_leave(cmd)).unwrap_or(false)),
            Some(self.object_queue.clone()),
        );
        let w = weak.clone();
        self.dispatcher.register(
            command_type::OBJECT,
            node_opcode::QUEUE_POP,
            handler(move |cmd| w.upgrade().map(|n| n.handle_queue_pop(cmd)).unwrap_or(false)),
            Some(self.object_queue.clone()),
        );
        let w = weak.clone();
        self.dispatcher.register(
            command_type::OBJECT,
            node_opcode::QUEUE_ITEM,
            handler(move |cmd| w.upgrade().map(|n| n.handle_queue_item(cmd)).unwrap_or(false)),
            Some(self.object_queue.clone()),
        );
        let w = weak;
        self.dispatcher.register(
            command_type::OBJECT,
            node_opcode::QUEUE_EMPTY,
            handler(move |cmd| w.upgrade().map(|n| n.handle_queue_empty(cmd)).unwrap_or(false)),
            Some(self.object_queue.clone()),
        );
    }

    // ---- listen / connect / handshake -----------------------------

    /// Binds each configured endpoint, registers its listener with the
    /// `ConnectionSet`, and starts the receiver/command/object-command
    /// threads (§4.G "Listen").
    pub fn listen(self: &Arc<Self>, descriptions: &[ConnectionDescription]) -> Result<()> {
        for desc in descriptions {
            if desc.kind != ConnectionType::Tcp {
                return Err(Error::Connect(format!(
                    "connection kind {:?} has no concrete transport in this crate",
                    desc.kind
                )));
            }
            let listener = Arc::new(TcpListener::bind((desc.hostname.as_str(), desc.port))?);
            self.conn_set.add_listener(listener.clone());
            self.listeners.write().push(listener);
        }
        self.spawn_threads();
        Ok(())
    }

    /// Address of the first bound listener; convenient for tests that
    /// bind to an ephemeral port.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listeners
            .read()
            .first()
            .ok_or_else(|| Error::Connect("no listener bound".into()))?
            .local_addr()
    }

    fn spawn_threads(self: &Arc<Self>) {
        let mut threads = self.threads.lock();

        let node = self.clone();
        threads.push(std::thread::spawn(move || node.receiver_loop()));

        let node = self.clone();
        threads.push(std::thread::spawn(move || node.command_loop(node.node_queue.clone(), node.dispatcher.clone())));

        let node = self.clone();
        threads.push(std::thread::spawn(move || node.command_loop(node.object_queue.clone(), node.dispatcher.clone())));
    }

    fn command_loop(&self, queue: Arc<crate::command::CommandQueue>, dispatcher: Arc<Dispatcher>) {
        while !self.shutdown.load(Ordering::Acquire) {
            if let Some(command) = queue.pop(Some(Duration::from_millis(200))) {
                dispatcher.invoke(&command);
            }
        }
    }

    fn receiver_loop(self: &Arc<Self>) {
        while !self.shutdown.load(Ordering::Acquire) {
            match self.conn_set.select(Some(Duration::from_millis(200))) {
                Event::Interrupt => {
                    if self.shutdown.load(Ordering::Acquire) {
                        return;
                    }
                }
                Event::Timeout | Event::Error(_) => {}
                Event::Accept(listener_id, conn) => {
                    let _ = listener_id;
                    if let Err(e) = self.complete_accept_handshake(conn) {
                        tracing::warn!(error = %e, "handshake failed for accepted connection");
                    }
                }
                Event::Data(conn_id, conn) => self.handle_data_event(conn_id, conn),
                Event::Disconnect(conn_id, conn) => self.handle_disconnect(conn_id, &conn),
            }
        }
    }

    fn handle_data_event(self: &Arc<Self>, conn_id: u64, conn: ConnectionHandle) {
        match crate::wire::read_frame(conn.as_ref(), &self.handshake_cache) {
            Ok((type_id, opcode, payload)) => {
                let originator = self.conn_peer.get(&conn_id).map(|e| *e).unwrap_or(self.id);
                let command = Command::new(type_id, opcode, payload, originator, self.id);
                self.dispatcher.dispatch(command);
            }
            Err(e) => {
                tracing::warn!(error = %e, "frame read failed, closing connection");
                conn.close();
                self.handle_disconnect(conn_id, &conn);
            }
        }
    }

    fn handle_disconnect(&self, conn_id: u64, conn: &ConnectionHandle) {
        conn.close();
        if let Some((_, peer_id)) = self.conn_peer.remove(&conn_id) {
            if let Some(peer) = self.peers.get(&peer_id) {
                peer.set_connection(None);
            }
            self.observer.peer_disconnected(peer_id);
        }
    }

    /// Opens the first reachable transport, then exchanges a
    /// `HANDSHAKE`/`CONNECT_ACK` pair bearing both NodeIDs (§4.G
    /// "Connect"). On success the connection is added to this node's
    /// `ConnectionSet` and the peer inserted into the peer table.
    pub fn connect(self: &Arc<Self>, desc: &ConnectionDescription) -> Result<NodeId> {
        if desc.kind != ConnectionType::Tcp {
            return Err(Error::Connect(format!("connection kind {:?} is not a concrete transport", desc.kind)));
        }
        let conn = Arc::new(TcpConnection::connect((desc.hostname.as_str(), desc.port))?);

        if !crate::wire::send_frame(conn.as_ref(), command_type::NODE, node_opcode::HANDSHAKE, &self.id.0.to_le_bytes())? {
            return Err(Error::Connect("handshake send failed".into()));
        }
        let (type_id, opcode, payload) = crate::wire::read_frame(conn.as_ref(), &self.handshake_cache)?;
        if type_id != command_type::NODE || opcode != node_opcode::CONNECT_ACK {
            return Err(Error::Protocol("expected CONNECT_ACK during handshake".into()));
        }
        let remote_bytes: [u8; 16] = payload.to_vec().try_into().map_err(|_| Error::Protocol("malformed CONNECT_ACK".into()))?;
        let remote_id = NodeId(u128::from_le_bytes(remote_bytes));

        self.adopt_connection(remote_id, conn, desc.clone());
        Ok(remote_id)
    }

    fn complete_accept_handshake(self: &Arc<Self>, conn: ConnectionHandle) -> Result<()> {
        let (type_id, opcode, payload) = crate::wire::read_frame(conn.as_ref(), &self.handshake_cache)?;
        if type_id != command_type::NODE || opcode != node_opcode::HANDSHAKE {
            return Err(Error::Protocol("expected HANDSHAKE from accepted connection".into()));
        }
        let remote_bytes: [u8; 16] = payload.to_vec().try_into().map_err(|_| Error::Protocol("malformed HANDSHAKE".into()))?;
        let remote_id = NodeId(u128::from_le_bytes(remote_bytes));

        if !crate::wire::send_frame(conn.as_ref(), command_type::NODE, node_opcode::CONNECT_ACK, &self.id.0.to_le_bytes())? {
            return Err(Error::Connect("handshake ack send failed".into()));
        }
        self.adopt_connection(remote_id, conn, ConnectionDescription::tcp("", 0));
        Ok(())
    }

    fn adopt_connection(&self, remote_id: NodeId, conn: ConnectionHandle, desc: ConnectionDescription) {
        let peer = self.peers.entry(remote_id).or_insert_with(|| Peer::new(remote_id, vec![desc])).clone();
        peer.set_connection(Some(conn.clone()));
        let conn_id = self.conn_set.add(conn);
        self.conn_peer.insert(conn_id, remote_id);
        self.observer.peer_connected(remote_id);
    }

    // ---- send ------------------------------------------------------

    /// Starts a framed send to `peer_id`. The returned builder flushes
    /// the frame atomically when [`NodeCommandBuilder::send`] is
    /// called (or, best-effort, on drop).
    pub fn send(&self, peer_id: NodeId, type_id: u32, opcode: u32) -> Result<NodeCommandBuilder> {
        let peer = self.peers.get(&peer_id).ok_or(Error::Disconnected(peer_id))?;
        let conn = peer.connection().ok_or(Error::Disconnected(peer_id))?;
        Ok(NodeCommandBuilder::new(conn, type_id, opcode))
    }

    /// Convenience for custom commands (§4.G, §8 scenario 4):
    /// `node.send_custom(peer, opcode)`.
    pub fn send_custom(&self, peer_id: NodeId, opcode: u32) -> Result<NodeCommandBuilder> {
        self.send(peer_id, command_type::CUSTOM, opcode)
    }

    /// Registers a handler for a custom opcode (§4.E/§7: unknown
    /// commands are dropped and logged, never fatal to the node).
    /// `inline` mirrors the dispatcher's `queue == null` contract: set
    /// it only for handlers that are non-blocking and brief.
    pub fn register_custom_handler(&self, opcode: u32, inline: bool, f: Arc<CustomHandlerFn>) {
        let queue = if inline { None } else { Some(self.node_queue.clone()) };
        self.dispatcher.register(command_type::CUSTOM, opcode, handler(move |c| f(c)), queue);
    }

    pub fn register_push_handler(&self, type_id: u32, f: Arc<PushHandlerFn>) {
        self.push_handlers.insert(type_id, f);
    }

    // ---- object registry --------------------------------------------

    /// Attaches an already-[`register`](crate::object::Distributable::register)ed
    /// master object to this node's registry so incoming
    /// `MAP_REQUEST`s can find it (§4.G `register_object`).
    pub fn register_object(&self, object: Arc<dyn NodeManagedObject>) -> Result<ObjectId> {
        let id = object.id().ok_or_else(|| Error::Protocol("object has no identifier; call Distributable::register first".into()))?;
        self.objects.insert(id, object);
        Ok(id)
    }

    /// Reciprocal teardown (§4.G `unmap_object`/`deregister_object`):
    /// drops the registry entry and erases any cached instance data.
    /// Does not touch the object's own role/identifier state — callers
    /// still call `Distributable::unmap`/`deregister` on their handle.
    pub fn forget_object(&self, id: ObjectId) {
        self.objects.remove(&id);
        self.instance_cache.erase(id);
    }

    /// Attaches a [`Barrier`] (master or mapped slave) so incoming
    /// `BARRIER_ENTER`/`BARRIER_LEAVE` commands can find it (§4.J).
    pub(crate) fn register_barrier(&self, id: ObjectId, barrier: Arc<Barrier>) {
        self.barriers.insert(id, barrier);
    }

    /// Attaches a [`QueueMaster`] so incoming `QUEUE_POP` commands can
    /// find it (§4.J).
    pub(crate) fn register_queue_master(&self, id: ObjectId, master: Arc<QueueMaster>) {
        self.queue_masters.insert(id, master);
    }

    /// Attaches a mapped [`QueueSlave`] so incoming `QUEUE_ITEM`/
    /// `QUEUE_EMPTY` commands can find it (§4.J).
    pub(crate) fn register_queue_slave(&self, id: ObjectId, slave: Arc<QueueSlave>) {
        self.queue_slaves.insert(id, slave);
    }

    /// Sends a non-blocking `MAP_REQUEST` to `master` for `object_id`
    /// at `version`, returning a request id to pass to
    /// [`map_object_sync`](Self::map_object_sync) (§4.G).
    pub fn map_object_nb(
        &self,
        master: NodeId,
        object_id: ObjectId,
        version: ObjectVersion,
        object: Arc<dyn NodeManagedObject>,
    ) -> Result<u64> {
        self.send_map_request(master, object_id, version, false, object)
    }

    /// Blocks until the mapping started by `map_object_nb` completes,
    /// applying the instance data and registering the object as an
    /// attached slave.
    pub fn map_object_sync(&self, request_id: u64, timeout: Option<Duration>) -> Result<ObjectId> {
        let (_version, object_id) = self.complete_map(request_id, timeout)?;
        Ok(object_id)
    }

    /// One-shot synchronize without a persistent mapping (§4.G
    /// `sync_object`): applies the master's current instance data to
    /// `object` but does not register it as a mapped slave, so the
    /// master never pushes further commits to it.
    pub fn sync_object(
        &self,
        master: NodeId,
        object_id: ObjectId,
        object: Arc<dyn NodeManagedObject>,
        timeout: Option<Duration>,
    ) -> Result<ObjectVersion> {
        let request_id = self.send_map_request(master, object_id, ObjectVersion::HEAD, true, object)?;
        let (version, _) = self.complete_map(request_id, timeout)?;
        Ok(version)
    }

    fn send_map_request(
        &self,
        master: NodeId,
        object_id: ObjectId,
        version: ObjectVersion,
        oneshot: bool,
        object: Arc<dyn NodeManagedObject>,
    ) -> Result<u64> {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        self.pending_maps.insert(
            request_id,
            Arc::new(PendingMap { object, oneshot, result: Mutex::new(None), condvar: Condvar::new() }),
        );

        let mut builder = self.send(master, command_type::OBJECT, node_opcode::MAP_REQUEST)?;
        builder
            .write_u128(self.id.0)
            .write_u64(request_id)
            .write_u128(object_id.0)
            .write_u128(version.0)
            .write_bool(oneshot);
        builder.send()?;
        Ok(request_id)
    }

    fn complete_map(&self, request_id: u64, timeout: Option<Duration>) -> Result<(ObjectVersion, ObjectId)> {
        let pending = self.pending_maps.get(&request_id).map(|p| p.clone()).ok_or(Error::Timeout)?;
        let mut guard = pending.result.lock();
        if guard.is_none() {
            match timeout {
                Some(t) => {
                    pending.condvar.wait_for(&mut guard, t);
                }
                None => pending.condvar.wait(&mut guard),
            };
            if guard.is_none() {
                return Err(Error::Timeout);
            }
        }
        let outcome = guard.take().unwrap()?;
        drop(guard);
        self.pending_maps.remove(&request_id);

        pending.object.attach_as_slave(outcome.object_id, &outcome.bytes, outcome.version)?;
        if !pending.oneshot {
            self.objects.insert(outcome.object_id, pending.object.clone());
        }
        Ok((outcome.version, outcome.object_id))
    }

    /// Proactive push of instance data to a set of remote nodes without
    /// a prior map request (§4.H `push`); receivers dispatch to any
    /// handler registered for `type_id` via
    /// [`register_push_handler`](Self::register_push_handler).
    pub fn push(&self, object_id: ObjectId, group_id: u32, type_id: u32, targets: &[NodeId], bytes: &[u8]) -> Result<()> {
        for target in targets {
            let mut builder = self.send(*target, command_type::OBJECT, node_opcode::OBJECT_PUSH)?;
            builder
                .write_u32(group_id)
                .write_u32(type_id)
                .write_u128(object_id.0)
                .write_bytes(bytes);
            builder.send()?;
        }
        Ok(())
    }

    // ---- object-layer command handlers -------------------------------

    fn handle_map_request(&self, command: &Command) -> bool {
        let mut is = command.istream();
        let (Ok(_requester), Ok(request_id), Ok(object_id), Ok(version), Ok(oneshot)) =
            (is.read_u128(), is.read_u64(), is.read_u128(), is.read_u128(), is.read_bool())
        else {
            return false;
        };
        let object_id = ObjectId(object_id);
        let requested = ObjectVersion(version);

        let reply = match self.objects.get(&object_id) {
            Some(object) => match object.instance_data_for_mapping(requested) {
                Ok(bytes) => {
                    let served_version = if requested == ObjectVersion::HEAD { object.get_version() } else { requested };
                    if !oneshot {
                        if let Some(peer) = self.peers.get(&command.originator) {
                            if let Some(conn) = peer.connection() {
                                object.add_mapped_slave(conn);
                            }
                        }
                    }
                    Some((served_version, bytes))
                }
                Err(_) => None,
            },
            None => None,
        };

        match self.send(command.originator, command_type::OBJECT, node_opcode::MAP_REPLY) {
            Ok(mut builder) => {
                builder.write_u64(request_id);
                match reply {
                    Some((version, bytes)) => {
                        builder.write_bool(true).write_u128(object_id.0).write_u128(version.0).write_bytes(&bytes);
                    }
                    None => {
                        builder
                            .write_bool(false)
                            .write_u128(object_id.0)
                            .write_u128(ObjectVersion::INVALID.0)
                            .write_bytes(&[]);
                    }
                }
                builder.send().is_ok()
            }
            Err(_) => false,
        }
    }

    fn handle_map_reply(&self, command: &Command) -> bool {
        let mut is = command.istream();
        let (Ok(request_id), Ok(ok), Ok(object_id), Ok(version), Ok(bytes)) =
            (is.read_u64(), is.read_bool(), is.read_u128(), is.read_u128(), is.read_bytes())
        else {
            return false;
        };
        let Some(pending) = self.pending_maps.get(&request_id).map(|p| p.clone()) else {
            return false;
        };
        let object_id = ObjectId(object_id);
        let outcome = if ok {
            Ok(MapOutcome { object_id, version: ObjectVersion(version), bytes })
        } else {
            Err(Error::VersionUnavailable(object_id))
        };
        *pending.result.lock() = Some(outcome);
        pending.condvar.notify_all();
        true
    }

    fn handle_instance(&self, command: &Command) -> bool {
        let payload = command.payload.to_vec();
        if payload.len() < 32 {
            return false;
        }
        let versioned = crate::ids::VersionedId::from_bytes(&payload[0..32].try_into().unwrap());
        match self.objects.get(&versioned.id) {
            Some(object) => object.apply_wire_update(versioned.version, &payload[32..]).is_ok(),
            None => false,
        }
    }

    fn handle_object_push(&self, command: &Command) -> bool {
        let mut is = command.istream();
        let (Ok(group_id), Ok(type_id), Ok(object_id), Ok(bytes)) =
            (is.read_u32(), is.read_u32(), is.read_u128(), is.read_bytes())
        else {
            return false;
        };
        match self.push_handlers.get(&type_id) {
            Some(handler) => {
                handler(command.originator, group_id, ObjectId(object_id), DataIStream::from_bytes(bytes));
                true
            }
            None => false,
        }
    }

    /// Master-side: a remote slave's `enter()` arrived (§4.J).
    fn handle_barrier_enter(&self, command: &Command) -> bool {
        let mut is = command.istream();
        let Ok(object_id) = is.read_u128() else {
            return false;
        };
        let Some(barrier) = self.barriers.get(&ObjectId(object_id)).map(|b| b.clone()) else {
            return false;
        };
        let Some(conn) = self.peers.get(&command.originator).and_then(|p| p.connection()) else {
            return false;
        };
        barrier.remote_arrive(conn);
        true
    }

    /// Slave-side: the master released this round (§4.J).
    fn handle_barrier_leave(&self, command: &Command) -> bool {
        let mut is = command.istream();
        let Ok(object_id) = is.read_u128() else {
            return false;
        };
        let Some(barrier) = self.barriers.get(&ObjectId(object_id)).map(|b| b.clone()) else {
            return false;
        };
        barrier.remote_leave();
        true
    }

    /// Master-side: a remote slave's `pop()` is asking for the next
    /// item (§4.J). Replies immediately with `QUEUE_ITEM`/`QUEUE_EMPTY`
    /// or registers the connection as a waiting popper.
    fn handle_queue_pop(&self, command: &Command) -> bool {
        let mut is = command.istream();
        let Ok(object_id) = is.read_u128() else {
            return false;
        };
        let object_id = ObjectId(object_id);
        let Some(master) = self.queue_masters.get(&object_id).map(|m| m.clone()) else {
            return false;
        };
        let Some(conn) = self.peers.get(&command.originator).and_then(|p| p.connection()) else {
            return false;
        };
        match master.on_pop_request(conn.clone()) {
            PopOutcome::Item(bytes) => {
                let mut payload = object_id.0.to_le_bytes().to_vec();
                payload.extend_from_slice(&bytes);
                crate::wire::send_frame(conn.as_ref(), command_type::OBJECT, node_opcode::QUEUE_ITEM, &payload).is_ok()
            }
            PopOutcome::Empty => {
                crate::wire::send_frame(conn.as_ref(), command_type::OBJECT, node_opcode::QUEUE_EMPTY, &object_id.0.to_le_bytes()).is_ok()
            }
            PopOutcome::Registered => true,
        }
    }

    /// Slave-side: an item the master popped for us (§4.J). The payload
    /// is `(object_id, item_bytes)` with `item_bytes` unprefixed — the
    /// master hands it over exactly as `QueuePush` committed it.
    fn handle_queue_item(&self, command: &Command) -> bool {
        let payload = command.payload.to_vec();
        if payload.len() < 16 {
            return false;
        }
        let object_id = ObjectId(u128::from_le_bytes(payload[0..16].try_into().unwrap()));
        match self.queue_slaves.get(&object_id) {
            Some(slave) => {
                slave.deliver_item(payload[16..].to_vec());
                true
            }
            None => false,
        }
    }

    /// Slave-side: the master's queue is closed and drained (§4.J).
    fn handle_queue_empty(&self, command: &Command) -> bool {
        let mut is = command.istream();
        let Ok(object_id) = is.read_u128() else {
            return false;
        };
        match self.queue_slaves.get(&ObjectId(object_id)) {
            Some(slave) => {
                slave.deliver_empty();
                true
            }
            None => false,
        }
    }

    // ---- shutdown ----------------------------------------------------

    /// Interrupts the `ConnectionSet`, stops the worker threads and
    /// closes every connection (§5: "destruction of a `LocalNode`
    /// requires prior `close()`").
    pub fn close(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.conn_set.interrupt();
        for thread in self.threads.lock().drain(..) {
            let _ = thread.join();
        }
        for peer in self.peers.iter() {
            if let Some(conn) = peer.connection() {
                conn.close();
            }
        }
    }
}

impl Drop for LocalNode {
    fn drop(&mut self) {
        if !self.shutdown.load(Ordering::Acquire) {
            self.close();
        }
    }
}

fn handler(f: impl Fn(&Command) -> bool + Send + Sync + 'static) -> Handler {
    Arc::new(f)
}
