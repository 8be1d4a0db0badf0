use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Condvar, Mutex, RwLock};

use crate::command::{command_type, node_opcode};
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::ids::{NodeId, ObjectId};
use crate::node::LocalNode;
use crate::stream::DataOStream;

struct State {
    items: VecDeque<Vec<u8>>,
    closed: bool,
    /// Remote connections whose `QUEUE_POP` found nothing to deliver
    /// yet; the next [`QueueMaster::enqueue`] or
    /// [`QueueMaster::close`] drains this FIFO before touching `items`.
    waiting_poppers: VecDeque<Arc<dyn Connection>>,
}

/// Outcome of a remote `QUEUE_POP` request, resolved by `LocalNode`'s
/// `QUEUE_POP` handler into an immediate `QUEUE_ITEM`/`QUEUE_EMPTY`
/// reply or a deferred entry in `waiting_poppers`.
pub(crate) enum PopOutcome {
    Item(Vec<u8>),
    Empty,
    Registered,
}

/// Master side of a work-queue object (§4.J). FIFO, at-most-once
/// delivery: whichever `QueueSlave::pop` polls first consumes an item.
///
/// A bare `QueueMaster::new` with no [`register`](Self::register) call
/// behaves as a pure in-process queue, shared with a `QueueSlave` via a
/// cloned `Arc`. Calling `register` attaches it to a [`LocalNode`] so a
/// remote [`QueueSlave::map`] can reach it over `QUEUE_POP`/
/// `QUEUE_ITEM`/`QUEUE_EMPTY` (§6).
pub struct QueueMaster {
    state: Mutex<State>,
    condvar: Condvar,
    id: RwLock<Option<ObjectId>>,
}

impl QueueMaster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State { items: VecDeque::new(), closed: false, waiting_poppers: VecDeque::new() }),
            condvar: Condvar::new(),
            id: RwLock::new(None),
        })
    }

    pub fn id(&self) -> Option<ObjectId> {
        *self.id.read()
    }

    /// Registers this queue as a master-held distributed object on
    /// `node` (§4.H lifecycle 2), assigning it a fresh identifier so a
    /// remote [`QueueSlave::map`] can reach it.
    pub fn register(self: &Arc<Self>, node: &Arc<LocalNode>) -> ObjectId {
        let object_id = ObjectId::generate();
        *self.id.write() = Some(object_id);
        node.register_queue_master(object_id, self.clone());
        object_id
    }

    /// `push()` hands back a `DataOStream`; call [`QueuePush::commit`]
    /// (or simply drop it) to serialize it and enqueue one item, waking
    /// a waiting popper — local or remote.
    pub fn push(self: &Arc<Self>) -> QueuePush {
        QueuePush { master: self.clone(), stream: DataOStream::new(), committed: false }
    }

    pub fn close(&self) {
        let waiters = {
            let mut guard = self.state.lock();
            guard.closed = true;
            self.condvar.notify_all();
            std::mem::take(&mut guard.waiting_poppers)
        };
        let Some(id) = *self.id.read() else { return };
        for conn in waiters {
            let _ = crate::wire::send_frame(conn.as_ref(), command_type::OBJECT, node_opcode::QUEUE_EMPTY, &id.0.to_le_bytes());
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    fn enqueue(&self, bytes: Vec<u8>) {
        let waiting = {
            let mut guard = self.state.lock();
            guard.waiting_poppers.pop_front()
        };
        match waiting {
            Some(conn) => self.send_item(&conn, bytes),
            None => {
                let mut guard = self.state.lock();
                guard.items.push_back(bytes);
                self.condvar.notify_one();
            }
        }
    }

    fn send_item(&self, conn: &Arc<dyn Connection>, bytes: Vec<u8>) {
        let Some(id) = *self.id.read() else { return };
        let mut payload = id.0.to_le_bytes().to_vec();
        payload.extend_from_slice(&bytes);
        let _ = crate::wire::send_frame(conn.as_ref(), command_type::OBJECT, node_opcode::QUEUE_ITEM, &payload);
    }

    fn try_pop(&self) -> Option<Vec<u8>> {
        self.state.lock().items.pop_front()
    }

    fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn wait(&self, guard: &mut parking_lot::MutexGuard<'_, State>, timeout: Option<Duration>) -> bool {
        match timeout {
            Some(t) => self.condvar.wait_for(guard, t).timed_out(),
            None => {
                self.condvar.wait(guard);
                false
            }
        }
    }

    /// Called by `LocalNode`'s `QUEUE_POP` handler when a remote slave
    /// asks for the next item. Either resolves immediately (an item is
    /// ready, or the queue is closed and empty) or registers `conn` to
    /// be served by the next [`enqueue`](Self::enqueue)/
    /// [`close`](Self::close).
    pub(crate) fn on_pop_request(&self, conn: Arc<dyn Connection>) -> PopOutcome {
        let mut guard = self.state.lock();
        if let Some(bytes) = guard.items.pop_front() {
            return PopOutcome::Item(bytes);
        }
        if guard.closed {
            return PopOutcome::Empty;
        }
        guard.waiting_poppers.push_back(conn);
        PopOutcome::Registered
    }
}

/// Open output stream from [`QueueMaster::push`]; writes accumulate
/// until [`commit`](Self::commit), or until the `QueuePush` is dropped
/// without one — `Drop` enqueues whatever was written so far, the same
/// best-effort-flush-on-drop contract as [`crate::node::NodeCommandBuilder`].
pub struct QueuePush {
    master: Arc<QueueMaster>,
    stream: DataOStream,
    committed: bool,
}

impl QueuePush {
    pub fn write_u8(&mut self, v: u8) -> &mut Self {
        self.stream.write_u8(v);
        self
    }

    pub fn write_bool(&mut self, v: bool) -> &mut Self {
        self.stream.write_bool(v);
        self
    }

    pub fn write_u32(&mut self, v: u32) -> &mut Self {
        self.stream.write_u32(v);
        self
    }

    pub fn write_u64(&mut self, v: u64) -> &mut Self {
        self.stream.write_u64(v);
        self
    }

    pub fn write_f32(&mut self, v: f32) -> &mut Self {
        self.stream.write_f32(v);
        self
    }

    pub fn write_str(&mut self, s: &str) -> &mut Self {
        self.stream.write_str(s);
        self
    }

    pub fn commit(mut self) {
        self.committed = true;
        self.master.enqueue(std::mem::take(&mut self.stream).finish());
    }
}

impl Drop for QueuePush {
    fn drop(&mut self) {
        if !self.committed {
            self.committed = true;
            self.master.enqueue(std::mem::take(&mut self.stream).finish());
        }
    }
}

/// An item popped from a [`QueueSlave`], positioned for sequential
/// reads the same way a received [`crate::command::Command`]'s payload
/// is read. A `pop` against a closed, empty queue (§4.J) yields an
/// `invalid` item rather than blocking forever or erroring, mirroring
/// how the node layer's opcode dispatch represents "no command" (the
/// reserved `node_opcode` range has no `INVALID` entry because this is
/// an object-layer, not wire-layer, sentinel).
pub struct QueueItem {
    istream: Option<crate::stream::DataIStream>,
}

impl QueueItem {
    fn new(bytes: Vec<u8>) -> Self {
        Self { istream: Some(crate::stream::DataIStream::from_bytes(bytes)) }
    }

    fn invalid() -> Self {
        Self { istream: None }
    }

    pub fn is_invalid(&self) -> bool {
        self.istream.is_none()
    }

    pub fn istream(&mut self) -> &mut crate::stream::DataIStream {
        self.istream.as_mut().expect("invalid queue item has no payload")
    }
}

struct Mailbox {
    items: VecDeque<Vec<u8>>,
    closed: bool,
}

/// State backing a slave mapped to a remote master ([`QueueSlave::map`]):
/// the connection to send `QUEUE_POP` on, and the local mailbox
/// `LocalNode` delivers `QUEUE_ITEM`/`QUEUE_EMPTY` into.
struct RemoteSlave {
    node: Weak<LocalNode>,
    master_peer: NodeId,
    object_id: ObjectId,
    mailbox: Mutex<Mailbox>,
    condvar: Condvar,
}

enum SlaveMode {
    /// Shares the master's `Arc` in-process; `pop` drives it directly.
    Local(Arc<QueueMaster>),
    /// Mapped to a remote master over a `LocalNode` (§4.H lifecycle 3).
    Remote(RemoteSlave),
}

/// Handle to a queue object's consuming side. Constructed with
/// [`new`](Self::new) for an in-process master, or [`map`](Self::map)
/// to attach to a remote one.
pub struct QueueSlave {
    mode: SlaveMode,
}

impl QueueSlave {
    pub fn new(master: Arc<QueueMaster>) -> Self {
        Self { mode: SlaveMode::Local(master) }
    }

    /// Attaches to `master`'s `object_id` on `node` (§4.H lifecycle 3):
    /// `pop` now sends `QUEUE_POP` and waits for `QUEUE_ITEM`/
    /// `QUEUE_EMPTY` to arrive via `LocalNode`'s dispatch rather than
    /// polling a shared `Arc` directly.
    pub fn map(node: &Arc<LocalNode>, master: NodeId, object_id: ObjectId) -> Arc<Self> {
        let slave = Arc::new(Self {
            mode: SlaveMode::Remote(RemoteSlave {
                node: Arc::downgrade(node),
                master_peer: master,
                object_id,
                mailbox: Mutex::new(Mailbox { items: VecDeque::new(), closed: false }),
                condvar: Condvar::new(),
            }),
        });
        node.register_queue_slave(object_id, slave.clone());
        slave
    }

    /// Blocks until an item is available or the queue closes with
    /// nothing left, in which case it returns an
    /// [`invalid`](QueueItem::is_invalid) item. Only a live `timeout`
    /// with neither condition met is a hard error.
    pub fn pop(&self, timeout: Option<Duration>) -> Result<QueueItem> {
        match &self.mode {
            SlaveMode::Local(master) => Self::pop_local(master, timeout),
            SlaveMode::Remote(remote) => Self::pop_remote(remote, timeout),
        }
    }

    fn pop_local(master: &Arc<QueueMaster>, timeout: Option<Duration>) -> Result<QueueItem> {
        if let Some(bytes) = master.try_pop() {
            return Ok(QueueItem::new(bytes));
        }
        let mut guard = master.state.lock();
        loop {
            if let Some(bytes) = guard.items.pop_front() {
                return Ok(QueueItem::new(bytes));
            }
            if guard.closed {
                return Ok(QueueItem::invalid());
            }
            let timed_out = master.wait(&mut guard, timeout);
            if timed_out {
                if let Some(bytes) = guard.items.pop_front() {
                    return Ok(QueueItem::new(bytes));
                }
                return if guard.closed { Ok(QueueItem::invalid()) } else { Err(Error::Timeout) };
            }
        }
    }

    fn pop_remote(remote: &RemoteSlave, timeout: Option<Duration>) -> Result<QueueItem> {
        {
            let guard = remote.mailbox.lock();
            if guard.closed && guard.items.is_empty() {
                return Ok(QueueItem::invalid());
            }
        }
        let mut guard = remote.mailbox.lock();
        if let Some(bytes) = guard.items.pop_front() {
            return Ok(QueueItem::new(bytes));
        }
        drop(guard);

        let node = remote.node.upgrade().ok_or(Error::Disconnected(remote.master_peer))?;
        let mut builder = node.send(remote.master_peer, command_type::OBJECT, node_opcode::QUEUE_POP)?;
        builder.write_u128(remote.object_id.0);
        builder.send()?;

        let mut guard = remote.mailbox.lock();
        loop {
            if let Some(bytes) = guard.items.pop_front() {
                return Ok(QueueItem::new(bytes));
            }
            if guard.closed {
                return Ok(QueueItem::invalid());
            }
            let timed_out = match timeout {
                Some(t) => remote.condvar.wait_for(&mut guard, t).timed_out(),
                None => {
                    remote.condvar.wait(&mut guard);
                    false
                }
            };
            if timed_out {
                if let Some(bytes) = guard.items.pop_front() {
                    return Ok(QueueItem::new(bytes));
                }
                return if guard.closed { Ok(QueueItem::invalid()) } else { Err(Error::Timeout) };
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        match &self.mode {
            SlaveMode::Local(master) => master.is_closed(),
            SlaveMode::Remote(remote) => remote.mailbox.lock().closed,
        }
    }

    /// Called by `LocalNode`'s `QUEUE_ITEM` handler.
    pub(crate) fn deliver_item(&self, bytes: Vec<u8>) {
        if let SlaveMode::Remote(remote) = &self.mode {
            let mut guard = remote.mailbox.lock();
            guard.items.push_back(bytes);
            remote.condvar.notify_one();
        }
    }

    /// Called by `LocalNode`'s `QUEUE_EMPTY` handler.
    pub(crate) fn deliver_empty(&self) {
        if let SlaveMode::Remote(remote) = &self.mode {
            let mut guard = remote.mailbox.lock();
            guard.closed = true;
            remote.condvar.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fan_out_four_items_then_closed_queue_yields_none() {
        let master = QueueMaster::new();
        master.push().commit();
        master.push().write_u32(42).commit();
        {
            let mut p = master.push();
            p.write_str("hallo");
            p.commit();
        }
        {
            let mut p = master.push();
            p.write_f32(1.5).write_bool(false).write_u64(crate::ids::ObjectVersion::FIRST.0 as u64);
            p.commit();
        }

        let slave = QueueSlave::new(master.clone());
        assert!(!slave.pop(Some(Duration::from_secs(1))).unwrap().is_invalid());
        let mut second = slave.pop(Some(Duration::from_secs(1))).unwrap();
        assert_eq!(second.istream().read_u32().unwrap(), 42);
        let mut third = slave.pop(Some(Duration::from_secs(1))).unwrap();
        assert_eq!(third.istream().read_string().unwrap(), "hallo");
        let mut fourth = slave.pop(Some(Duration::from_secs(1))).unwrap();
        assert_eq!(fourth.istream().read_f32().unwrap(), 1.5);
        assert_eq!(fourth.istream().read_bool().unwrap(), false);
        assert_eq!(fourth.istream().read_u64().unwrap(), 1);

        master.close();
        assert!(slave.pop(Some(Duration::from_secs(1))).unwrap().is_invalid());
    }

    #[test]
    fn two_slaves_never_receive_the_same_item() {
        let master = QueueMaster::new();
        for i in 0..10u32 {
            master.push().write_u32(i).commit();
        }
        master.close();

        let s1 = QueueSlave::new(master.clone());
        let s2 = QueueSlave::new(master.clone());
        let mut seen = Vec::new();
        loop {
            let mut item = s1.pop(Some(Duration::from_millis(50))).unwrap();
            if item.is_invalid() {
                break;
            }
            seen.push(item.istream().read_u32().unwrap());
        }
        loop {
            let mut item = s2.pop(Some(Duration::from_millis(50))).unwrap();
            if item.is_invalid() {
                break;
            }
            seen.push(item.istream().read_u32().unwrap());
        }
        seen.sort_unstable();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn push_without_commit_still_enqueues_on_drop() {
        let master = QueueMaster::new();
        {
            let mut p = master.push();
            p.write_u32(7);
            // dropped without calling commit()
        }
        let slave = QueueSlave::new(master.clone());
        let mut item = slave.pop(Some(Duration::from_millis(500))).unwrap();
        assert_eq!(item.istream().read_u32().unwrap(), 7);
    }
}
