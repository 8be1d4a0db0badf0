use std::sync::mpsc::{self, Receiver, Sender};
use std::time::Duration;

use super::Command;

/// MPSC FIFO consumed by exactly one thread (§4.F). Built directly on
/// `std::sync::mpsc`, which already gives the blocking
/// `pop(timeout)`/non-blocking `try_pop()` contract the spec asks for,
/// without pulling in a channel crate the teacher's stack does not
/// otherwise use.
pub struct CommandQueue {
    tx: Sender<Command>,
    rx: parking_lot::Mutex<Receiver<Command>>,
    len: std::sync::atomic::AtomicUsize,
}

impl CommandQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self { tx, rx: parking_lot::Mutex::new(rx), len: std::sync::atomic::AtomicUsize::new(0) }
    }

    pub fn push(&self, command: Command) {
        self.len.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        // The receiver can only ever be dropped alongside this queue
        // itself, so a send error here would mean `self` is being torn
        // down concurrently with a push — not a case the single-queue,
        // single-consumer contract allows.
        let _ = self.tx.send(command);
    }

    /// Blocks up to `timeout` (or forever if `None`) for the next
    /// command.
    pub fn pop(&self, timeout: Option<Duration>) -> Option<Command> {
        let rx = self.rx.lock();
        let item = match timeout {
            Some(t) => rx.recv_timeout(t).ok(),
            None => rx.recv().ok(),
        };
        if item.is_some() {
            self.len.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
        }
        item
    }

    pub fn try_pop(&self) -> Option<Command> {
        let item = self.rx.lock().try_recv().ok();
        if item.is_some() {
            self.len.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
        }
        item
    }

    /// Weak indicator: may race with a concurrent push (§4.F).
    pub fn is_empty(&self) -> bool {
        self.len.load(std::sync::atomic::Ordering::SeqCst) == 0
    }
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::Buffer;
    use crate::ids::NodeId;

    fn sample() -> Command {
        Command::new(0, 0, Buffer::detached(0), NodeId::generate(), NodeId::generate())
    }

    #[test]
    fn fifo_pop_blocks_until_pushed() {
        let q = std::sync::Arc::new(CommandQueue::new());
        assert!(q.is_empty());
        let q2 = q.clone();
        let handle = std::thread::spawn(move || q2.pop(Some(Duration::from_secs(2))));
        std::thread::sleep(Duration::from_millis(20));
        q.push(sample());
        assert!(handle.join().unwrap().is_some());
    }

    #[test]
    fn try_pop_never_blocks() {
        let q = CommandQueue::new();
        assert!(q.try_pop().is_none());
    }
}
