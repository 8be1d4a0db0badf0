//! Abstract bidirectional byte stream (spec §4.A).
//!
//! `Connection` is the one seam the spec asks us to specify purely
//! through its interface: concrete transport drivers (TCP, named pipe,
//! RDMA) are "external collaborators" (§1 Non-goals). This crate ships
//! exactly one concrete implementation, [`tcp::TcpConnection`], as a
//! reference — grounded in the teacher's `spark-transport-tcp` listener
//! / channel split, written against blocking `std::net` sockets instead
//! of Tokio (see `DESIGN.md` for why).

mod buffer_connection;
mod set;
mod tcp;

pub use buffer_connection::BufferConnection;
pub use set::{ConnectionSet, Event};
pub use tcp::{TcpConnection, TcpListener};

use crate::buffer::Buffer;
use crate::error::Result;
use std::sync::Arc;
use std::time::Duration;

/// Lifecycle state of a `Connection` (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Closed,
    Connecting,
    Connected,
    Listening,
    Closing,
}

/// A half-open or full-open byte stream.
///
/// Contract: sends are serialized by the connection's own send-lock
/// (acquired for the duration of one logical frame via
/// [`lock_send`](Connection::lock_send)); receives are performed by a
/// single owning thread. `send` must retry internally on partial writes
/// until the full byte count is delivered or the connection fails —
/// implementations must never return `Ok` having written less than
/// requested.
pub trait Connection: Send + Sync {
    fn state(&self) -> ConnectionState;

    /// Acquire the send-lock for one logical frame. Holders must call
    /// `send` one or more times while holding the returned guard and
    /// then drop it; the guard's `Drop` releases the lock.
    fn lock_send(&self) -> Box<dyn SendGuard + '_>;

    /// Blocking, full-frame non-blocking receive check: returns
    /// `Ok(true)` if at least `n` bytes were read into `buf`, `Ok(false)`
    /// if the connection has no data ready (non-blocking mode only).
    fn recv_nonblocking(&self, buf: &Buffer, n: usize) -> Result<bool>;

    /// Blocking receive of exactly `n` bytes into `buf`.
    fn recv_sync(&self, buf: &Buffer, n: usize) -> Result<()>;

    fn close(&self);

    /// A name useful for logs/diagnostics; not part of the protocol.
    fn describe(&self) -> String;

    /// Block until at least one byte is available to read without
    /// consuming it, or `timeout` elapses. Used by [`ConnectionSet`]'s
    /// per-connection reader threads to implement `select`. Connections
    /// that never receive (e.g. [`BufferConnection`]) may always
    /// return `Ok(false)`.
    fn wait_readable(&self, timeout: Option<Duration>) -> Result<bool> {
        let _ = timeout;
        Ok(false)
    }
}

/// RAII guard bracketing one logical frame's worth of `send` calls.
pub trait SendGuard {
    /// Write `data` fully, retrying partial writes internally. Returns
    /// `Ok(false)` only on a hard I/O error (the connection is then
    /// transitioned to `Closing`/`Closed` by the caller).
    fn send(&mut self, data: &[u8]) -> Result<bool>;
}

/// Convenience: write a complete frame (possibly composed of several
/// fragments) under one send-lock acquisition.
pub fn send_framed(conn: &dyn Connection, fragments: &[&[u8]]) -> Result<bool> {
    let mut guard = conn.lock_send();
    for frag in fragments {
        if !guard.send(frag)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Shared handle to any `Connection` implementation, as stored in peer
/// tables and `ConnectionSet`s.
pub type ConnectionHandle = Arc<dyn Connection>;

/// Blocking-with-timeout helper shared by several suspension points in
/// §5 (`recv_sync`, `select`, `pop`, ...). `f` is polled in a tight loop
/// with a short backoff; real transports should prefer a native
/// blocking primitive where available (the TCP implementation does).
pub(crate) fn poll_until<T>(
    timeout: Option<Duration>,
    mut f: impl FnMut() -> Option<T>,
) -> Option<T> {
    let start = std::time::Instant::now();
    loop {
        if let Some(v) = f() {
            return Some(v);
        }
        if let Some(timeout) = timeout {
            if start.elapsed() >= timeout {
                return None;
            }
        }
        std::thread::sleep(Duration::from_millis(1));
    }
}
