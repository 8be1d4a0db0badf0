//! Blocking TCP connection, the one concrete transport shipped with
//! this crate. Grounded in `spark-transport-tcp`'s listener/channel
//! split (bind → accept → wrap in a channel type), but written against
//! `std::net` blocking sockets: the spec's receiver-thread model (§5)
//! blocks in `recv_sync`/`select` on purpose, so there is no use for an
//! async runtime here, unlike the teacher's Tokio-based transport.

use std::io::{Read, Write};
use std::net::{TcpListener as StdTcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;

use parking_lot::Mutex;

use super::{Connection, ConnectionState, SendGuard};
use crate::buffer::Buffer;
use crate::error::{Error, Result};

pub struct TcpConnection {
    stream: Mutex<TcpStream>,
    send_lock: Mutex<()>,
    state: parking_lot::RwLock<ConnectionState>,
    peer_desc: String,
}

impl TcpConnection {
    pub fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        let stream = TcpStream::connect(addr).map_err(Error::Io)?;
        stream.set_nodelay(true).ok();
        let peer_desc = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "<unknown>".into());
        Ok(Self {
            stream: Mutex::new(stream),
            send_lock: Mutex::new(()),
            state: parking_lot::RwLock::new(ConnectionState::Connected),
            peer_desc,
        })
    }

    pub(crate) fn from_stream(stream: TcpStream) -> Result<Self> {
        stream.set_nodelay(true).ok();
        let peer_desc = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "<unknown>".into());
        Ok(Self {
            stream: Mutex::new(stream),
            send_lock: Mutex::new(()),
            state: parking_lot::RwLock::new(ConnectionState::Connected),
            peer_desc,
        })
    }
}

struct TcpSendGuard<'a> {
    conn: &'a TcpConnection,
    _held: parking_lot::MutexGuard<'a, ()>,
}

impl<'a> SendGuard for TcpSendGuard<'a> {
    fn send(&mut self, mut data: &[u8]) -> Result<bool> {
        let mut stream = self.conn.stream.lock();
        while !data.is_empty() {
            match stream.write(data) {
                Ok(0) => {
                    *self.conn.state.write() = ConnectionState::Closing;
                    return Ok(false);
                }
                Ok(n) => data = &data[n..],
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(_) => {
                    *self.conn.state.write() = ConnectionState::Closing;
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }
}

impl Connection for TcpConnection {
    fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    fn lock_send(&self) -> Box<dyn SendGuard + '_> {
        Box::new(TcpSendGuard { conn: self, _held: self.send_lock.lock() })
    }

    fn recv_nonblocking(&self, buf: &Buffer, n: usize) -> Result<bool> {
        let mut stream = self.stream.lock();
        stream.set_nonblocking(true).ok();
        let mut tmp = vec![0u8; n];
        let result = stream.read_exact(&mut tmp);
        stream.set_nonblocking(false).ok();
        match result {
            Ok(()) => {
                buf.extend_from_slice(&tmp);
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(false),
            Err(e) => {
                *self.state.write() = ConnectionState::Closing;
                Err(Error::Io(e))
            }
        }
    }

    fn recv_sync(&self, buf: &Buffer, n: usize) -> Result<()> {
        let mut tmp = vec![0u8; n];
        {
            let mut stream = self.stream.lock();
            if let Err(e) = stream.read_exact(&mut tmp) {
                *self.state.write() = ConnectionState::Closing;
                return Err(Error::Io(e));
            }
        }
        buf.extend_from_slice(&tmp);
        Ok(())
    }

    fn close(&self) {
        let stream = self.stream.lock();
        stream.shutdown(std::net::Shutdown::Both).ok();
        *self.state.write() = ConnectionState::Closed;
    }

    fn describe(&self) -> String {
        format!("tcp://{}", self.peer_desc)
    }

    fn wait_readable(&self, timeout: Option<std::time::Duration>) -> Result<bool> {
        let mut peek = [0u8; 1];
        let found = crate::connection::poll_until(timeout, || {
            let stream = self.stream.lock();
            match stream.peek(&mut peek) {
                Ok(0) => Some(false), // peer closed
                Ok(_) => Some(true),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => None,
                Err(_) => Some(false),
            }
        });
        Ok(found.unwrap_or(false))
    }
}

/// Blocking listener: one per bound address, per `LocalNode`.
pub struct TcpListener {
    inner: StdTcpListener,
}

impl TcpListener {
    pub fn bind(addr: impl ToSocketAddrs) -> Result<Self> {
        let inner = StdTcpListener::bind(addr).map_err(Error::Io)?;
        Ok(Self { inner })
    }

    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        self.inner.local_addr().map_err(Error::Io)
    }

    /// Blocks until one peer connects.
    pub fn accept_sync(&self) -> Result<Arc<TcpConnection>> {
        let (stream, _addr) = self.inner.accept().map_err(Error::Io)?;
        Ok(Arc::new(TcpConnection::from_stream(stream)?))
    }

    /// Returns `Ok(None)` immediately if no peer is waiting.
    pub fn accept_nonblocking(&self) -> Result<Option<Arc<TcpConnection>>> {
        self.inner.set_nonblocking(true).ok();
        let result = self.inner.accept();
        self.inner.set_nonblocking(false).ok();
        match result {
            Ok((stream, _addr)) => Ok(Some(Arc::new(TcpConnection::from_stream(stream)?))),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(Error::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_recv_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = std::thread::spawn(move || listener.accept_sync().unwrap());
        let client = TcpConnection::connect(addr).unwrap();
        let server = server.join().unwrap();

        super::super::send_framed(&client, &[b"hello", b" world"]).unwrap();

        let cache = crate::buffer::BufferCache::new();
        let buf = cache.alloc(11);
        server.recv_sync(&buf, 11).unwrap();
        assert_eq!(buf.to_vec(), b"hello world");
    }
}
