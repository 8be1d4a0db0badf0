//! Wire frame encoding for `Connection` byte streams (§4.D, §6): an
//! 8-byte zero sentinel, an 8-byte size covering the 8-byte
//! type+opcode header plus the payload, then the 4-byte type, 4-byte
//! opcode, and the payload itself.
//!
//! Lives below both `command` and `object` so that anything writing
//! directly to a peer connection — the node layer's own command
//! dispatch, but also an object's `commit` pushing straight to its
//! mapped slaves — frames its bytes the same way. A connection that is
//! also read by a `LocalNode` receiver thread must never see unframed
//! bytes interleaved with framed ones.

use crate::buffer::{Buffer, BufferCache};
use crate::connection::Connection;
use crate::error::{Error, Result};

/// Leading "new packet" marker (§6). Framing is strict: a connection
/// that delivers a bad sentinel or a truncated frame is not resynced,
/// it is closed (Open Question a).
pub const SENTINEL: u64 = 0;

pub fn encode_frame(type_id: u32, opcode: u32, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(24 + payload.len());
    out.extend_from_slice(&SENTINEL.to_le_bytes());
    let size = (8 + payload.len()) as u64;
    out.extend_from_slice(&size.to_le_bytes());
    out.extend_from_slice(&type_id.to_le_bytes());
    out.extend_from_slice(&opcode.to_le_bytes());
    out.extend_from_slice(payload);
    out
}

/// Encodes and writes one frame under the connection's send-lock.
pub fn send_frame(conn: &dyn Connection, type_id: u32, opcode: u32, payload: &[u8]) -> Result<bool> {
    let frame = encode_frame(type_id, opcode, payload);
    crate::connection::send_framed(conn, &[&frame])
}

/// Blocking read of one complete frame. `cache` supplies the payload
/// buffer (thread-affine, §4.C) — callers on a receiver thread should
/// pass their own per-thread cache so the returned `Buffer` recycles
/// correctly.
pub fn read_frame(conn: &dyn Connection, cache: &BufferCache) -> Result<(u32, u32, Buffer)> {
    let header = cache.alloc(16);
    conn.recv_sync(&header, 16)?;
    let header_bytes = header.to_vec();
    let sentinel = u64::from_le_bytes(header_bytes[0..8].try_into().unwrap());
    if sentinel != SENTINEL {
        return Err(Error::Protocol(format!("bad frame sentinel: {sentinel}")));
    }
    let size = u64::from_le_bytes(header_bytes[8..16].try_into().unwrap()) as usize;
    if size < 8 {
        return Err(Error::Protocol("frame size smaller than its own header".into()));
    }

    let body = cache.alloc(size);
    conn.recv_sync(&body, size)?;
    let body_bytes = body.to_vec();
    let type_id = u32::from_le_bytes(body_bytes[0..4].try_into().unwrap());
    let opcode = u32::from_le_bytes(body_bytes[4..8].try_into().unwrap());

    let payload = cache.alloc(size - 8);
    payload.extend_from_slice(&body_bytes[8..]);
    Ok((type_id, opcode, payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{TcpConnection, TcpListener};

    #[test]
    fn frame_round_trips_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = std::thread::spawn(move || listener.accept_sync().unwrap());
        let client = TcpConnection::connect(addr).unwrap();
        let server = server.join().unwrap();

        send_frame(&client, 1, 7, b"payload").unwrap();

        let cache = BufferCache::new();
        let (type_id, opcode, payload) = read_frame(server.as_ref(), &cache).unwrap();
        assert_eq!(type_id, 1);
        assert_eq!(opcode, 7);
        assert_eq!(payload.to_vec(), b"payload");
    }
}
