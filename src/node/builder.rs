//! `node.send(peer) << args…` builder (spec §4.G "Send").

use std::sync::Arc;

use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::stream::DataOStream;

/// Backed by a [`DataOStream`] targeting one peer's outbound
/// connection; the frame is flushed atomically when [`send`](Self::send)
/// is called, or best-effort on drop if the caller forgot.
pub struct NodeCommandBuilder {
    conn: Arc<dyn Connection>,
    type_id: u32,
    opcode: u32,
    stream: DataOStream,
    sent: bool,
}

impl NodeCommandBuilder {
    pub(super) fn new(conn: Arc<dyn Connection>, type_id: u32, opcode: u32) -> Self {
        Self { conn, type_id, opcode, stream: DataOStream::new(), sent: false }
    }

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

    pub fn write_u128(&mut self, v: u128) -> &mut Self {
        self.stream.write_u128(v);
        self
    }

    pub fn write_f32(&mut self, v: f32) -> &mut Self {
        self.stream.write_f32(v);
        self
    }

    pub fn write_f64(&mut self, v: f64) -> &mut Self {
        self.stream.write_f64(v);
        self
    }

    pub fn write_str(&mut self, s: &str) -> &mut Self {
        self.stream.write_str(s);
        self
    }

    pub fn write_bytes(&mut self, data: &[u8]) -> &mut Self {
        self.stream.write_bytes(data);
        self
    }

    /// Flushes the accumulated writes as one frame under the
    /// connection's send-lock, explicitly surfacing any I/O failure.
    pub fn send(mut self) -> Result<()> {
        self.flush()
    }

    fn flush(&mut self) -> Result<()> {
        if self.sent {
            return Ok(());
        }
        self.sent = true;
        let payload = std::mem::take(&mut self.stream).finish();
        let ok = crate::wire::send_frame(self.conn.as_ref(), self.type_id, self.opcode, &payload)?;
        if !ok {
            return Err(Error::Io(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "connection send failed")));
        }
        Ok(())
    }
}

impl Drop for NodeCommandBuilder {
    fn drop(&mut self) {
        if !self.sent {
            if let Err(e) = self.flush() {
                tracing::warn!(error = %e, "command builder dropped without explicit send, flush failed");
            }
        }
    }
}
