use crate::buffer::Buffer;
use crate::error::{Error, Result};

use super::Compressor;

/// Reads primitives and byte arrays over a *sequence* of buffers: lazy,
/// advancing to the next buffer only once the current one is
/// exhausted (§4.D). This lets a command handler resume reading across
/// several receive buffers without the sender having had to
/// concatenate them first.
pub struct DataIStream {
    buffers: Vec<Buffer>,
    index: usize,
    offset: usize,
}

impl DataIStream {
    pub fn from_buffers(buffers: Vec<Buffer>) -> Self {
        Self { buffers, index: 0, offset: 0 }
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let buf = Buffer::detached(bytes.len());
        buf.extend_from_slice(&bytes);
        Self::from_buffers(vec![buf])
    }

    /// Parses the chunk header `(compressor_id, n_chunks, chunk_lens…)`
    /// written by `DataOStream::finish_compressed` and decompresses it
    /// back into one flat byte stream.
    pub fn decode_compressed(bytes: &[u8], compressor: &dyn Compressor) -> Result<Self> {
        if bytes.len() < 5 {
            return Err(Error::Protocol("chunk header truncated".into()));
        }
        let id = bytes[0];
        if id != compressor.id() {
            return Err(Error::Protocol(format!(
                "compressor id mismatch: frame has {id}, reader has {}",
                compressor.id()
            )));
        }
        let n_chunks = u32::from_le_bytes(bytes[1..5].try_into().unwrap()) as usize;
        let mut pos = 5;
        let mut lens = Vec::with_capacity(n_chunks);
        for _ in 0..n_chunks {
            if bytes.len() < pos + 4 {
                return Err(Error::Protocol("chunk length table truncated".into()));
            }
            lens.push(u32::from_le_bytes(bytes[pos..pos + 4].try_into().unwrap()) as usize);
            pos += 4;
        }
        let mut out = Vec::new();
        for len in lens {
            if bytes.len() < pos + len {
                return Err(Error::Protocol("chunk body truncated".into()));
            }
            out.extend_from_slice(&compressor.decompress(&bytes[pos..pos + len]));
            pos += len;
        }
        Ok(Self::from_bytes(out))
    }

    /// Number of buffers not yet fully consumed — a coarse backlog
    /// signal for flow inspection.
    pub fn n_remaining_buffers(&self) -> usize {
        self.buffers.len().saturating_sub(self.index)
    }

    /// Returns up to `size` bytes from the current buffer, advancing to
    /// the next buffer once the current one is exhausted. Returns
    /// fewer than `size` bytes only at end of stream.
    pub fn get_remaining_buffer(&mut self, size: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(size);
        while out.len() < size && self.index < self.buffers.len() {
            let current = self.buffers[self.index].to_vec();
            let available = &current[self.offset..];
            let take = available.len().min(size - out.len());
            out.extend_from_slice(&available[..take]);
            self.offset += take;
            if self.offset >= current.len() {
                self.index += 1;
                self.offset = 0;
            }
        }
        out
    }

    fn read_exact(&mut self, n: usize) -> Result<Vec<u8>> {
        let data = self.get_remaining_buffer(n);
        if data.len() != n {
            return Err(Error::Protocol(format!(
                "stream exhausted: wanted {n} bytes, got {}",
                data.len()
            )));
        }
        Ok(data)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_exact(1)?[0])
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.read_exact(2)?.try_into().unwrap()))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.read_exact(4)?.try_into().unwrap()))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.read_exact(8)?.try_into().unwrap()))
    }

    pub fn read_u128(&mut self) -> Result<u128> {
        Ok(u128::from_le_bytes(self.read_exact(16)?.try_into().unwrap()))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.read_exact(4)?.try_into().unwrap()))
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.read_exact(8)?.try_into().unwrap()))
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_le_bytes(self.read_exact(4)?.try_into().unwrap()))
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_le_bytes(self.read_exact(8)?.try_into().unwrap()))
    }

    pub fn read_bytes(&mut self) -> Result<Vec<u8>> {
        let len = self.read_u64()? as usize;
        self.read_exact(len)
    }

    pub fn read_string(&mut self) -> Result<String> {
        String::from_utf8(self.read_bytes()?)
            .map_err(|e| Error::Protocol(format!("invalid utf8: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::DataOStream;

    #[test]
    fn round_trips_mixed_primitives() {
        let mut os = DataOStream::new();
        os.write_u32(7).write_str("hallo").write_f32(1.5).write_bool(false);
        let bytes = os.finish();

        let mut is = DataIStream::from_bytes(bytes);
        assert_eq!(is.read_u32().unwrap(), 7);
        assert_eq!(is.read_string().unwrap(), "hallo");
        assert_eq!(is.read_f32().unwrap(), 1.5);
        assert_eq!(is.read_bool().unwrap(), false);
    }

    #[test]
    fn reads_lazily_across_multiple_buffers() {
        let a = Buffer::detached(4);
        a.extend_from_slice(&1u32.to_le_bytes());
        let b = Buffer::detached(4);
        b.extend_from_slice(&2u32.to_le_bytes());

        let mut is = DataIStream::from_buffers(vec![a, b]);
        assert_eq!(is.n_remaining_buffers(), 2);
        assert_eq!(is.read_u32().unwrap(), 1);
        assert_eq!(is.read_u32().unwrap(), 2);
        assert_eq!(is.n_remaining_buffers(), 0);
    }

    #[test]
    fn compressed_round_trip() {
        use crate::stream::NoopCompressor;
        let mut os = DataOStream::new();
        os.write_str("a").write_str("b").write_str("c");
        let bytes = os.finish_compressed(&NoopCompressor, 8);

        let mut is = DataIStream::decode_compressed(&bytes, &NoopCompressor).unwrap();
        assert_eq!(is.read_string().unwrap(), "a");
        assert_eq!(is.read_string().unwrap(), "b");
        assert_eq!(is.read_string().unwrap(), "c");
    }
}
