use bytes::{BufMut, BytesMut};

use super::Compressor;

/// Builds one logical stream: multiple typed writes concatenated, then
/// framed once, optionally compressed in chunks (§4.D).
///
/// `enable_save()` retains a copy of the written payload so a command
/// handler can replay it verbatim to a late-joining mapper without
/// re-serializing (used by the instance-cache push path, §4.I).
pub struct DataOStream {
    payload: BytesMut,
    save: Option<BytesMut>,
}

impl DataOStream {
    pub fn new() -> Self {
        Self { payload: BytesMut::new(), save: None }
    }

    pub fn enable_save(&mut self) {
        if self.save.is_none() {
            self.save = Some(self.payload.clone());
        }
    }

    pub fn saved(&self) -> Option<&[u8]> {
        self.save.as_deref()
    }

    fn push(&mut self, bytes: &[u8]) {
        self.payload.put_slice(bytes);
        if let Some(save) = self.save.as_mut() {
            save.put_slice(bytes);
        }
    }

    pub fn write_u8(&mut self, v: u8) -> &mut Self {
        self.push(&[v]);
        self
    }

    pub fn write_bool(&mut self, v: bool) -> &mut Self {
        self.write_u8(v as u8)
    }

    pub fn write_u16(&mut self, v: u16) -> &mut Self {
        self.push(&v.to_le_bytes());
        self
    }

    pub fn write_u32(&mut self, v: u32) -> &mut Self {
        self.push(&v.to_le_bytes());
        self
    }

    pub fn write_u64(&mut self, v: u64) -> &mut Self {
        self.push(&v.to_le_bytes());
        self
    }

    pub fn write_u128(&mut self, v: u128) -> &mut Self {
        self.push(&v.to_le_bytes());
        self
    }

    pub fn write_i32(&mut self, v: i32) -> &mut Self {
        self.push(&v.to_le_bytes());
        self
    }

    pub fn write_i64(&mut self, v: i64) -> &mut Self {
        self.push(&v.to_le_bytes());
        self
    }

    pub fn write_f32(&mut self, v: f32) -> &mut Self {
        self.push(&v.to_le_bytes());
        self
    }

    pub fn write_f64(&mut self, v: f64) -> &mut Self {
        self.push(&v.to_le_bytes());
        self
    }

    /// Variable-length types are length-prefixed: `(size: u64, bytes)`.
    pub fn write_bytes(&mut self, data: &[u8]) -> &mut Self {
        self.write_u64(data.len() as u64);
        self.push(data);
        self
    }

    pub fn write_str(&mut self, s: &str) -> &mut Self {
        self.write_bytes(s.as_bytes())
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Finish without compression: the plain payload bytes.
    pub fn finish(self) -> Vec<u8> {
        self.payload.to_vec()
    }

    /// Finish with compression, splitting the payload into
    /// `chunk_size`-sized chunks and writing the chunk header
    /// `(compressor_id: u8, n_chunks: u32, chunk_lens: u32...)` ahead of
    /// the compressed chunk bytes.
    pub fn finish_compressed(self, compressor: &dyn Compressor, chunk_size: usize) -> Vec<u8> {
        let chunk_size = chunk_size.max(1);
        let chunks: Vec<Vec<u8>> = self
            .payload
            .chunks(chunk_size)
            .map(|c| compressor.compress(c))
            .collect();

        let mut out = BytesMut::new();
        out.put_u8(compressor.id());
        out.put_u32_le(chunks.len() as u32);
        for chunk in &chunks {
            out.put_u32_le(chunk.len() as u32);
        }
        for chunk in &chunks {
            out.put_slice(chunk);
        }
        out.to_vec()
    }
}

impl Default for DataOStream {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitives_round_trip_sizes() {
        let mut os = DataOStream::new();
        os.write_u32(7).write_str("hi").write_bool(true);
        // 4 bytes u32 + (8 bytes len + 2 bytes "hi") + 1 byte bool
        assert_eq!(os.len(), 4 + 8 + 2 + 1);
    }

    #[test]
    fn enable_save_mirrors_writes() {
        let mut os = DataOStream::new();
        os.enable_save();
        os.write_u8(1).write_u8(2);
        assert_eq!(os.saved().unwrap(), &[1, 2]);
    }
}
