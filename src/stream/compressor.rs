//! Optional per-chunk compression (spec §4.D). Concrete codecs are out
//! of scope (§1), exactly like byte-swap and transport drivers — this
//! module only specifies the seam.

/// A pluggable compressor, negotiated per chunk via its `id()`.
pub trait Compressor: Send + Sync {
    /// Stable id written into the chunk header so a reader can pick the
    /// matching decompressor without out-of-band negotiation.
    fn id(&self) -> u8;
    fn compress(&self, data: &[u8]) -> Vec<u8>;
    fn decompress(&self, data: &[u8]) -> Vec<u8>;
}

/// The default: passes bytes through unchanged, id `0`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCompressor;

impl Compressor for NoopCompressor {
    fn id(&self) -> u8 {
        0
    }

    fn compress(&self, data: &[u8]) -> Vec<u8> {
        data.to_vec()
    }

    fn decompress(&self, data: &[u8]) -> Vec<u8> {
        data.to_vec()
    }
}
