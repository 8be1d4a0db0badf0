//! Typed serialization over the wire (spec §4.D, §6).
//!
//! `DataOStream`/`DataIStream` hand-roll framing: no external
//! serialization toolkit is used (the "serializable-object toolkit" is
//! an explicit Non-goal collaborator, §1). Byte order is always
//! little-endian, matching §6's wire frame.

mod compressor;
mod istream;
mod ostream;

pub use compressor::{Compressor, NoopCompressor};
pub use istream::DataIStream;
pub use ostream::DataOStream;

/// The 8-byte "new datastream packet" sentinel (always zero). The spec
/// calls truncation-recovery via this sentinel `TEMP` and explicitly
/// defers it (Open Question a): this crate never attempts resync after
/// a truncated frame, it simply closes the connection, matching "keep
/// strict framing (no resync) until requirements say otherwise".
pub const STREAM_SENTINEL: u64 = 0;
