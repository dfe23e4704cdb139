//! Serial wire codec for bm_sbc L2 frames.
//!
//! A record on the wire is the COBS byte-stuffed encoding of
//! `[len_be16 || frame || crc32c_be32]` followed by a single 0x00
//! sentinel. The stuffed portion contains no 0x00 bytes, so the
//! sentinel unambiguously delimits records on a raw byte stream.
//!
//! - Length is the 2-byte big-endian size of the L2 frame.
//! - CRC-32C (Castagnoli, reflected) covers length + frame bytes.

pub mod cobs;
pub mod crc32c;
pub mod error;
pub mod frame;

pub use error::{CodecError, Result};
pub use frame::{decode_frame, encode_frame, MAX_FRAME, OVERHEAD, SENTINEL};
