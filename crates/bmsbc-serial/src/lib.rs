//! Serial L2 transport.
//!
//! Carries raw L2 Ethernet frames over a byte stream: each frame is
//! encoded as a length/CRC record, byte-stuffed, and terminated with a
//! 0x00 sentinel (see `bmsbc-codec`). A background thread accumulates
//! received bytes and hands decoded frames to the registered callback;
//! corrupt records are dropped without disturbing the stream.

mod accum;
mod error;
mod transport;
mod tty;

pub use accum::FrameAccumulator;
pub use error::{Result, SerialError};
pub use transport::{SerialConfig, SerialStatsSnapshot, SerialTransport};
pub use tty::SUPPORTED_BAUDS;
