use std::sync::Arc;

use crate::callbacks::CallbackBlock;
use crate::error::Result;

/// Smallest frame accepted at the device boundary (Ethernet header).
pub const MIN_FRAME: usize = 14;

/// Largest frame accepted at the device boundary (header + payload,
/// no frame-check sequence).
pub const MAX_FRAME: usize = 1514;

/// Port number that floods every configured up-link. Never written to
/// the wire.
pub const FLOOD_PORT: u8 = 0;

/// Per-port traffic counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PortStats {
    pub tx_frames: u64,
    pub rx_frames: u64,
    pub tx_errors: u64,
    pub rx_dropped: u64,
}

/// The capability surface every device variant exposes to the upper
/// stack.
///
/// Implementations must be send-reentrant: the stack calls `send` from
/// several threads, including from inside upward callbacks. `enable`
/// is the only operation that may start background work, and
/// `disable` must release everything `enable` acquired within one
/// second. `enable` never delivers a link-up edge itself; the first
/// renegotiation tick does, after the stack's per-port timers are
/// armed.
pub trait NetworkDevice: Send + Sync {
    /// Number of ports. Fixed at construction, never changes.
    fn num_ports(&self) -> u8;

    /// Send one frame on `port` (1..=num_ports), or flood all
    /// configured up-links with [`FLOOD_PORT`].
    fn send(&self, frame: &[u8], port: u8) -> Result<()>;

    /// Start the device: bind endpoints, spawn receive threads.
    /// Idempotent.
    fn enable(&self) -> Result<()>;

    /// Stop the device and release every resource `enable` acquired.
    /// Idempotent; completes within one second.
    fn disable(&self) -> Result<()>;

    /// Open the outbound path of one port. May deliver a link-up edge.
    fn enable_port(&self, port: u8) -> Result<()>;

    /// Close the outbound path of one port. May deliver a link-down
    /// edge.
    fn disable_port(&self, port: u8) -> Result<()>;

    /// Probe a down port for reachability. Returns `true` iff a link
    /// came up as a result.
    fn retry_negotiation(&self, port: u8) -> Result<bool>;

    /// Traffic counters for one port.
    fn port_stats(&self, port: u8) -> Result<PortStats>;

    /// Service a device interrupt. No-op for the hosted transports.
    fn handle_interrupt(&self) -> Result<()> {
        Ok(())
    }

    /// The shared upward callback block.
    fn callbacks(&self) -> &Arc<CallbackBlock>;
}
