//! Host-platform adapters.
//!
//! Minimal implementations of the platform services the protocol stack
//! expects from real hardware: a real-time clock, an opaque
//! configuration partition, and firmware-update primitives. On a
//! hosted node most of these are no-ops or deliberately unavailable.

pub mod config;
pub mod firmware;
pub mod rtc;

/// Errors from the platform adapters.
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    /// The operation is deliberately unavailable on a hosted node.
    #[error("operation not permitted on this host")]
    NotPermitted,

    /// The host clock could not be read.
    #[error("clock error: {0}")]
    Clock(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PlatformError>;
