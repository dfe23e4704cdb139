//! Minimal Bristlemouth-style protocol stack.
//!
//! Everything here consumes the network device exclusively through the
//! `bmsbc-device` port contract: frames arrive via the upward callback
//! pair and leave via `send`. The stack is deliberately small: enough
//! for neighbor discovery, multicast ping, and topic pub/sub across a
//! static mesh. The initialization order, the link-state timer
//! contract, and the housekeeping cadence follow the full system.

pub mod bcmp;
pub mod error;
pub mod ipv6;
pub mod platform;
pub mod pubsub;
pub mod service;
pub mod stack;
pub mod topology;

pub use error::StackError;
pub use stack::Stack;
pub use topology::Neighbor;
