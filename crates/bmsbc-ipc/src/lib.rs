//! Local-IPC virtual-port device.
//!
//! Carries raw L2 frames between processes on the same filesystem view
//! over Unix datagram sockets. Each of the fifteen virtual ports is
//! wired to one statically configured peer; a datagram is one egress
//! port byte followed by the frame, so the receiver reads its ingress
//! port from the first byte. Datagram atomicity stands in for framing
//! and checksums.

mod device;

pub use device::{socket_path, VirtualPortConfig, VirtualPortDevice, MAX_PEERS};
