//! Control-protocol messages: neighbor heartbeats and echo (ping).
//!
//! Heartbeats are strictly single-hop (the L2 layer never forwards
//! them), so a heartbeat's source is always the node at the other end
//! of the ingress port. Echo traffic crosses the whole mesh.

use std::sync::{Arc, Mutex};

use crate::topology::Neighbor;

pub const MSG_HEARTBEAT: u8 = 0x01;
pub const MSG_ECHO_REQUEST: u8 = 0x02;
pub const MSG_ECHO_REPLY: u8 = 0x03;

/// Target value addressing every node.
pub const TARGET_ALL: u64 = 0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Heartbeat {
        node_id: u64,
        clock_us: u64,
    },
    EchoRequest {
        target: u64,
        seq: u32,
        payload: Vec<u8>,
    },
    EchoReply {
        responder: u64,
        seq: u32,
        payload: Vec<u8>,
    },
}

pub fn encode(msg: &Message) -> Vec<u8> {
    let mut out = Vec::new();
    match msg {
        Message::Heartbeat { node_id, clock_us } => {
            out.push(MSG_HEARTBEAT);
            out.extend_from_slice(&node_id.to_le_bytes());
            out.extend_from_slice(&clock_us.to_le_bytes());
        }
        Message::EchoRequest {
            target,
            seq,
            payload,
        } => {
            out.push(MSG_ECHO_REQUEST);
            out.extend_from_slice(&target.to_le_bytes());
            out.extend_from_slice(&seq.to_le_bytes());
            out.extend_from_slice(payload);
        }
        Message::EchoReply {
            responder,
            seq,
            payload,
        } => {
            out.push(MSG_ECHO_REPLY);
            out.extend_from_slice(&responder.to_le_bytes());
            out.extend_from_slice(&seq.to_le_bytes());
            out.extend_from_slice(payload);
        }
    }
    out
}

pub fn parse(bytes: &[u8]) -> Option<Message> {
    let (&msg_type, rest) = bytes.split_first()?;
    match msg_type {
        MSG_HEARTBEAT => {
            if rest.len() < 16 {
                return None;
            }
            Some(Message::Heartbeat {
                node_id: u64::from_le_bytes(rest[0..8].try_into().unwrap()),
                clock_us: u64::from_le_bytes(rest[8..16].try_into().unwrap()),
            })
        }
        MSG_ECHO_REQUEST => {
            if rest.len() < 12 {
                return None;
            }
            Some(Message::EchoRequest {
                target: u64::from_le_bytes(rest[0..8].try_into().unwrap()),
                seq: u32::from_le_bytes(rest[8..12].try_into().unwrap()),
                payload: rest[12..].to_vec(),
            })
        }
        MSG_ECHO_REPLY => {
            if rest.len() < 12 {
                return None;
            }
            Some(Message::EchoReply {
                responder: u64::from_le_bytes(rest[0..8].try_into().unwrap()),
                seq: u32::from_le_bytes(rest[8..12].try_into().unwrap()),
                payload: rest[12..].to_vec(),
            })
        }
        _ => None,
    }
}

/// Invoked on neighbor discovery edges: `(discovered, neighbor)`.
pub type DiscoveryCallback = Arc<dyn Fn(bool, &Neighbor) + Send + Sync>;

/// Registry of discovery listeners.
#[derive(Default)]
pub struct DiscoveryCallbacks {
    listeners: Mutex<Vec<DiscoveryCallback>>,
}

impl DiscoveryCallbacks {
    pub fn register(&self, cb: impl Fn(bool, &Neighbor) + Send + Sync + 'static) {
        self.listeners
            .lock()
            .expect("discovery lock poisoned")
            .push(Arc::new(cb));
    }

    pub fn notify(&self, discovered: bool, neighbor: &Neighbor) {
        let listeners = self
            .listeners
            .lock()
            .expect("discovery lock poisoned")
            .clone();
        for cb in listeners {
            cb(discovered, neighbor);
        }
    }
}
