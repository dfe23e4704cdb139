//! Per-port neighbor table.

use std::time::{Duration, Instant};

use std::sync::Mutex;

/// A directly connected peer learned from discovery traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Neighbor {
    pub node_id: u64,
    /// Port the neighbor is reachable on.
    pub port: u8,
    pub last_seen: Instant,
}

#[derive(Debug, Default)]
struct PortState {
    link_up: bool,
    neighbor: Option<Neighbor>,
}

/// What a heartbeat did to the table.
#[derive(Debug, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    /// First sighting on this port: a discovery event.
    Discovered,
    /// A different node replaced the previous occupant of the port.
    Replaced { previous: u64 },
    /// Known neighbor refreshed.
    Refreshed,
}

/// Neighbor table sized to the device's total port count.
pub struct Topology {
    ports: Mutex<Vec<PortState>>,
}

impl Topology {
    pub fn new(num_ports: u8) -> Self {
        let mut ports = Vec::with_capacity(usize::from(num_ports));
        ports.resize_with(usize::from(num_ports), PortState::default);
        Self {
            ports: Mutex::new(ports),
        }
    }

    pub fn num_ports(&self) -> u8 {
        self.ports.lock().expect("topology lock poisoned").len() as u8
    }

    /// Record a link edge. On a down edge, returns the neighbor that
    /// just became unreachable, if any.
    pub fn set_link(&self, port: u8, up: bool) -> Option<Neighbor> {
        let mut ports = self.ports.lock().expect("topology lock poisoned");
        let state = ports.get_mut(usize::from(port).checked_sub(1)?)?;
        state.link_up = up;
        if up {
            None
        } else {
            state.neighbor.take()
        }
    }

    /// Ports currently link-up.
    pub fn up_ports(&self) -> Vec<u8> {
        let ports = self.ports.lock().expect("topology lock poisoned");
        ports
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.link_up.then_some((i + 1) as u8))
            .collect()
    }

    /// Ports currently link-down; the renegotiation targets.
    pub fn down_ports(&self) -> Vec<u8> {
        let ports = self.ports.lock().expect("topology lock poisoned");
        ports
            .iter()
            .enumerate()
            .filter_map(|(i, s)| (!s.link_up).then_some((i + 1) as u8))
            .collect()
    }

    /// Fold one heartbeat into the table.
    pub fn record_heartbeat(&self, port: u8, node_id: u64, now: Instant) -> Option<HeartbeatOutcome> {
        let mut ports = self.ports.lock().expect("topology lock poisoned");
        let state = ports.get_mut(usize::from(port).checked_sub(1)?)?;
        let outcome = match &state.neighbor {
            None => HeartbeatOutcome::Discovered,
            Some(n) if n.node_id == node_id => HeartbeatOutcome::Refreshed,
            Some(n) => HeartbeatOutcome::Replaced {
                previous: n.node_id,
            },
        };
        state.neighbor = Some(Neighbor {
            node_id,
            port,
            last_seen: now,
        });
        Some(outcome)
    }

    /// Remove neighbors not heard from within `ttl`; returns the
    /// expired entries.
    pub fn expire(&self, ttl: Duration, now: Instant) -> Vec<Neighbor> {
        let mut ports = self.ports.lock().expect("topology lock poisoned");
        let mut expired = Vec::new();
        for state in ports.iter_mut() {
            let stale = state
                .neighbor
                .as_ref()
                .is_some_and(|n| now.duration_since(n.last_seen) >= ttl);
            if stale {
                if let Some(neighbor) = state.neighbor.take() {
                    expired.push(neighbor);
                }
            }
        }
        expired
    }

    /// Snapshot of every known neighbor.
    pub fn neighbors(&self) -> Vec<Neighbor> {
        let ports = self.ports.lock().expect("topology lock poisoned");
        ports.iter().filter_map(|s| s.neighbor.clone()).collect()
    }
}
