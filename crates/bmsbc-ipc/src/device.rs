use std::io::ErrorKind;
use std::os::unix::net::UnixDatagram;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use bmsbc_device::{
    check_frame_len, CallbackBlock, DeviceError, NetworkDevice, PortStats, Result, FLOOD_PORT,
    MAX_FRAME, MIN_FRAME,
};
use tracing::{debug, info, warn};

/// Fixed peer-table capacity; slot *i* carries port *i + 1*.
pub const MAX_PEERS: usize = 15;

/// Largest datagram on the local wire: egress byte + maximum frame.
const MAX_DATAGRAM: usize = 1 + MAX_FRAME;

/// Bounded blocking wait in the receive thread; also the bound on how
/// long `disable` waits for the thread to notice the stop flag.
const RECV_TIMEOUT: Duration = Duration::from_secs(1);

/// Receive-endpoint path for a node identity under `dir`.
pub fn socket_path(dir: &Path, node_id: u64) -> PathBuf {
    dir.join(format!("bm_sbc_{node_id:016x}.sock"))
}

/// Launch configuration for a [`VirtualPortDevice`].
#[derive(Debug, Clone)]
pub struct VirtualPortConfig {
    /// This process's 64-bit node identity.
    pub node_id: u64,
    /// Directory holding every node's receive endpoint.
    pub socket_dir: PathBuf,
    /// Peer identities in port order; entries beyond the slot capacity
    /// are dropped with a diagnostic.
    pub peers: Vec<u64>,
}

/// One slot in the peer table.
#[derive(Debug, Default)]
struct PeerSlot {
    node_id: u64,
    sock_path: PathBuf,
    /// True when the slot holds a configured peer.
    active: bool,
    /// True after a link-up edge has been delivered and before the
    /// matching link-down edge.
    link_up: bool,
    /// Unbound outbound datagram socket; `None` until opened.
    tx: Option<Arc<UnixDatagram>>,
    stats: PortStats,
}

/// Mutable state behind the device lock.
#[derive(Default)]
struct DeviceState {
    slots: Vec<PeerSlot>,
    rx: Option<Arc<UnixDatagram>>,
    rx_thread: Option<JoinHandle<()>>,
    enabled: bool,
}

/// Virtual-port network device over local datagram sockets.
///
/// All state is per-instance, so several devices can coexist in one
/// process (the tests rely on this).
pub struct VirtualPortDevice {
    node_id: u64,
    own_path: PathBuf,
    state: Arc<Mutex<DeviceState>>,
    running: Arc<AtomicBool>,
    callbacks: Arc<CallbackBlock>,
}

impl VirtualPortDevice {
    pub fn new(config: VirtualPortConfig) -> Self {
        if config.peers.len() > MAX_PEERS {
            warn!(
                configured = config.peers.len(),
                capacity = MAX_PEERS,
                "peer list exceeds slot capacity; extras dropped"
            );
        }

        let mut slots = Vec::with_capacity(MAX_PEERS);
        for i in 0..MAX_PEERS {
            let mut slot = PeerSlot::default();
            if let Some(&peer_id) = config.peers.get(i) {
                slot.node_id = peer_id;
                slot.sock_path = socket_path(&config.socket_dir, peer_id);
                slot.active = true;
            }
            slots.push(slot);
        }

        Self {
            node_id: config.node_id,
            own_path: socket_path(&config.socket_dir, config.node_id),
            state: Arc::new(Mutex::new(DeviceState {
                slots,
                ..DeviceState::default()
            })),
            running: Arc::new(AtomicBool::new(false)),
            callbacks: CallbackBlock::new(),
        }
    }

    pub fn node_id(&self) -> u64 {
        self.node_id
    }

    /// Path of this device's bound receive endpoint.
    pub fn own_socket_path(&self) -> &Path {
        &self.own_path
    }

    fn check_port(&self, port: u8) -> Result<()> {
        if port == 0 || usize::from(port) > MAX_PEERS {
            return Err(DeviceError::InvalidPort {
                port,
                num_ports: MAX_PEERS as u8,
            });
        }
        Ok(())
    }

    /// Bind the receive endpoint, unlinking any stale artifact first.
    fn bind_receive_socket(&self) -> Result<Arc<UnixDatagram>> {
        match std::fs::remove_file(&self.own_path) {
            Ok(()) => debug!(path = ?self.own_path, "removed stale receive endpoint"),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(DeviceError::Io(err)),
        }
        let rx = UnixDatagram::bind(&self.own_path)?;
        rx.set_read_timeout(Some(RECV_TIMEOUT))?;
        Ok(Arc::new(rx))
    }

    fn flood(&self, frame: &[u8]) -> Result<()> {
        let targets: Vec<(u8, Arc<UnixDatagram>, PathBuf)> = {
            let state = self.state.lock().expect("device lock poisoned");
            state
                .slots
                .iter()
                .enumerate()
                .filter_map(|(i, slot)| {
                    if slot.active && slot.link_up {
                        slot.tx
                            .as_ref()
                            .map(|tx| ((i + 1) as u8, tx.clone(), slot.sock_path.clone()))
                    } else {
                        None
                    }
                })
                .collect()
        };

        let mut datagram = Vec::with_capacity(1 + frame.len());
        datagram.push(0);
        datagram.extend_from_slice(frame);

        let mut failed = 0usize;
        for (egress, tx, path) in &targets {
            // The receiver reads its ingress port from the first byte,
            // which is this slot's egress number. Port 0 never appears
            // on the wire.
            datagram[0] = *egress;
            match tx.send_to(&datagram, path) {
                Ok(_) => self.bump(*egress, |s| s.tx_frames += 1),
                Err(err) => {
                    debug!(port = *egress, error = %err, "flood send failed");
                    self.bump(*egress, |s| s.tx_errors += 1);
                    failed += 1;
                }
            }
        }

        if failed > 0 {
            return Err(DeviceError::Io(std::io::Error::other(format!(
                "{failed} of {} flood sends failed",
                targets.len()
            ))));
        }
        Ok(())
    }

    fn bump(&self, port: u8, f: impl FnOnce(&mut PortStats)) {
        let mut state = self.state.lock().expect("device lock poisoned");
        f(&mut state.slots[usize::from(port) - 1].stats);
    }

    fn rx_loop(
        rx: Arc<UnixDatagram>,
        running: Arc<AtomicBool>,
        state: Arc<Mutex<DeviceState>>,
        callbacks: Arc<CallbackBlock>,
    ) {
        let mut buf = [0u8; MAX_DATAGRAM];
        while running.load(Ordering::SeqCst) {
            let n = match rx.recv(&mut buf) {
                Ok(n) => n,
                Err(err)
                    if matches!(
                        err.kind(),
                        ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                    ) =>
                {
                    continue
                }
                Err(err) => {
                    if running.load(Ordering::SeqCst) {
                        warn!(error = %err, "receive endpoint failed; device going passive");
                    }
                    break;
                }
            };

            if n == 0 {
                continue;
            }
            let port = buf[0];
            if port == 0 || usize::from(port) > MAX_PEERS {
                debug!(port, "dropping datagram with out-of-range port byte");
                continue;
            }
            if n < 1 + MIN_FRAME {
                debug!(port, len = n, "dropping undersized datagram");
                let mut st = state.lock().expect("device lock poisoned");
                st.slots[usize::from(port) - 1].stats.rx_dropped += 1;
                continue;
            }

            {
                let mut st = state.lock().expect("device lock poisoned");
                st.slots[usize::from(port) - 1].stats.rx_frames += 1;
            }
            // Callback pointers are snapshotted inside the block; no
            // device lock is held across the upcall.
            callbacks.receive(port, &buf[1..n]);
        }
    }
}

impl NetworkDevice for VirtualPortDevice {
    fn num_ports(&self) -> u8 {
        MAX_PEERS as u8
    }

    fn send(&self, frame: &[u8], port: u8) -> Result<()> {
        check_frame_len(frame.len())?;
        if port == FLOOD_PORT {
            return self.flood(frame);
        }
        self.check_port(port)?;

        let (tx, path) = {
            let state = self.state.lock().expect("device lock poisoned");
            let slot = &state.slots[usize::from(port) - 1];
            if !slot.active {
                return Err(DeviceError::LinkDown { port });
            }
            match &slot.tx {
                Some(tx) => (tx.clone(), slot.sock_path.clone()),
                None => return Err(DeviceError::LinkDown { port }),
            }
        };

        let mut datagram = Vec::with_capacity(1 + frame.len());
        datagram.push(port);
        datagram.extend_from_slice(frame);

        match tx.send_to(&datagram, &path) {
            Ok(_) => {
                self.bump(port, |s| s.tx_frames += 1);
                Ok(())
            }
            Err(err) => {
                self.bump(port, |s| s.tx_errors += 1);
                Err(DeviceError::Io(err))
            }
        }
    }

    fn enable(&self) -> Result<()> {
        let mut state = self.state.lock().expect("device lock poisoned");
        if state.enabled {
            return Ok(());
        }

        let rx = self.bind_receive_socket()?;

        // Outbound socket creation is tolerant: a failed slot stays
        // unopened and renegotiation retries it.
        for slot in state.slots.iter_mut().filter(|s| s.active) {
            match UnixDatagram::unbound() {
                Ok(sock) => slot.tx = Some(Arc::new(sock)),
                Err(err) => {
                    warn!(peer = %format_args!("{:016x}", slot.node_id), error = %err,
                        "outbound socket creation failed; will retry on renegotiation");
                }
            }
        }

        self.running.store(true, Ordering::SeqCst);
        let thread = std::thread::Builder::new()
            .name(format!("bmsbc-ipc-rx-{:016x}", self.node_id))
            .spawn({
                let rx = rx.clone();
                let running = self.running.clone();
                let st = self.state.clone();
                let callbacks = self.callbacks.clone();
                move || Self::rx_loop(rx, running, st, callbacks)
            })
            .map_err(|err| {
                self.running.store(false, Ordering::SeqCst);
                let _ = std::fs::remove_file(&self.own_path);
                DeviceError::Io(err)
            })?;

        state.rx = Some(rx);
        state.rx_thread = Some(thread);
        state.enabled = true;
        info!(node = %format_args!("{:016x}", self.node_id), path = ?self.own_path,
            "virtual-port device enabled");
        // No link_change here: the first renegotiation tick delivers
        // the link-up edges, after the stack's port timers are armed.
        Ok(())
    }

    fn disable(&self) -> Result<()> {
        let thread = {
            let mut state = self.state.lock().expect("device lock poisoned");
            if !state.enabled {
                return Ok(());
            }
            state.enabled = false;
            self.running.store(false, Ordering::SeqCst);
            state.rx = None;
            match std::fs::remove_file(&self.own_path) {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => debug!(path = ?self.own_path, error = %err,
                    "receive endpoint unlink failed"),
            }
            state.rx_thread.take()
        };

        // Join outside the lock; the receive timeout bounds the wait.
        if let Some(thread) = thread {
            let _ = thread.join();
        }

        let went_down: Vec<u8> = {
            let mut state = self.state.lock().expect("device lock poisoned");
            let mut ports = Vec::new();
            for (i, slot) in state.slots.iter_mut().enumerate() {
                slot.tx = None;
                if slot.link_up {
                    slot.link_up = false;
                    ports.push((i + 1) as u8);
                }
            }
            ports
        };
        for port in went_down {
            self.callbacks.link_change(port, false);
        }

        info!(node = %format_args!("{:016x}", self.node_id), "virtual-port device disabled");
        Ok(())
    }

    fn enable_port(&self, port: u8) -> Result<()> {
        self.check_port(port)?;
        let came_up = {
            let mut state = self.state.lock().expect("device lock poisoned");
            let slot = &mut state.slots[usize::from(port) - 1];
            if !slot.active {
                return Err(DeviceError::LinkDown { port });
            }
            if slot.tx.is_none() {
                slot.tx = Some(Arc::new(UnixDatagram::unbound()?));
            }
            if slot.link_up {
                false
            } else {
                slot.link_up = true;
                true
            }
        };
        if came_up {
            self.callbacks.link_change(port, true);
        }
        Ok(())
    }

    fn disable_port(&self, port: u8) -> Result<()> {
        self.check_port(port)?;
        let went_down = {
            let mut state = self.state.lock().expect("device lock poisoned");
            let slot = &mut state.slots[usize::from(port) - 1];
            slot.tx = None;
            if slot.link_up {
                slot.link_up = false;
                true
            } else {
                false
            }
        };
        if went_down {
            self.callbacks.link_change(port, false);
        }
        Ok(())
    }

    fn retry_negotiation(&self, port: u8) -> Result<bool> {
        self.check_port(port)?;
        let probe_path = {
            let state = self.state.lock().expect("device lock poisoned");
            let slot = &state.slots[usize::from(port) - 1];
            if !slot.active || slot.link_up {
                return Ok(false);
            }
            slot.sock_path.clone()
        };

        // Negotiation on this transport is a filesystem-presence probe:
        // the outbound socket is unbound, so reachability is exactly
        // "the peer's receive endpoint exists".
        if !probe_path.exists() {
            return Ok(false);
        }

        let came_up = {
            let mut state = self.state.lock().expect("device lock poisoned");
            let slot = &mut state.slots[usize::from(port) - 1];
            if slot.link_up {
                false
            } else {
                if slot.tx.is_none() {
                    slot.tx = Some(Arc::new(UnixDatagram::unbound()?));
                }
                slot.link_up = true;
                true
            }
        };
        if came_up {
            debug!(port, peer = ?probe_path, "peer endpoint appeared; link up");
            self.callbacks.link_change(port, true);
        }
        Ok(came_up)
    }

    fn port_stats(&self, port: u8) -> Result<PortStats> {
        self.check_port(port)?;
        let state = self.state.lock().expect("device lock poisoned");
        Ok(state.slots[usize::from(port) - 1].stats)
    }

    fn callbacks(&self) -> &Arc<CallbackBlock> {
        &self.callbacks
    }
}

impl Drop for VirtualPortDevice {
    fn drop(&mut self) {
        let _ = self.disable();
    }
}
