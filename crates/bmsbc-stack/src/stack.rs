//! The stack proper: L2 dispatch, discovery, ping, pub/sub, and the
//! housekeeping timers, initialized in the mandatory order.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use bmsbc_device::{DeviceError, NetworkDevice, FLOOD_PORT};
use tracing::{debug, info, warn};

use crate::bcmp::{self, DiscoveryCallbacks, Message};
use crate::error::StackError;
use crate::ipv6::{self, Destination};
use crate::platform::rtc;
use crate::pubsub::{self, Publication, Subscriptions, MIDDLEWARE_PORT};
use crate::service::ServiceRegistry;
use crate::topology::{HeartbeatOutcome, Neighbor, Topology};

/// Cadence of the renegotiation/heartbeat/expiry thread.
const HOUSEKEEPING_TICK: Duration = Duration::from_millis(100);
const HEARTBEAT_PERIOD: Duration = Duration::from_secs(1);
const NEIGHBOR_TTL: Duration = Duration::from_secs(5);

/// One node's protocol stack over one network device.
pub struct Stack {
    node_id: u64,
    device: Arc<dyn NetworkDevice>,
    topology: Topology,
    discovery: DiscoveryCallbacks,
    subscriptions: Subscriptions,
    services: ServiceRegistry,
    ping_seq: AtomicU32,
    ping_replies: AtomicU64,
    running: Arc<AtomicBool>,
    housekeeping: Mutex<Option<JoinHandle<()>>>,
}

impl Stack {
    /// Bring the stack up over `device`.
    ///
    /// Stages run in the mandatory order (L2, IP, control protocol,
    /// topology, services, pub/sub, middleware) and the first failure
    /// aborts with a stage-specific error. `enable` fires no link
    /// edges, so registering the callbacks before arming the
    /// renegotiation timer (control-protocol stage) is race-free.
    pub fn init(device: Arc<dyn NetworkDevice>, node_id: u64) -> Result<Arc<Self>, StackError> {
        let stack = Arc::new(Self {
            node_id,
            topology: Topology::new(device.num_ports()),
            device: device.clone(),
            discovery: DiscoveryCallbacks::default(),
            subscriptions: Subscriptions::default(),
            services: ServiceRegistry::default(),
            ping_seq: AtomicU32::new(0),
            ping_replies: AtomicU64::new(0),
            running: Arc::new(AtomicBool::new(false)),
            housekeeping: Mutex::new(None),
        });

        // L2: hand the device up, then start it.
        let weak = Arc::downgrade(&stack);
        device.callbacks().set_receive(move |port, frame| {
            if let Some(stack) = weak.upgrade() {
                stack.handle_frame(port, frame);
            }
        });
        let weak = Arc::downgrade(&stack);
        device.callbacks().set_link_change(move |port, up| {
            if let Some(stack) = weak.upgrade() {
                stack.handle_link_change(port, up);
            }
        });
        device.enable()?;
        info!(ports = device.num_ports(), "l2 up");

        info!(
            node = %format_args!("{node_id:016x}"),
            address = %format_args!("fe80::{:x}:{:x}:{:x}:{:x}",
                node_id >> 48 & 0xFFFF, node_id >> 32 & 0xFFFF,
                node_id >> 16 & 0xFFFF, node_id & 0xFFFF),
            "ip up"
        );

        // Control protocol: arm the port timers.
        if let Err(err) = stack.start_housekeeping() {
            let _ = device.disable();
            return Err(StackError::Bcmp(err));
        }
        info!("bcmp up");

        info!(ports = stack.topology.num_ports(), "topology sized");
        info!(services = stack.services.len(), "services up");
        info!(port = MIDDLEWARE_PORT, "pub/sub up");
        info!("middleware up");

        Ok(stack)
    }

    pub fn node_id(&self) -> u64 {
        self.node_id
    }

    pub fn device(&self) -> &Arc<dyn NetworkDevice> {
        &self.device
    }

    pub fn services(&self) -> &ServiceRegistry {
        &self.services
    }

    /// Current neighbor snapshot.
    pub fn neighbors(&self) -> Vec<Neighbor> {
        self.topology.neighbors()
    }

    /// Listen for neighbor discovery edges. Neighbors already in the
    /// table are replayed to the new listener so a registration after
    /// the first heartbeat misses nothing.
    pub fn register_discovery_callback(
        &self,
        cb: impl Fn(bool, &Neighbor) + Send + Sync + 'static,
    ) {
        let known = self.topology.neighbors();
        for neighbor in &known {
            cb(true, neighbor);
        }
        self.discovery.register(cb);
    }

    /// Subscribe to a pub/sub topic.
    pub fn subscribe(&self, topic: &str, cb: impl Fn(u64, &str, &[u8]) + Send + Sync + 'static) {
        self.subscriptions.subscribe(topic, cb);
    }

    /// Publish on a topic to every reachable node.
    pub fn publish(&self, topic: &str, data: &[u8]) -> Result<(), DeviceError> {
        let publication = Publication {
            src_node: self.node_id,
            topic: topic.to_string(),
            data: data.to_vec(),
        };
        let segment = ipv6::build_udp(
            &ipv6::link_local(self.node_id),
            &ipv6::ALL_NODES,
            MIDDLEWARE_PORT,
            MIDDLEWARE_PORT,
            &pubsub::encode(&publication),
        );
        let frame = ipv6::build_frame(
            self.node_id,
            Destination::AllNodes,
            ipv6::PROTO_UDP,
            &segment,
        );
        self.device.send(&frame, FLOOD_PORT)
    }

    /// Send a multicast echo request; every node replies. Returns the
    /// sequence number used.
    pub fn ping_all(&self, payload: &[u8]) -> Result<u32, DeviceError> {
        let seq = self.ping_seq.fetch_add(1, Ordering::Relaxed);
        let message = bcmp::encode(&Message::EchoRequest {
            target: bcmp::TARGET_ALL,
            seq,
            payload: payload.to_vec(),
        });
        let frame = ipv6::build_frame(
            self.node_id,
            Destination::AllNodes,
            ipv6::PROTO_BCMP,
            &message,
        );
        self.device.send(&frame, FLOOD_PORT)?;
        Ok(seq)
    }

    /// Echo replies received over this stack's lifetime.
    pub fn ping_replies_received(&self) -> u64 {
        self.ping_replies.load(Ordering::Relaxed)
    }

    /// Stop the housekeeping thread and disable the device. Idempotent.
    pub fn shutdown(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let thread = self
            .housekeeping
            .lock()
            .expect("housekeeping lock poisoned")
            .take();
        if let Some(thread) = thread {
            let _ = thread.join();
        }
        if let Err(err) = self.device.disable() {
            warn!(error = %err, "device disable failed");
        }
        info!("stack shut down");
    }

    fn handle_frame(&self, port: u8, frame: &[u8]) {
        let Some(parsed) = ipv6::parse_frame(frame) else {
            debug!(port, len = frame.len(), "dropping unparseable frame");
            return;
        };
        if parsed.src_node == self.node_id {
            // A forwarded copy of our own multicast coming back around.
            return;
        }

        let local = parsed.multicast || parsed.dst_node == Some(self.node_id);
        // Heartbeats are single-hop; everything else may cross us.
        let single_hop = parsed.proto == ipv6::PROTO_BCMP
            && parsed.payload.first() == Some(&bcmp::MSG_HEARTBEAT);

        if local {
            match parsed.proto {
                ipv6::PROTO_BCMP => self.handle_bcmp(port, &parsed),
                ipv6::PROTO_UDP => self.handle_udp(&parsed),
                other => debug!(port, proto = other, "dropping unknown protocol"),
            }
        }

        if !single_hop && (parsed.multicast || !local) {
            self.forward(port, frame);
        }
    }

    /// L2 forwarding: multicast fans out to every other up port, and
    /// unicast not addressed to us is flooded the same way (the mesh
    /// is a tree, so there is exactly one escape path).
    fn forward(&self, ingress: u8, frame: &[u8]) {
        for port in self.topology.up_ports() {
            if port == ingress {
                continue;
            }
            if let Err(err) = self.device.send(frame, port) {
                debug!(port, error = %err, "forward failed");
            }
        }
    }

    fn handle_bcmp(&self, port: u8, parsed: &ipv6::ParsedFrame<'_>) {
        let Some(message) = bcmp::parse(parsed.payload) else {
            debug!(port, "dropping malformed control message");
            return;
        };
        match message {
            Message::Heartbeat { node_id, .. } => self.handle_heartbeat(port, node_id),
            Message::EchoRequest {
                target,
                seq,
                payload,
            } => {
                if target == bcmp::TARGET_ALL || target == self.node_id {
                    let reply = bcmp::encode(&Message::EchoReply {
                        responder: self.node_id,
                        seq,
                        payload,
                    });
                    let frame = ipv6::build_frame(
                        self.node_id,
                        Destination::Node(parsed.src_node),
                        ipv6::PROTO_BCMP,
                        &reply,
                    );
                    if let Err(err) = self.device.send(&frame, port) {
                        debug!(port, error = %err, "echo reply send failed");
                    }
                }
            }
            Message::EchoReply { responder, seq, .. } => {
                self.ping_replies.fetch_add(1, Ordering::Relaxed);
                // External harnesses grep for this glyph.
                println!(
                    "[{:016x}] 🏓 reply from={responder:016x} bcmp_seq={seq}",
                    self.node_id
                );
            }
        }
    }

    fn handle_heartbeat(&self, port: u8, node_id: u64) {
        let now = Instant::now();
        match self.topology.record_heartbeat(port, node_id, now) {
            Some(HeartbeatOutcome::Discovered) => {
                info!(
                    node = %format_args!("{node_id:016x}"),
                    port, "neighbor discovered"
                );
                self.discovery.notify(
                    true,
                    &Neighbor {
                        node_id,
                        port,
                        last_seen: now,
                    },
                );
            }
            Some(HeartbeatOutcome::Replaced { previous }) => {
                self.discovery.notify(
                    false,
                    &Neighbor {
                        node_id: previous,
                        port,
                        last_seen: now,
                    },
                );
                self.discovery.notify(
                    true,
                    &Neighbor {
                        node_id,
                        port,
                        last_seen: now,
                    },
                );
            }
            Some(HeartbeatOutcome::Refreshed) | None => {}
        }
    }

    fn handle_udp(&self, parsed: &ipv6::ParsedFrame<'_>) {
        let src_addr = ipv6::link_local(parsed.src_node);
        let dst_addr = if parsed.multicast {
            ipv6::ALL_NODES
        } else {
            ipv6::link_local(self.node_id)
        };
        let Some(udp) = ipv6::parse_udp(&src_addr, &dst_addr, parsed.payload) else {
            debug!("dropping UDP segment with bad header or checksum");
            return;
        };
        if udp.dst_port != MIDDLEWARE_PORT {
            debug!(dst_port = udp.dst_port, "dropping UDP to unknown port");
            return;
        }
        let Some(publication) = pubsub::parse(udp.payload) else {
            debug!("dropping malformed publication");
            return;
        };
        self.subscriptions.deliver(&publication);

        // A publication on a registered service topic is a request:
        // run the handler and publish the response on the reply topic.
        if let Some(handler) = self.services.lookup(&publication.topic) {
            let response = handler(&publication.data);
            let reply_topic = format!("{}/reply", publication.topic);
            if let Err(err) = self.publish(&reply_topic, &response) {
                debug!(topic = %reply_topic, error = %err, "service reply failed");
            }
        }
    }

    fn handle_link_change(&self, port: u8, up: bool) {
        debug!(port, up, "link state change");
        if up {
            self.topology.set_link(port, true);
            // Greet the new link now instead of waiting a full
            // heartbeat period.
            self.send_heartbeat(port);
        } else if let Some(neighbor) = self.topology.set_link(port, false) {
            self.discovery.notify(false, &neighbor);
        }
    }

    fn send_heartbeat(&self, port: u8) {
        let message = bcmp::encode(&Message::Heartbeat {
            node_id: self.node_id,
            clock_us: rtc::micros(),
        });
        let frame = ipv6::build_frame(
            self.node_id,
            Destination::AllNodes,
            ipv6::PROTO_BCMP,
            &message,
        );
        if let Err(err) = self.device.send(&frame, port) {
            debug!(port, error = %err, "heartbeat send failed");
        }
    }

    fn start_housekeeping(self: &Arc<Self>) -> std::io::Result<()> {
        self.running.store(true, Ordering::SeqCst);
        let weak = Arc::downgrade(self);
        let thread = std::thread::Builder::new()
            .name("bmsbc-housekeeping".to_string())
            .spawn(move || {
                let mut last_heartbeat = Instant::now();
                loop {
                    std::thread::sleep(HOUSEKEEPING_TICK);
                    let Some(stack) = weak.upgrade() else { break };
                    if !stack.running.load(Ordering::SeqCst) {
                        break;
                    }

                    for port in stack.topology.down_ports() {
                        match stack.device.retry_negotiation(port) {
                            Ok(true) => debug!(port, "link renegotiated"),
                            Ok(false) => {}
                            Err(err) => debug!(port, error = %err, "renegotiation failed"),
                        }
                    }

                    if last_heartbeat.elapsed() >= HEARTBEAT_PERIOD {
                        last_heartbeat = Instant::now();
                        for port in stack.topology.up_ports() {
                            stack.send_heartbeat(port);
                        }
                    }

                    for neighbor in stack.topology.expire(NEIGHBOR_TTL, Instant::now()) {
                        info!(
                            node = %format_args!("{:016x}", neighbor.node_id),
                            port = neighbor.port,
                            "neighbor lost"
                        );
                        stack.discovery.notify(false, &neighbor);
                    }
                }
            })?;
        *self
            .housekeeping
            .lock()
            .expect("housekeeping lock poisoned") = Some(thread);
        Ok(())
    }
}
