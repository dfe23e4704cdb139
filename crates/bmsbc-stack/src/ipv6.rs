//! IPv6-over-Ethernet frame building and parsing.
//!
//! Addresses are link-local with the 64-bit node identity as the
//! interface identifier, so the identity is recoverable from any
//! source address. All protocol frames are Ethernet II + IPv6.

use bytes::{BufMut, BytesMut};

pub const ETHERTYPE_IPV6: u16 = 0x86DD;
pub const ETH_HEADER: usize = 14;
pub const IPV6_HEADER: usize = 40;

/// Next-header value of the control protocol.
pub const PROTO_BCMP: u8 = 0xBC;
pub const PROTO_UDP: u8 = 17;

const HOP_LIMIT: u8 = 255;

/// Locally administered unicast MAC derived from a node identity.
pub fn node_mac(node_id: u64) -> [u8; 6] {
    let id = node_id.to_be_bytes();
    [0x02, id[3], id[4], id[5], id[6], id[7]]
}

/// Ethernet mapping of the all-nodes multicast group.
pub const ALL_NODES_MAC: [u8; 6] = [0x33, 0x33, 0x00, 0x00, 0x00, 0x01];

/// Link-local address carrying `node_id` as the interface identifier.
pub fn link_local(node_id: u64) -> [u8; 16] {
    let mut addr = [0u8; 16];
    addr[0] = 0xFE;
    addr[1] = 0x80;
    addr[8..16].copy_from_slice(&node_id.to_be_bytes());
    addr
}

/// ff02::1, every node on the link.
pub const ALL_NODES: [u8; 16] = [
    0xFF, 0x02, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0x01,
];

fn interface_id(addr: &[u8; 16]) -> u64 {
    u64::from_be_bytes(addr[8..16].try_into().unwrap())
}

/// Frame destination at this stack's boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    Node(u64),
    AllNodes,
}

/// Build a complete L2 frame: Ethernet header, IPv6 header, payload.
pub fn build_frame(src_node: u64, dst: Destination, proto: u8, payload: &[u8]) -> Vec<u8> {
    let (dst_mac, dst_addr) = match dst {
        Destination::Node(id) => (node_mac(id), link_local(id)),
        Destination::AllNodes => (ALL_NODES_MAC, ALL_NODES),
    };

    let mut frame = BytesMut::with_capacity(ETH_HEADER + IPV6_HEADER + payload.len());
    frame.put_slice(&dst_mac);
    frame.put_slice(&node_mac(src_node));
    frame.put_u16(ETHERTYPE_IPV6);

    frame.put_u32(0x6000_0000); // version 6, no traffic class or flow
    frame.put_u16(payload.len() as u16);
    frame.put_u8(proto);
    frame.put_u8(HOP_LIMIT);
    frame.put_slice(&link_local(src_node));
    frame.put_slice(&dst_addr);

    frame.put_slice(payload);
    frame.to_vec()
}

/// An inbound frame after Ethernet/IPv6 validation.
#[derive(Debug)]
pub struct ParsedFrame<'a> {
    /// Node identity from the source address.
    pub src_node: u64,
    /// Unicast destination identity, or `None` for multicast.
    pub dst_node: Option<u64>,
    pub multicast: bool,
    pub proto: u8,
    pub payload: &'a [u8],
}

/// Validate and split an inbound frame. Returns `None` for anything
/// that is not well-formed IPv6 from this stack's address plan.
pub fn parse_frame(frame: &[u8]) -> Option<ParsedFrame<'_>> {
    if frame.len() < ETH_HEADER + IPV6_HEADER {
        return None;
    }
    let ethertype = u16::from_be_bytes([frame[12], frame[13]]);
    if ethertype != ETHERTYPE_IPV6 {
        return None;
    }

    let ip = &frame[ETH_HEADER..];
    if ip[0] >> 4 != 6 {
        return None;
    }
    let payload_len = usize::from(u16::from_be_bytes([ip[4], ip[5]]));
    if ip.len() < IPV6_HEADER + payload_len {
        return None;
    }
    let proto = ip[6];

    let src_addr: [u8; 16] = ip[8..24].try_into().unwrap();
    let dst_addr: [u8; 16] = ip[24..40].try_into().unwrap();
    let multicast = dst_addr[0] == 0xFF;

    Some(ParsedFrame {
        src_node: interface_id(&src_addr),
        dst_node: (!multicast).then(|| interface_id(&dst_addr)),
        multicast,
        proto,
        payload: &ip[IPV6_HEADER..IPV6_HEADER + payload_len],
    })
}

/// Internet checksum over the IPv6 pseudo-header and a UDP segment.
pub fn udp_checksum(src: &[u8; 16], dst: &[u8; 16], segment: &[u8]) -> u16 {
    fn add_words(mut sum: u32, bytes: &[u8]) -> u32 {
        let mut chunks = bytes.chunks_exact(2);
        for pair in &mut chunks {
            sum += u32::from(u16::from_be_bytes([pair[0], pair[1]]));
        }
        if let [last] = chunks.remainder() {
            sum += u32::from(u16::from_be_bytes([*last, 0]));
        }
        sum
    }

    let mut sum = add_words(0, src);
    sum = add_words(sum, dst);
    sum = add_words(sum, &(segment.len() as u32).to_be_bytes());
    sum = add_words(sum, &[0, 0, 0, PROTO_UDP]);
    sum = add_words(sum, segment);

    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    let folded = !(sum as u16);
    if folded == 0 {
        0xFFFF
    } else {
        folded
    }
}

/// Build a UDP segment (header + payload) with a valid checksum.
pub fn build_udp(
    src: &[u8; 16],
    dst: &[u8; 16],
    src_port: u16,
    dst_port: u16,
    payload: &[u8],
) -> Vec<u8> {
    let len = 8 + payload.len();
    let mut segment = BytesMut::with_capacity(len);
    segment.put_u16(src_port);
    segment.put_u16(dst_port);
    segment.put_u16(len as u16);
    segment.put_u16(0);
    segment.put_slice(payload);

    let checksum = udp_checksum(src, dst, &segment);
    segment[6..8].copy_from_slice(&checksum.to_be_bytes());
    segment.to_vec()
}

/// A UDP segment after header validation.
#[derive(Debug)]
pub struct ParsedUdp<'a> {
    pub src_port: u16,
    pub dst_port: u16,
    pub payload: &'a [u8],
}

/// Validate a UDP segment, checksum included.
pub fn parse_udp<'a>(src: &[u8; 16], dst: &[u8; 16], segment: &'a [u8]) -> Option<ParsedUdp<'a>> {
    if segment.len() < 8 {
        return None;
    }
    let declared = usize::from(u16::from_be_bytes([segment[4], segment[5]]));
    if declared < 8 || declared > segment.len() {
        return None;
    }
    let segment = &segment[..declared];

    let mut zeroed = segment.to_vec();
    zeroed[6] = 0;
    zeroed[7] = 0;
    let received = u16::from_be_bytes([segment[6], segment[7]]);
    if received != 0 && udp_checksum(src, dst, &zeroed) != received {
        return None;
    }

    Some(ParsedUdp {
        src_port: u16::from_be_bytes([segment[0], segment[1]]),
        dst_port: u16::from_be_bytes([segment[2], segment[3]]),
        payload: &segment[8..],
    })
}
