//! Network stack tests: header round-trips, IP validation/reassembly/
//! routing, UDP demux, and byte-level TCP connection scenarios.

use super::error::NetError;
use super::ethernet::{EthernetFrame, EthernetManager, MacAddress, NetDevice};
use super::ip::{self, checksum, Ipv4Addr, Ipv4Header, IpLayer};
use super::tcp::{self, TcpHeader, TcpLayer, TcpState};
use super::udp::{IpTx, UdpHeader, UdpLayer};

use spin::Mutex;
use std::boxed::Box;
use std::vec::Vec;

// ============================================================================
// TEST DOUBLES
// ============================================================================

/// Captures frames the IP layer hands to the "hardware".
struct CaptureDevice {
    mac: [u8; 6],
    mtu: usize,
    sent: Mutex<Vec<([u8; 6], u16, Vec<u8>)>>,
}

impl CaptureDevice {
    fn leaked(mtu: usize) -> &'static CaptureDevice {
        Box::leak(Box::new(CaptureDevice {
            mac: [0x52, 0x54, 0x00, 0xAA, 0xBB, 0xCC],
            mtu,
            sent: Mutex::new(Vec::new()),
        }))
    }

    fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }

    fn last_sent(&self) -> ([u8; 6], u16, Vec<u8>) {
        self.sent.lock().last().cloned().expect("a frame was sent")
    }
}

impl NetDevice for CaptureDevice {
    fn mac_address(&self) -> [u8; 6] {
        self.mac
    }

    fn mtu(&self) -> usize {
        self.mtu
    }

    fn send_frame(&self, dest: [u8; 6], ethertype: u16, payload: &[u8]) -> bool {
        self.sent.lock().push((dest, ethertype, payload.to_vec()));
        true
    }
}

/// Captures datagrams the socket layers push toward IP.
struct CaptureTx {
    sent: Mutex<Vec<(Ipv4Addr, u8, Vec<u8>)>>,
}

impl CaptureTx {
    fn leaked() -> &'static CaptureTx {
        Box::leak(Box::new(CaptureTx { sent: Mutex::new(Vec::new()) }))
    }

    fn count(&self) -> usize {
        self.sent.lock().len()
    }

    fn segment(&self, index: usize) -> Vec<u8> {
        self.sent.lock()[index].2.clone()
    }

    fn last(&self) -> (Ipv4Addr, u8, Vec<u8>) {
        self.sent.lock().last().cloned().expect("a packet was sent")
    }
}

impl IpTx for CaptureTx {
    fn send(&self, destination: Ipv4Addr, protocol: u8, payload: &[u8]) -> Result<(), NetError> {
        self.sent.lock().push((destination, protocol, payload.to_vec()));
        Ok(())
    }
}

const LOCAL: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 10);
const PEER: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 20);
const MASK: Ipv4Addr = Ipv4Addr::new(255, 255, 255, 0);

fn ip_packet(source: Ipv4Addr, destination: Ipv4Addr, protocol: u8, payload: &[u8]) -> Vec<u8> {
    let header = ip::build_header(source, destination, protocol, 7, payload.len());
    let mut packet = header.to_vec();
    packet.extend_from_slice(payload);
    packet
}

fn fragment(
    source: Ipv4Addr,
    destination: Ipv4Addr,
    id: u16,
    offset_units: u16,
    more: bool,
    payload: &[u8],
) -> Vec<u8> {
    let mut header = ip::build_header(source, destination, ip::IP_PROTOCOL_UDP, id, payload.len());
    header[4..6].copy_from_slice(&id.to_be_bytes());
    let flags_fragment = offset_units | if more { 0x2000 } else { 0 };
    header[6..8].copy_from_slice(&flags_fragment.to_be_bytes());
    // Re-finalize the checksum after the fragment fields.
    header[10] = 0;
    header[11] = 0;
    let sum = checksum(&header);
    header[10..12].copy_from_slice(&sum.to_be_bytes());

    let mut packet = header.to_vec();
    packet.extend_from_slice(payload);
    packet
}

// ============================================================================
// ETHERNET
// ============================================================================

#[test]
fn test_frame_parse() {
    let mut data = Vec::new();
    data.extend_from_slice(&[1, 2, 3, 4, 5, 6]);
    data.extend_from_slice(&[7, 8, 9, 10, 11, 12]);
    data.extend_from_slice(&[0x08, 0x00]);
    data.extend_from_slice(b"hello");

    let frame = EthernetFrame::parse(&data).unwrap();
    assert_eq!(frame.dst_mac, [1, 2, 3, 4, 5, 6]);
    assert_eq!(frame.src_mac, [7, 8, 9, 10, 11, 12]);
    assert_eq!(frame.ethertype, 0x0800);
    assert_eq!(frame.payload, b"hello");

    assert!(EthernetFrame::parse(&data[..10]).is_none());
}

#[test]
fn test_mac_address_helpers() {
    assert!(MacAddress::broadcast().is_broadcast());
    assert!(!MacAddress::zero().is_broadcast());
    assert_eq!(
        std::format!("{}", MacAddress([0xDE, 0xAD, 0xBE, 0xEF, 0x00, 0x01])),
        "de:ad:be:ef:00:01"
    );
}

#[test]
fn test_ethertype_dispatch() {
    static SEEN: Mutex<Vec<u16>> = Mutex::new(Vec::new());
    fn callback(_src: [u8; 6], _dst: [u8; 6], ethertype: u16, payload: &[u8]) {
        assert_eq!(payload, b"x");
        SEEN.lock().push(ethertype);
    }

    let mut manager = EthernetManager::new();
    manager.register_callback(0x0800, callback);

    let mut frame = Vec::new();
    frame.extend_from_slice(&[0xFF; 6]);
    frame.extend_from_slice(&[1; 6]);
    frame.extend_from_slice(&[0x08, 0x00]);
    frame.push(b'x');
    manager.deliver_frame(&frame);

    // An unregistered ethertype goes nowhere.
    frame[12] = 0x86;
    frame[13] = 0xDD;
    manager.deliver_frame(&frame);

    assert_eq!(*SEEN.lock(), [0x0800]);
}

// ============================================================================
// IPV4 HEADER
// ============================================================================

#[test]
fn test_header_roundtrip() {
    let header = ip::build_header(LOCAL, PEER, 17, 42, 100);
    let parsed = Ipv4Header::parse(&header).expect("header with a valid checksum");

    assert_eq!(parsed.ihl, 5);
    assert_eq!(parsed.total_length, 120);
    assert_eq!(parsed.identification, 42);
    assert_eq!(parsed.ttl, 64);
    assert_eq!(parsed.protocol, 17);
    assert_eq!(parsed.source, LOCAL);
    assert_eq!(parsed.destination, PEER);
    assert!(!parsed.more_fragments);
    assert_eq!(parsed.fragment_offset, 0);
}

#[test]
fn test_header_rejects_corruption() {
    let mut header = ip::build_header(LOCAL, PEER, 6, 1, 0).to_vec();

    // Flipped payload byte breaks the checksum.
    let mut bad = header.clone();
    bad[8] = 13;
    assert!(Ipv4Header::parse(&bad).is_none());

    // Wrong version.
    let mut bad = header.clone();
    bad[0] = (6 << 4) | 5;
    assert!(Ipv4Header::parse(&bad).is_none());

    // IHL below 5.
    let mut bad = header.clone();
    bad[0] = (4 << 4) | 4;
    assert!(Ipv4Header::parse(&bad).is_none());

    // Truncated.
    header.truncate(10);
    assert!(Ipv4Header::parse(&header).is_none());
}

#[test]
fn test_checksum_ones_complement() {
    // RFC 1071 example bytes.
    let data = [0x00u8, 0x01, 0xF2, 0x03, 0xF4, 0xF5, 0xF6, 0xF7];
    assert_eq!(checksum(&data), !0xDDF2u16);
    // Odd-length tail is padded on the right.
    assert_eq!(checksum(&[0xFF]), !0xFF00u16);
}

// ============================================================================
// IP LAYER
// ============================================================================

#[test]
fn test_interface_adds_connected_and_default_routes() {
    let device = CaptureDevice::leaked(1500);
    let device_index = super::ethernet::register_device(device);
    let mut layer = IpLayer::new();

    let gateway = Ipv4Addr::new(192, 168, 1, 1);
    layer.add_interface(device_index, device, LOCAL, MASK, gateway);

    // Connected route.
    let route = layer.find_route(Ipv4Addr::new(192, 168, 1, 77)).unwrap();
    assert!(route.gateway.is_any());

    // Default route via the gateway.
    let route = layer.find_route(Ipv4Addr::new(8, 8, 8, 8)).unwrap();
    assert_eq!(route.gateway, gateway);
}

#[test]
fn test_no_route_without_default() {
    let device = CaptureDevice::leaked(1500);
    let device_index = super::ethernet::register_device(device);
    let mut layer = IpLayer::new();
    layer.add_interface(device_index, device, LOCAL, MASK, Ipv4Addr::any());

    assert!(layer.find_route(Ipv4Addr::new(8, 8, 8, 8)).is_none());
    assert_eq!(
        layer.send_packet(Ipv4Addr::new(8, 8, 8, 8), 17, b"x"),
        Err(NetError::NoRoute)
    );
}

#[test]
fn test_send_builds_valid_packet() {
    let device = CaptureDevice::leaked(1500);
    let device_index = super::ethernet::register_device(device);
    let mut layer = IpLayer::new();
    layer.add_interface(device_index, device, LOCAL, MASK, Ipv4Addr::any());

    layer.send_packet(PEER, 17, b"payload").unwrap();

    let (dest_mac, ethertype, packet) = device.last_sent();
    assert_eq!(ethertype, 0x0800);
    // ARP is absent: non-broadcast next hops get the all-zeros MAC.
    assert_eq!(dest_mac, [0; 6]);

    let header = Ipv4Header::parse(&packet).expect("valid header on the wire");
    assert_eq!(header.source, LOCAL);
    assert_eq!(header.destination, PEER);
    assert_eq!(&packet[20..], b"payload");
}

#[test]
fn test_limited_broadcast_uses_broadcast_mac() {
    let device = CaptureDevice::leaked(1500);
    let device_index = super::ethernet::register_device(device);
    let mut layer = IpLayer::new();
    layer.add_interface(device_index, device, LOCAL, MASK, Ipv4Addr::any());
    layer
        .add_route(Ipv4Addr::broadcast(), Ipv4Addr::broadcast(), Ipv4Addr::any(), 0, 0)
        .unwrap();

    layer.send_packet(Ipv4Addr::broadcast(), 17, b"x").unwrap();
    let (dest_mac, _, _) = device.last_sent();
    assert_eq!(dest_mac, [0xFF; 6]);
}

#[test]
fn test_oversize_send_rejected_not_truncated() {
    let device = CaptureDevice::leaked(600);
    let device_index = super::ethernet::register_device(device);
    let mut layer = IpLayer::new();
    layer.add_interface(device_index, device, LOCAL, MASK, Ipv4Addr::any());

    let payload = std::vec![0u8; 600];
    assert_eq!(
        layer.send_packet(PEER, 17, &payload),
        Err(NetError::OversizeForMtu)
    );
    assert_eq!(device.sent_count(), 0);
}

#[test]
fn test_reassembly_in_offset_order() {
    let mut layer = IpLayer::new();

    static REASSEMBLED: Mutex<Vec<Vec<u8>>> = Mutex::new(Vec::new());
    fn handler(_src: Ipv4Addr, _dst: Ipv4Addr, payload: &[u8]) {
        REASSEMBLED.lock().push(payload.to_vec());
    }
    layer.register_handler(200, handler);

    // 16 bytes split as 8 + 8, arriving out of order, protocol 200 to
    // keep this test isolated from the UDP/TCP ones.
    let first = fragment(LOCAL, PEER, 99, 0, true, b"AAAAAAAA");
    let second = fragment(LOCAL, PEER, 99, 1, false, b"BBBBBBBB");
    let mut first_pkt = first.clone();
    first_pkt[9] = 200;
    refinalize(&mut first_pkt);
    let mut second_pkt = second.clone();
    second_pkt[9] = 200;
    refinalize(&mut second_pkt);

    layer.process_frame([0; 6], [0; 6], &second_pkt);
    assert_eq!(REASSEMBLED.lock().len(), 0);
    assert_eq!(layer.fragment_buffer_count(), 1);

    layer.process_frame([0; 6], [0; 6], &first_pkt);
    let seen = REASSEMBLED.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0], b"AAAAAAAABBBBBBBB");
    drop(seen);
    assert_eq!(layer.fragment_buffer_count(), 0);
}

/// Recompute the header checksum after in-place edits.
fn refinalize(packet: &mut [u8]) {
    packet[10] = 0;
    packet[11] = 0;
    let sum = checksum(&packet[..20]);
    packet[10..12].copy_from_slice(&sum.to_be_bytes());
}

#[test]
fn test_fragment_buffers_reaped_after_timeout() {
    let mut layer = IpLayer::new();

    let lone = fragment(LOCAL, PEER, 5, 0, true, b"AAAAAAAA");
    layer.process_frame([0; 6], [0; 6], &lone);
    assert_eq!(layer.fragment_buffer_count(), 1);

    // Just under the timeout: kept. Past it: reaped.
    let now = crate::time::cycles();
    layer.poll(now + crate::time::ms_to_cycles(ip::FRAGMENT_TIMEOUT_MS) / 2);
    assert_eq!(layer.fragment_buffer_count(), 1);
    layer.poll(now + crate::time::ms_to_cycles(ip::FRAGMENT_TIMEOUT_MS + 1000));
    assert_eq!(layer.fragment_buffer_count(), 0);
}

// ============================================================================
// UDP
// ============================================================================

#[test]
fn test_udp_header_roundtrip() {
    let header = UdpHeader::build(5353, 53, 11);
    let parsed = UdpHeader::parse(&header).unwrap();
    assert_eq!(parsed.source_port, 5353);
    assert_eq!(parsed.destination_port, 53);
    assert_eq!(parsed.length, 19);
    assert_eq!(parsed.checksum, 0);
}

#[test]
fn test_udp_receive_scenario() {
    // Socket bound to (192.168.1.10, 5353); a datagram for port 5353
    // with payload "hello" is delivered with its source intact.
    let tx = CaptureTx::leaked();
    let mut layer = UdpLayer::new(tx);

    let socket = layer.create_socket();
    layer.bind(socket, LOCAL, 5353).unwrap();

    let mut datagram = UdpHeader::build(40000, 5353, 5).to_vec();
    datagram.extend_from_slice(b"hello");
    layer.process_packet(PEER, LOCAL, &datagram);

    let mut buf = [0u8; 64];
    let (len, src, src_port) = layer
        .try_receive_from(socket, &mut buf)
        .unwrap()
        .expect("datagram queued");
    assert_eq!(len, 5);
    assert_eq!(&buf[..5], b"hello");
    assert_eq!(src, PEER);
    assert_eq!(src_port, 40000);

    // Queue drained.
    assert!(layer.try_receive_from(socket, &mut buf).unwrap().is_none());
}

#[test]
fn test_udp_demux_misses_are_dropped() {
    let tx = CaptureTx::leaked();
    let mut layer = UdpLayer::new(tx);
    let socket = layer.create_socket();
    layer.bind(socket, LOCAL, 5353).unwrap();

    // Wrong port.
    let mut datagram = UdpHeader::build(1, 9999, 1).to_vec();
    datagram.push(b'x');
    layer.process_packet(PEER, LOCAL, &datagram);

    // Wrong destination address.
    let mut datagram = UdpHeader::build(1, 5353, 1).to_vec();
    datagram.push(b'x');
    layer.process_packet(PEER, Ipv4Addr::new(10, 0, 0, 1), &datagram);

    assert_eq!(layer.queued_datagrams(socket), 0);
}

#[test]
fn test_udp_wildcard_binding_catches_all_addresses() {
    let tx = CaptureTx::leaked();
    let mut layer = UdpLayer::new(tx);
    let socket = layer.create_socket();
    layer.bind(socket, Ipv4Addr::any(), 5353).unwrap();

    let mut datagram = UdpHeader::build(1, 5353, 1).to_vec();
    datagram.push(b'x');
    layer.process_packet(PEER, Ipv4Addr::new(10, 9, 8, 7), &datagram);
    assert_eq!(layer.queued_datagrams(socket), 1);
}

#[test]
fn test_udp_connected_socket_filters_peers() {
    let tx = CaptureTx::leaked();
    let mut layer = UdpLayer::new(tx);
    let socket = layer.create_socket();
    layer.bind(socket, LOCAL, 7000).unwrap();
    layer.connect(socket, PEER, 8000).unwrap();

    let mut from_peer = UdpHeader::build(8000, 7000, 2).to_vec();
    from_peer.extend_from_slice(b"ok");
    layer.process_packet(PEER, LOCAL, &from_peer);

    let mut from_stranger = UdpHeader::build(8000, 7000, 2).to_vec();
    from_stranger.extend_from_slice(b"no");
    layer.process_packet(Ipv4Addr::new(10, 0, 0, 1), LOCAL, &from_stranger);

    assert_eq!(layer.queued_datagrams(socket), 1);
}

#[test]
fn test_udp_duplicate_bind_fails() {
    let tx = CaptureTx::leaked();
    let mut layer = UdpLayer::new(tx);
    let a = layer.create_socket();
    let b = layer.create_socket();
    layer.bind(a, LOCAL, 5353).unwrap();
    assert_eq!(layer.bind(b, LOCAL, 5353), Err(NetError::PortInUse));
}

#[test]
fn test_udp_ephemeral_bind() {
    let tx = CaptureTx::leaked();
    let mut layer = UdpLayer::new(tx);
    let a = layer.create_socket();
    let b = layer.create_socket();
    let port_a = layer.bind(a, LOCAL, 0).unwrap();
    let port_b = layer.bind(b, LOCAL, 0).unwrap();
    assert!(port_a >= 1024);
    assert_ne!(port_a, port_b);
}

#[test]
fn test_udp_send_limits_and_framing() {
    let tx = CaptureTx::leaked();
    let mut layer = UdpLayer::new(tx);
    let socket = layer.create_socket();
    layer.bind(socket, LOCAL, 7000).unwrap();

    let sent = layer.send_to(socket, PEER, 53, b"query").unwrap();
    assert_eq!(sent, 5);
    let (dest, protocol, datagram) = tx.last();
    assert_eq!(dest, PEER);
    assert_eq!(protocol, 17);
    let header = UdpHeader::parse(&datagram).unwrap();
    assert_eq!(header.source_port, 7000);
    assert_eq!(header.destination_port, 53);
    assert_eq!(header.length as usize, 8 + 5);
    assert_eq!(&datagram[8..], b"query");

    let oversize = std::vec![0u8; super::udp::MAX_PAYLOAD + 1];
    assert_eq!(
        layer.send_to(socket, PEER, 53, &oversize),
        Err(NetError::PayloadTooLarge)
    );
}

// ============================================================================
// TCP
// ============================================================================

fn tcp_segment(
    src: Ipv4Addr,
    dst: Ipv4Addr,
    src_port: u16,
    dst_port: u16,
    seq: u32,
    ack: u32,
    flags: u8,
    window: u16,
    payload: &[u8],
) -> Vec<u8> {
    tcp::build_segment(src, dst, src_port, dst_port, seq, ack, flags, window, payload)
}

/// Listener on LOCAL:80; returns (layer, tx, listener handle).
fn listening_layer() -> (TcpLayer, &'static CaptureTx, u32) {
    let tx = CaptureTx::leaked();
    let mut layer = TcpLayer::new(tx);
    let listener = layer.create_socket();
    layer.bind(listener, LOCAL, 80).unwrap();
    layer.listen(listener).unwrap();
    (layer, tx, listener)
}

/// Drive the passive handshake: SYN in, SYN-ACK captured, ACK in.
/// Returns (connection handle, server ISS).
fn establish(layer: &mut TcpLayer, tx: &CaptureTx, listener: u32, client_seq: u32) -> (u32, u32) {
    let syn = tcp_segment(PEER, LOCAL, 40000, 80, client_seq, 0, tcp::FLAG_SYN, 65535, &[]);
    layer.process_packet(PEER, LOCAL, &syn);

    let syn_ack = TcpHeader::parse(&tx.segment(tx.count() - 1)).unwrap();
    assert_eq!(syn_ack.flags, tcp::FLAG_SYN | tcp::FLAG_ACK);
    assert_eq!(syn_ack.acknowledgment, client_seq.wrapping_add(1));
    let iss = syn_ack.sequence;

    let ack = tcp_segment(
        PEER,
        LOCAL,
        40000,
        80,
        client_seq.wrapping_add(1),
        iss.wrapping_add(1),
        tcp::FLAG_ACK,
        65535,
        &[],
    );
    layer.process_packet(PEER, LOCAL, &ack);

    let handle = layer.accept(listener).expect("connection in the backlog");
    assert_eq!(layer.state(handle), Some(TcpState::Established));
    (handle, iss)
}

#[test]
fn test_tcp_header_roundtrip() {
    let segment = tcp_segment(LOCAL, PEER, 80, 40000, 100, 200, tcp::FLAG_ACK | tcp::FLAG_PSH, 8192, b"data");
    let header = TcpHeader::parse(&segment).unwrap();
    assert_eq!(header.source_port, 80);
    assert_eq!(header.destination_port, 40000);
    assert_eq!(header.sequence, 100);
    assert_eq!(header.acknowledgment, 200);
    assert_eq!(header.data_offset, 5);
    assert_eq!(header.window, 8192);
    assert!(header.has(tcp::FLAG_ACK));
    assert!(header.has(tcp::FLAG_PSH));
    assert!(tcp::checksum_valid(LOCAL, PEER, &segment));
}

#[test]
fn test_tcp_checksum_detects_corruption() {
    let mut segment = tcp_segment(LOCAL, PEER, 80, 40000, 1, 2, tcp::FLAG_ACK, 512, b"data");
    assert!(tcp::checksum_valid(LOCAL, PEER, &segment));
    segment[25] ^= 0xFF;
    assert!(!tcp::checksum_valid(LOCAL, PEER, &segment));
    // Pseudo-header covers the addresses too.
    let fixed = tcp_segment(LOCAL, PEER, 80, 40000, 1, 2, tcp::FLAG_ACK, 512, b"data");
    assert!(!tcp::checksum_valid(Ipv4Addr::new(1, 2, 3, 4), PEER, &fixed));
}

#[test]
fn test_tcp_listen_handshake_and_data() {
    // The full passive-open scenario: SYN seq=100 answered with a
    // SYN-ACK acking 101; after the peer's ACK the connection is
    // Established; "GET " at seq=101 is acked with 105 and readable.
    let (mut layer, tx, listener) = listening_layer();
    let (handle, _iss) = establish(&mut layer, tx, listener, 100);

    let before = tx.count();
    let data = tcp_segment(PEER, LOCAL, 40000, 80, 101, 0, tcp::FLAG_ACK, 65535, b"GET ");
    layer.process_packet(PEER, LOCAL, &data);

    let ack = TcpHeader::parse(&tx.segment(before)).unwrap();
    assert_eq!(ack.flags & tcp::FLAG_ACK, tcp::FLAG_ACK);
    assert_eq!(ack.acknowledgment, 105);

    let mut buf = [0u8; 16];
    let read = layer.try_receive(handle, &mut buf).unwrap();
    assert_eq!(read, 4);
    assert_eq!(&buf[..4], b"GET ");
}

#[test]
fn test_tcp_checksum_failures_dropped_silently() {
    let (mut layer, tx, _listener) = listening_layer();

    let mut syn = tcp_segment(PEER, LOCAL, 40000, 80, 100, 0, tcp::FLAG_SYN, 65535, &[]);
    syn[16] ^= 0x55;
    layer.process_packet(PEER, LOCAL, &syn);

    assert_eq!(tx.count(), 0);
    assert_eq!(layer.connection_count(), 0);
}

#[test]
fn test_tcp_out_of_order_reassembly() {
    let (mut layer, tx, listener) = listening_layer();
    let (handle, _) = establish(&mut layer, tx, listener, 1000);

    // Second segment first: buffered, not readable, and the ACK still
    // asks for the expected in-order byte.
    let seg2 = tcp_segment(PEER, LOCAL, 40000, 80, 1005, 0, tcp::FLAG_ACK, 65535, b"WORLD");
    layer.process_packet(PEER, LOCAL, &seg2);
    assert_eq!(layer.receive_next(handle), Some(1001));

    let mut buf = [0u8; 32];
    assert_eq!(layer.try_receive(handle, &mut buf).unwrap(), 0);

    // The gap closes: both segments drain in order.
    let seg1 = tcp_segment(PEER, LOCAL, 40000, 80, 1001, 0, tcp::FLAG_ACK, 65535, b"HELO");
    layer.process_packet(PEER, LOCAL, &seg1);
    assert_eq!(layer.receive_next(handle), Some(1010));

    let read = layer.try_receive(handle, &mut buf).unwrap();
    assert_eq!(&buf[..read], b"HELOWORLD");
}

#[test]
fn test_tcp_duplicate_data_not_delivered_twice() {
    let (mut layer, tx, listener) = listening_layer();
    let (handle, _) = establish(&mut layer, tx, listener, 500);

    let seg = tcp_segment(PEER, LOCAL, 40000, 80, 501, 0, tcp::FLAG_ACK, 65535, b"ONCE");
    layer.process_packet(PEER, LOCAL, &seg);
    layer.process_packet(PEER, LOCAL, &seg);

    assert_eq!(layer.receive_next(handle), Some(505));
    let mut buf = [0u8; 32];
    let read = layer.try_receive(handle, &mut buf).unwrap();
    assert_eq!(&buf[..read], b"ONCE");
    assert_eq!(layer.try_receive(handle, &mut buf).unwrap(), 0);
}

#[test]
fn test_tcp_receive_next_monotonic() {
    let (mut layer, tx, listener) = listening_layer();
    let (handle, _) = establish(&mut layer, tx, listener, 200);

    let mut last = layer.receive_next(handle).unwrap();
    let stale = tcp_segment(PEER, LOCAL, 40000, 80, 150, 0, tcp::FLAG_ACK, 65535, b"old");
    layer.process_packet(PEER, LOCAL, &stale);
    assert!(layer.receive_next(handle).unwrap() >= last);
    last = layer.receive_next(handle).unwrap();

    let fresh = tcp_segment(PEER, LOCAL, 40000, 80, 201, 0, tcp::FLAG_ACK, 65535, b"new");
    layer.process_packet(PEER, LOCAL, &fresh);
    assert!(layer.receive_next(handle).unwrap() >= last);
}

#[test]
fn test_tcp_send_respects_window() {
    let (mut layer, tx, listener) = listening_layer();
    let (handle, iss) = establish(&mut layer, tx, listener, 300);

    // The peer advertises a 1000-byte window.
    let window_update = tcp_segment(
        PEER,
        LOCAL,
        40000,
        80,
        301,
        iss.wrapping_add(1),
        tcp::FLAG_ACK,
        1000,
        &[],
    );
    layer.process_packet(PEER, LOCAL, &window_update);

    let payload = std::vec![7u8; 4000];
    let accepted = layer.send(handle, &payload, 0).unwrap();
    // One MSS chunk goes out, then the in-flight span covers the window.
    assert_eq!(accepted, 1460);
    assert_eq!(layer.unacked_bytes(handle), 1460);

    // Back-pressure: nothing more is accepted.
    assert_eq!(layer.send(handle, &payload, 0).unwrap(), 0);

    // The peer acks everything: sending resumes.
    let ack = tcp_segment(
        PEER,
        LOCAL,
        40000,
        80,
        301,
        iss.wrapping_add(1).wrapping_add(1460),
        tcp::FLAG_ACK,
        4000,
        &[],
    );
    layer.process_packet(PEER, LOCAL, &ack);
    assert_eq!(layer.unacked_bytes(handle), 0);
    assert!(layer.send(handle, &payload, 0).unwrap() > 0);
}

#[test]
fn test_tcp_acked_data_never_retransmits() {
    let (mut layer, tx, listener) = listening_layer();
    let (handle, iss) = establish(&mut layer, tx, listener, 700);

    layer.send(handle, b"payload", 0).unwrap();
    let ack = tcp_segment(
        PEER,
        LOCAL,
        40000,
        80,
        701,
        iss.wrapping_add(1).wrapping_add(7),
        tcp::FLAG_ACK,
        65535,
        &[],
    );
    layer.process_packet(PEER, LOCAL, &ack);

    let before = tx.count();
    layer.poll(crate::time::ms_to_cycles(tcp::RETRANSMIT_TIMEOUT_MS) * 100);
    assert_eq!(tx.count(), before);
    assert_eq!(layer.retransmit_count(handle), 0);
}

#[test]
fn test_tcp_retransmit_then_abort() {
    let (mut layer, tx, listener) = listening_layer();
    let (handle, _) = establish(&mut layer, tx, listener, 900);

    layer.send(handle, b"lost", 0).unwrap();
    let sent_after_data = tx.count();

    let step = crate::time::ms_to_cycles(tcp::RETRANSMIT_TIMEOUT_MS) + 1;
    let mut now = step;

    // Ten retransmissions are attempted...
    for i in 1..=tcp::MAX_RETRANSMITS {
        layer.poll(now);
        assert_eq!(tx.count(), sent_after_data + i as usize);
        assert_eq!(layer.retransmit_count(handle), i);
        now += step;
    }

    // ...the eleventh expiry aborts the connection with a RST.
    layer.poll(now);
    assert_eq!(layer.state(handle), Some(TcpState::Closed));
    let last = TcpHeader::parse(&tx.segment(tx.count() - 1)).unwrap();
    assert!(last.has(tcp::FLAG_RST));
    assert_eq!(layer.connection_count(), 0);
}

#[test]
fn test_tcp_fin_sequence_passive_side() {
    let (mut layer, tx, listener) = listening_layer();
    let (handle, _) = establish(&mut layer, tx, listener, 400);

    // Peer closes: FIN is acked and we land in CloseWait.
    let fin = tcp_segment(PEER, LOCAL, 40000, 80, 401, 0, tcp::FLAG_FIN | tcp::FLAG_ACK, 65535, &[]);
    layer.process_packet(PEER, LOCAL, &fin);
    assert_eq!(layer.state(handle), Some(TcpState::CloseWait));
    let ack = TcpHeader::parse(&tx.segment(tx.count() - 1)).unwrap();
    assert_eq!(ack.acknowledgment, 402);

    // Our close sends FIN and waits for the final ACK.
    layer.close(handle).unwrap();
    assert_eq!(layer.state(handle), Some(TcpState::LastAck));
    let our_fin = TcpHeader::parse(&tx.segment(tx.count() - 1)).unwrap();
    assert!(our_fin.has(tcp::FLAG_FIN));

    let last_ack = tcp_segment(
        PEER,
        LOCAL,
        40000,
        80,
        402,
        our_fin.sequence.wrapping_add(1),
        tcp::FLAG_ACK,
        65535,
        &[],
    );
    layer.process_packet(PEER, LOCAL, &last_ack);
    assert_eq!(layer.state(handle), Some(TcpState::Closed));
    assert_eq!(layer.connection_count(), 0);
}

#[test]
fn test_tcp_active_close_fin_wait_path() {
    let (mut layer, tx, listener) = listening_layer();
    let (handle, _) = establish(&mut layer, tx, listener, 600);

    layer.close(handle).unwrap();
    assert_eq!(layer.state(handle), Some(TcpState::FinWait1));
    let fin = TcpHeader::parse(&tx.segment(tx.count() - 1)).unwrap();
    assert!(fin.has(tcp::FLAG_FIN));

    // ACK of our FIN.
    let ack = tcp_segment(
        PEER,
        LOCAL,
        40000,
        80,
        601,
        fin.sequence.wrapping_add(1),
        tcp::FLAG_ACK,
        65535,
        &[],
    );
    layer.process_packet(PEER, LOCAL, &ack);
    assert_eq!(layer.state(handle), Some(TcpState::FinWait2));

    // Peer's FIN moves us to TimeWait and gets acked.
    let peer_fin = tcp_segment(PEER, LOCAL, 40000, 80, 601, 0, tcp::FLAG_FIN, 65535, &[]);
    layer.process_packet(PEER, LOCAL, &peer_fin);
    assert_eq!(layer.state(handle), Some(TcpState::TimeWait));
    let final_ack = TcpHeader::parse(&tx.segment(tx.count() - 1)).unwrap();
    assert_eq!(final_ack.acknowledgment, 602);
}

#[test]
fn test_tcp_rst_closes_from_any_state() {
    let (mut layer, tx, listener) = listening_layer();
    let (handle, _) = establish(&mut layer, tx, listener, 800);

    let rst = tcp_segment(PEER, LOCAL, 40000, 80, 801, 0, tcp::FLAG_RST, 0, &[]);
    layer.process_packet(PEER, LOCAL, &rst);
    assert_eq!(layer.state(handle), Some(TcpState::Closed));
    assert_eq!(layer.connection_count(), 0);
    let _ = tx;
}

#[test]
fn test_tcp_active_open_sends_syn() {
    let tx = CaptureTx::leaked();
    let mut layer = TcpLayer::new(tx);

    let socket = layer.create_socket();
    layer.bind(socket, LOCAL, 0).unwrap();
    layer.connect(socket, PEER, 80).unwrap();
    assert_eq!(layer.state(socket), Some(TcpState::SynSent));

    let syn = TcpHeader::parse(&tx.segment(0)).unwrap();
    assert_eq!(syn.flags, tcp::FLAG_SYN);
    assert_eq!(syn.destination_port, 80);

    // SYN-ACK completes the active open with our ACK.
    let syn_ack = tcp_segment(
        PEER,
        LOCAL,
        80,
        syn.source_port,
        5000,
        syn.sequence.wrapping_add(1),
        tcp::FLAG_SYN | tcp::FLAG_ACK,
        65535,
        &[],
    );
    layer.process_packet(PEER, LOCAL, &syn_ack);
    assert_eq!(layer.state(socket), Some(TcpState::Established));

    let ack = TcpHeader::parse(&tx.segment(tx.count() - 1)).unwrap();
    assert_eq!(ack.flags, tcp::FLAG_ACK);
    assert_eq!(ack.acknowledgment, 5001);
}

#[test]
fn test_tcp_syn_without_listener_ignored() {
    let tx = CaptureTx::leaked();
    let mut layer = TcpLayer::new(tx);

    let syn = tcp_segment(PEER, LOCAL, 40000, 81, 100, 0, tcp::FLAG_SYN, 65535, &[]);
    layer.process_packet(PEER, LOCAL, &syn);
    assert_eq!(tx.count(), 0);
    assert_eq!(layer.connection_count(), 0);
}
