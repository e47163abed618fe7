//! TCP/IP network stack: Ethernet dispatch, IPv4 with reassembly and
//! routing, UDP datagram sockets, TCP connection sockets.

pub mod error;
pub mod ethernet;
pub mod ip;
pub mod tcp;
pub mod udp;

#[cfg(test)]
mod tests;

pub use error::{NetError, NetResult};
pub use ip::Ipv4Addr;

/// Wire the layers together: Ethernet hands IPv4 frames to the IP layer,
/// the IP layer demuxes protocols 6 and 17 to TCP and UDP.
pub fn init() {
    ethernet::register_callback(ethernet::ETHERTYPE_IPV4, ip_frame_callback);
    ip::register_handler(ip::IP_PROTOCOL_UDP, udp_packet_handler);
    ip::register_handler(ip::IP_PROTOCOL_TCP, tcp_packet_handler);
    log_info!("NET", "network stack initialized");
}

fn ip_frame_callback(src_mac: [u8; 6], dst_mac: [u8; 6], _ethertype: u16, payload: &[u8]) {
    ip::process_frame(src_mac, dst_mac, payload);
}

fn udp_packet_handler(src: Ipv4Addr, dst: Ipv4Addr, payload: &[u8]) {
    udp::process_packet(src, dst, payload);
}

fn tcp_packet_handler(src: Ipv4Addr, dst: Ipv4Addr, payload: &[u8]) {
    tcp::process_packet(src, dst, payload);
}

/// Periodic maintenance: fragment reaping and TCP retransmission. Driven
/// from the timer path or the idle loop.
pub fn poll() {
    let now = crate::time::cycles();
    ip::poll(now);
    tcp::poll(now);
}
