//! IPv4: interfaces, routing, validation, fragment reassembly.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use spin::Mutex;

use super::error::{NetError, NetResult};
use super::ethernet::{self, MacAddress, NetDevice};

pub const IP_PROTOCOL_ICMP: u8 = 1;
pub const IP_PROTOCOL_TCP: u8 = 6;
pub const IP_PROTOCOL_UDP: u8 = 17;

pub const HEADER_LEN: usize = 20;
pub const DEFAULT_TTL: u8 = 64;

/// Reassembly buffers idle longer than this are reaped.
pub const FRAGMENT_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Ipv4Addr(pub [u8; 4]);

impl Ipv4Addr {
    pub const fn new(a: u8, b: u8, c: u8, d: u8) -> Self {
        Ipv4Addr([a, b, c, d])
    }

    pub const fn any() -> Self {
        Ipv4Addr([0; 4])
    }

    pub const fn broadcast() -> Self {
        Ipv4Addr([255; 4])
    }

    pub fn to_u32(self) -> u32 {
        u32::from_be_bytes(self.0)
    }

    pub fn from_u32(value: u32) -> Self {
        Ipv4Addr(value.to_be_bytes())
    }

    pub fn is_any(self) -> bool {
        self.0 == [0; 4]
    }

    pub fn is_broadcast(self) -> bool {
        self.0 == [255; 4]
    }

    /// Network part under `mask`.
    pub fn masked(self, mask: Ipv4Addr) -> Ipv4Addr {
        Ipv4Addr::from_u32(self.to_u32() & mask.to_u32())
    }
}

impl core::fmt::Display for Ipv4Addr {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}.{}.{}.{}", self.0[0], self.0[1], self.0[2], self.0[3])
    }
}

/// 16-bit one's-complement sum, the checksum used by the IPv4 header and
/// the TCP/UDP pseudo-header disciplines.
pub fn checksum(data: &[u8]) -> u16 {
    let mut sum = 0u32;
    let mut chunks = data.chunks_exact(2);
    for chunk in &mut chunks {
        sum += u16::from_be_bytes([chunk[0], chunk[1]]) as u32;
    }
    if let [last] = chunks.remainder() {
        sum += (*last as u32) << 8;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

/// Parsed IPv4 header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Header {
    pub ihl: u8,
    pub total_length: u16,
    pub identification: u16,
    pub fragment_offset: u16,
    pub more_fragments: bool,
    pub ttl: u8,
    pub protocol: u8,
    pub header_checksum: u16,
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
}

impl Ipv4Header {
    /// Parse and validate: version 4, IHL at least 5, lengths consistent,
    /// checksum verifying. Anything else is silently unusable.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < HEADER_LEN {
            return None;
        }
        let version = data[0] >> 4;
        let ihl = data[0] & 0x0F;
        if version != 4 || ihl < 5 {
            return None;
        }
        let header_len = ihl as usize * 4;
        if data.len() < header_len {
            return None;
        }

        let total_length = u16::from_be_bytes([data[2], data[3]]);
        if (total_length as usize) < header_len || total_length as usize > data.len() {
            return None;
        }

        if checksum_over_header(data, header_len) != 0 {
            return None;
        }

        let flags_fragment = u16::from_be_bytes([data[6], data[7]]);
        Some(Ipv4Header {
            ihl,
            total_length,
            identification: u16::from_be_bytes([data[4], data[5]]),
            fragment_offset: flags_fragment & 0x1FFF,
            more_fragments: flags_fragment & 0x2000 != 0,
            ttl: data[8],
            protocol: data[9],
            header_checksum: u16::from_be_bytes([data[10], data[11]]),
            source: Ipv4Addr([data[12], data[13], data[14], data[15]]),
            destination: Ipv4Addr([data[16], data[17], data[18], data[19]]),
        })
    }

    pub fn header_len(&self) -> usize {
        self.ihl as usize * 4
    }
}

/// Checksum over the header with the checksum field included: a valid
/// header sums to zero.
fn checksum_over_header(data: &[u8], header_len: usize) -> u16 {
    let mut sum = 0u32;
    for chunk in data[..header_len].chunks_exact(2) {
        sum += u16::from_be_bytes([chunk[0], chunk[1]]) as u32;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

/// Serialize a 20-byte header, checksum computed last.
pub fn build_header(
    source: Ipv4Addr,
    destination: Ipv4Addr,
    protocol: u8,
    identification: u16,
    payload_len: usize,
) -> [u8; HEADER_LEN] {
    let mut header = [0u8; HEADER_LEN];
    header[0] = (4 << 4) | 5;
    let total = (HEADER_LEN + payload_len) as u16;
    header[2..4].copy_from_slice(&total.to_be_bytes());
    header[4..6].copy_from_slice(&identification.to_be_bytes());
    header[8] = DEFAULT_TTL;
    header[9] = protocol;
    header[12..16].copy_from_slice(&source.0);
    header[16..20].copy_from_slice(&destination.0);

    let sum = checksum(&header);
    header[10..12].copy_from_slice(&sum.to_be_bytes());
    header
}

pub struct Interface {
    pub index: u32,
    pub device_index: u32,
    pub address: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub mac_address: [u8; 6],
    pub mtu: usize,
    pub is_up: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct Route {
    pub network: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub interface_index: u32,
    pub metric: u32,
}

struct FragmentBuffer {
    /// offset -> bytes, kept sorted by the map.
    fragments: BTreeMap<u16, Vec<u8>>,
    /// Known once the MF=0 fragment arrives.
    total_length: Option<usize>,
    last_access: u64,
}

type FragmentKey = (Ipv4Addr, Ipv4Addr, u16, u8);

pub type ProtocolHandler = fn(src: Ipv4Addr, dst: Ipv4Addr, payload: &[u8]);

pub struct IpLayer {
    interfaces: Vec<Interface>,
    routes: Vec<Route>,
    fragments: BTreeMap<FragmentKey, FragmentBuffer>,
    handlers: BTreeMap<u8, Vec<ProtocolHandler>>,
    identification_counter: u16,
}

impl IpLayer {
    pub const fn new() -> Self {
        IpLayer {
            interfaces: Vec::new(),
            routes: Vec::new(),
            fragments: BTreeMap::new(),
            handlers: BTreeMap::new(),
            identification_counter: 0,
        }
    }

    /// Attach an address to a device. A connected route is appended
    /// automatically, and a default route when a gateway is given.
    pub fn add_interface(
        &mut self,
        device_index: u32,
        device: &dyn NetDevice,
        address: Ipv4Addr,
        netmask: Ipv4Addr,
        gateway: Ipv4Addr,
    ) -> u32 {
        let index = self.interfaces.len() as u32;
        self.interfaces.push(Interface {
            index,
            device_index,
            address,
            netmask,
            gateway,
            mac_address: device.mac_address(),
            mtu: device.mtu(),
            is_up: true,
        });

        self.routes.push(Route {
            network: address.masked(netmask),
            netmask,
            gateway: Ipv4Addr::any(),
            interface_index: index,
            metric: 0,
        });

        if !gateway.is_any() {
            self.routes.push(Route {
                network: Ipv4Addr::any(),
                netmask: Ipv4Addr::any(),
                gateway,
                interface_index: index,
                metric: 1,
            });
        }

        log_info!("IP", "interface {} up: {} mtu {}", index, address, self.interfaces[index as usize].mtu);
        index
    }

    pub fn interface(&self, index: u32) -> Option<&Interface> {
        self.interfaces.get(index as usize)
    }

    pub fn add_route(
        &mut self,
        network: Ipv4Addr,
        netmask: Ipv4Addr,
        gateway: Ipv4Addr,
        interface_index: u32,
        metric: u32,
    ) -> NetResult<()> {
        if interface_index as usize >= self.interfaces.len() {
            return Err(NetError::NoInterface);
        }
        self.routes.push(Route { network, netmask, gateway, interface_index, metric });
        Ok(())
    }

    /// First matching entry wins: `network == destination & netmask`.
    pub fn find_route(&self, destination: Ipv4Addr) -> Option<&Route> {
        self.routes
            .iter()
            .find(|r| destination.masked(r.netmask) == r.network)
    }

    pub fn register_handler(&mut self, protocol: u8, handler: ProtocolHandler) {
        self.handlers.entry(protocol).or_default().push(handler);
    }

    fn dispatch(&self, source: Ipv4Addr, destination: Ipv4Addr, protocol: u8, payload: &[u8]) {
        if let Some(handlers) = self.handlers.get(&protocol) {
            for handler in handlers {
                handler(source, destination, payload);
            }
        }
    }

    /// Entry from the Ethernet IPv4 callback: validate and, for
    /// fragments, reassemble. Returns a completed datagram ready for
    /// protocol dispatch.
    pub fn ingest_frame(&mut self, data: &[u8]) -> Option<(Ipv4Addr, Ipv4Addr, u8, Vec<u8>)> {
        let Some(header) = Ipv4Header::parse(data) else {
            log_debug!("IP", "invalid packet dropped ({} bytes)", data.len());
            return None;
        };

        let payload = &data[header.header_len()..header.total_length as usize];

        if header.fragment_offset > 0 || header.more_fragments {
            return self.process_fragment(&header, payload);
        }

        Some((header.source, header.destination, header.protocol, payload.to_vec()))
    }

    /// Ingest and dispatch in one step.
    pub fn process_frame(&mut self, _src_mac: [u8; 6], _dst_mac: [u8; 6], data: &[u8]) {
        if let Some((source, destination, protocol, payload)) = self.ingest_frame(data) {
            self.dispatch(source, destination, protocol, &payload);
        }
    }

    pub fn handlers_for(&self, protocol: u8) -> Vec<ProtocolHandler> {
        self.handlers.get(&protocol).cloned().unwrap_or_default()
    }

    /// Collect a fragment; the buffer completes and is deleted once
    /// coverage is contiguous from zero to the length learned from the
    /// final fragment.
    fn process_fragment(
        &mut self,
        header: &Ipv4Header,
        payload: &[u8],
    ) -> Option<(Ipv4Addr, Ipv4Addr, u8, Vec<u8>)> {
        let key = (header.source, header.destination, header.identification, header.protocol);
        let offset = header.fragment_offset * 8;

        let buffer = self.fragments.entry(key).or_insert_with(|| FragmentBuffer {
            fragments: BTreeMap::new(),
            total_length: None,
            last_access: 0,
        });
        buffer.last_access = crate::time::cycles();
        buffer.fragments.insert(offset, payload.to_vec());

        if !header.more_fragments {
            buffer.total_length = Some(offset as usize + payload.len());
        }

        let total = buffer.total_length?;

        // Contiguity check over the sorted offsets.
        let mut covered = 0usize;
        for (&frag_offset, data) in buffer.fragments.iter() {
            if frag_offset as usize != covered {
                return None;
            }
            covered += data.len();
        }
        if covered != total {
            return None;
        }

        let mut reassembled = Vec::with_capacity(total);
        for data in buffer.fragments.values() {
            reassembled.extend_from_slice(data);
        }
        let (source, destination, _, protocol) = key;
        self.fragments.remove(&key);

        Some((source, destination, protocol, reassembled))
    }

    /// Reap reassembly buffers idle past the timeout.
    pub fn poll(&mut self, now: u64) {
        let timeout = crate::time::ms_to_cycles(FRAGMENT_TIMEOUT_MS);
        let before = self.fragments.len();
        self.fragments.retain(|_, b| now.saturating_sub(b.last_access) <= timeout);
        let reaped = before - self.fragments.len();
        if reaped > 0 {
            log_debug!("IP", "reaped {} stale fragment buffers", reaped);
        }
    }

    pub fn fragment_buffer_count(&self) -> usize {
        self.fragments.len()
    }

    /// Route, frame, and transmit one packet. Payloads that do not fit
    /// the interface MTU are rejected outright: this layer does not
    /// fragment on send.
    ///
    /// Next-hop MAC selection is a stand-in until an ARP resolver lands:
    /// broadcast for the limited-broadcast destination, all-zeros
    /// otherwise.
    pub fn send_packet(&mut self, destination: Ipv4Addr, protocol: u8, payload: &[u8]) -> NetResult<()> {
        let route = *self.find_route(destination).ok_or_else(|| {
            log_err!("IP", "no route to {}", destination);
            NetError::NoRoute
        })?;
        let interface = self
            .interfaces
            .get(route.interface_index as usize)
            .ok_or(NetError::NoInterface)?;

        if HEADER_LEN + payload.len() > interface.mtu {
            return Err(NetError::OversizeForMtu);
        }

        let identification = self.identification_counter;
        self.identification_counter = self.identification_counter.wrapping_add(1);

        let header = build_header(interface.address, destination, protocol, identification, payload.len());
        let mut packet = Vec::with_capacity(HEADER_LEN + payload.len());
        packet.extend_from_slice(&header);
        packet.extend_from_slice(payload);

        let next_hop_mac = if destination.is_broadcast() {
            MacAddress::broadcast()
        } else {
            MacAddress::zero()
        };

        let device = ethernet::device(interface.device_index).ok_or(NetError::NoInterface)?;
        if !device.send_frame(next_hop_mac.octets(), ethernet::ETHERTYPE_IPV4, &packet) {
            return Err(NetError::SendFailed);
        }
        Ok(())
    }

    /// Source address selection for upper layers: the interface a send
    /// to `destination` would leave through.
    pub fn source_address_for(&self, destination: Ipv4Addr) -> Option<Ipv4Addr> {
        let route = self.find_route(destination)?;
        self.interfaces
            .get(route.interface_index as usize)
            .map(|i| i.address)
    }
}

static LAYER: Mutex<IpLayer> = Mutex::new(IpLayer::new());

pub fn add_interface(
    device_index: u32,
    address: Ipv4Addr,
    netmask: Ipv4Addr,
    gateway: Ipv4Addr,
) -> NetResult<u32> {
    let device = ethernet::device(device_index).ok_or(NetError::NoInterface)?;
    Ok(LAYER.lock().add_interface(device_index, device, address, netmask, gateway))
}

pub fn register_handler(protocol: u8, handler: ProtocolHandler) {
    LAYER.lock().register_handler(protocol, handler);
}

pub fn process_frame(_src_mac: [u8; 6], _dst_mac: [u8; 6], data: &[u8]) {
    // Ingest under the lock; dispatch after releasing it, because the
    // socket layers may send replies that re-enter this layer.
    let completed = LAYER.lock().ingest_frame(data);
    let Some((source, destination, protocol, payload)) = completed else { return };

    let handlers = LAYER.lock().handlers_for(protocol);
    for handler in handlers {
        handler(source, destination, &payload);
    }
}

pub fn send_packet(destination: Ipv4Addr, protocol: u8, payload: &[u8]) -> NetResult<()> {
    LAYER.lock().send_packet(destination, protocol, payload)
}

pub fn source_address_for(destination: Ipv4Addr) -> Option<Ipv4Addr> {
    LAYER.lock().source_address_for(destination)
}

pub fn poll(now: u64) {
    LAYER.lock().poll(now);
}
