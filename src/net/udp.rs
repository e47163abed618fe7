//! UDP: port demultiplexing and per-socket datagram queues.

use alloc::collections::{BTreeMap, VecDeque};
use alloc::vec::Vec;
use spin::Mutex;

use super::error::{NetError, NetResult};
use super::ip::{self, Ipv4Addr};

pub const HEADER_LEN: usize = 8;
/// 65535 minus the IP and UDP headers.
pub const MAX_PAYLOAD: usize = 65_507;
/// Ephemeral allocation starts here.
pub const EPHEMERAL_BASE: u16 = 1024;

pub type SocketHandle = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UdpHeader {
    pub source_port: u16,
    pub destination_port: u16,
    pub length: u16,
    pub checksum: u16,
}

impl UdpHeader {
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < HEADER_LEN {
            return None;
        }
        Some(UdpHeader {
            source_port: u16::from_be_bytes([data[0], data[1]]),
            destination_port: u16::from_be_bytes([data[2], data[3]]),
            length: u16::from_be_bytes([data[4], data[5]]),
            checksum: u16::from_be_bytes([data[6], data[7]]),
        })
    }

    /// Length covers header plus payload; checksum zero (unused, as the
    /// original stack does).
    pub fn build(source_port: u16, destination_port: u16, payload_len: usize) -> [u8; HEADER_LEN] {
        let mut header = [0u8; HEADER_LEN];
        header[0..2].copy_from_slice(&source_port.to_be_bytes());
        header[2..4].copy_from_slice(&destination_port.to_be_bytes());
        header[4..6].copy_from_slice(&((HEADER_LEN + payload_len) as u16).to_be_bytes());
        header
    }
}

pub struct Datagram {
    pub source_address: Ipv4Addr,
    pub source_port: u16,
    pub payload: Vec<u8>,
}

struct UdpSocket {
    local_address: Ipv4Addr,
    local_port: u16,
    peer: Option<(Ipv4Addr, u16)>,
    bound: bool,
    queue: VecDeque<Datagram>,
}

/// Outbound path into the IP layer, injectable for tests.
pub trait IpTx: Send + Sync {
    fn send(&self, destination: Ipv4Addr, protocol: u8, payload: &[u8]) -> NetResult<()>;
}

/// Production transmit path: the global IP layer.
pub struct GlobalIpTx;

impl IpTx for GlobalIpTx {
    fn send(&self, destination: Ipv4Addr, protocol: u8, payload: &[u8]) -> NetResult<()> {
        ip::send_packet(destination, protocol, payload)
    }
}

static GLOBAL_IP_TX: GlobalIpTx = GlobalIpTx;

pub struct UdpLayer {
    sockets: BTreeMap<SocketHandle, UdpSocket>,
    bound: BTreeMap<(Ipv4Addr, u16), SocketHandle>,
    next_handle: SocketHandle,
    next_ephemeral: u16,
    tx: &'static dyn IpTx,
}

impl UdpLayer {
    pub const fn new(tx: &'static dyn IpTx) -> Self {
        UdpLayer {
            sockets: BTreeMap::new(),
            bound: BTreeMap::new(),
            next_handle: 1,
            next_ephemeral: EPHEMERAL_BASE,
            tx,
        }
    }

    pub fn create_socket(&mut self) -> SocketHandle {
        let handle = self.next_handle;
        self.next_handle += 1;
        self.sockets.insert(
            handle,
            UdpSocket {
                local_address: Ipv4Addr::any(),
                local_port: 0,
                peer: None,
                bound: false,
                queue: VecDeque::new(),
            },
        );
        handle
    }

    fn allocate_port(&mut self, address: Ipv4Addr) -> u16 {
        loop {
            let port = self.next_ephemeral;
            self.next_ephemeral = self.next_ephemeral.checked_add(1).unwrap_or(EPHEMERAL_BASE);
            if self.next_ephemeral < EPHEMERAL_BASE {
                self.next_ephemeral = EPHEMERAL_BASE;
            }
            if !self.bound.contains_key(&(address, port)) {
                return port;
            }
        }
    }

    /// Bind to (address, port). Port zero allocates an ephemeral port;
    /// a duplicate binding fails.
    pub fn bind(&mut self, handle: SocketHandle, address: Ipv4Addr, port: u16) -> NetResult<u16> {
        if !self.sockets.contains_key(&handle) {
            return Err(NetError::NoSuchSocket);
        }
        let port = if port == 0 { self.allocate_port(address) } else { port };
        if self.bound.contains_key(&(address, port)) {
            return Err(NetError::PortInUse);
        }

        let socket = self.sockets.get_mut(&handle).expect("checked above");
        socket.local_address = address;
        socket.local_port = port;
        socket.bound = true;
        self.bound.insert((address, port), handle);
        Ok(port)
    }

    /// Fix the peer: sends default to it, receives from others drop.
    pub fn connect(&mut self, handle: SocketHandle, address: Ipv4Addr, port: u16) -> NetResult<()> {
        let socket = self.sockets.get_mut(&handle).ok_or(NetError::NoSuchSocket)?;
        if !socket.bound {
            return Err(NetError::NotBound);
        }
        socket.peer = Some((address, port));
        Ok(())
    }

    pub fn send_to(
        &mut self,
        handle: SocketHandle,
        destination: Ipv4Addr,
        port: u16,
        payload: &[u8],
    ) -> NetResult<usize> {
        let socket = self.sockets.get(&handle).ok_or(NetError::NoSuchSocket)?;
        if !socket.bound {
            return Err(NetError::NotBound);
        }
        if payload.len() > MAX_PAYLOAD {
            return Err(NetError::PayloadTooLarge);
        }

        let header = UdpHeader::build(socket.local_port, port, payload.len());
        let mut datagram = Vec::with_capacity(HEADER_LEN + payload.len());
        datagram.extend_from_slice(&header);
        datagram.extend_from_slice(payload);

        self.tx.send(destination, ip::IP_PROTOCOL_UDP, &datagram)?;
        Ok(payload.len())
    }

    pub fn send(&mut self, handle: SocketHandle, payload: &[u8]) -> NetResult<usize> {
        let peer = self
            .sockets
            .get(&handle)
            .ok_or(NetError::NoSuchSocket)?
            .peer
            .ok_or(NetError::InvalidState)?;
        self.send_to(handle, peer.0, peer.1, payload)
    }

    /// Non-blocking dequeue; the blocking wrapper polls around this.
    pub fn try_receive_from(
        &mut self,
        handle: SocketHandle,
        buf: &mut [u8],
    ) -> NetResult<Option<(usize, Ipv4Addr, u16)>> {
        let socket = self.sockets.get_mut(&handle).ok_or(NetError::NoSuchSocket)?;
        if !socket.bound {
            return Err(NetError::NotBound);
        }

        let Some(datagram) = socket.queue.pop_front() else {
            return Ok(None);
        };
        let len = datagram.payload.len().min(buf.len());
        buf[..len].copy_from_slice(&datagram.payload[..len]);
        Ok(Some((len, datagram.source_address, datagram.source_port)))
    }

    pub fn close(&mut self, handle: SocketHandle) {
        if let Some(socket) = self.sockets.remove(&handle) {
            if socket.bound {
                self.bound.remove(&(socket.local_address, socket.local_port));
            }
        }
    }

    pub fn queued_datagrams(&self, handle: SocketHandle) -> usize {
        self.sockets.get(&handle).map(|s| s.queue.len()).unwrap_or(0)
    }

    /// Demultiplex an incoming datagram: exact (address, port) binding
    /// first, then a wildcard-address binding. Connected sockets drop
    /// traffic from anyone but their peer.
    pub fn process_packet(&mut self, source: Ipv4Addr, destination: Ipv4Addr, data: &[u8]) {
        let Some(header) = UdpHeader::parse(data) else { return };
        let length = header.length as usize;
        if length < HEADER_LEN || length > data.len() {
            return;
        }

        let handle = self
            .bound
            .get(&(destination, header.destination_port))
            .or_else(|| self.bound.get(&(Ipv4Addr::any(), header.destination_port)));
        let Some(&handle) = handle else { return };
        let Some(socket) = self.sockets.get_mut(&handle) else { return };

        if let Some((peer_addr, peer_port)) = socket.peer {
            if peer_addr != source || peer_port != header.source_port {
                return;
            }
        }

        socket.queue.push_back(Datagram {
            source_address: source,
            source_port: header.source_port,
            payload: data[HEADER_LEN..length].to_vec(),
        });
    }
}

static LAYER: Mutex<UdpLayer> = Mutex::new(UdpLayer::new(&GLOBAL_IP_TX));

pub fn create_socket() -> SocketHandle {
    LAYER.lock().create_socket()
}

pub fn bind(handle: SocketHandle, address: Ipv4Addr, port: u16) -> NetResult<u16> {
    LAYER.lock().bind(handle, address, port)
}

pub fn connect(handle: SocketHandle, address: Ipv4Addr, port: u16) -> NetResult<()> {
    LAYER.lock().connect(handle, address, port)
}

pub fn send_to(handle: SocketHandle, destination: Ipv4Addr, port: u16, payload: &[u8]) -> NetResult<usize> {
    LAYER.lock().send_to(handle, destination, port, payload)
}

pub fn send(handle: SocketHandle, payload: &[u8]) -> NetResult<usize> {
    LAYER.lock().send(handle, payload)
}

/// Blocking receive: poll the queue, dropping the layer lock between
/// iterations so the receive path can enqueue. `timeout_ms` zero polls
/// exactly once.
pub fn receive_from(
    handle: SocketHandle,
    buf: &mut [u8],
    timeout_ms: u64,
) -> NetResult<Option<(usize, Ipv4Addr, u16)>> {
    let deadline = crate::time::cycles() + crate::time::ms_to_cycles(timeout_ms);
    loop {
        if let Some(received) = LAYER.lock().try_receive_from(handle, buf)? {
            return Ok(Some(received));
        }
        if timeout_ms == 0 || crate::time::cycles() >= deadline {
            return Ok(None);
        }
        crate::arch::x86_64::cpu::pause();
    }
}

pub fn close(handle: SocketHandle) {
    LAYER.lock().close(handle)
}

pub fn process_packet(source: Ipv4Addr, destination: Ipv4Addr, data: &[u8]) {
    LAYER.lock().process_packet(source, destination, data)
}
