//! TCP: connection table, per-socket state machine, send/receive
//! reassembly, retransmission. RFC 793 subset: no SACK, no timestamps,
//! no window scaling, no ECN, constant congestion window.

use alloc::collections::{BTreeMap, VecDeque};
use alloc::vec::Vec;
use spin::Mutex;

use super::error::{NetError, NetResult};
use super::ip::{self, checksum, Ipv4Addr};
use super::udp::{GlobalIpTx, IpTx};

pub const HEADER_LEN: usize = 20;
pub const MSS: usize = 1460;
/// In-order byte ring per socket.
pub const RECEIVE_QUEUE_CAPACITY: usize = 8192;
/// A buffer retransmitted this many times aborts the connection.
pub const MAX_RETRANSMITS: u32 = 10;
/// Placeholder until the TSC is calibrated against the PIT; documented
/// as approximate.
pub const RETRANSMIT_TIMEOUT_MS: u64 = 1;

pub const FLAG_FIN: u8 = 0x01;
pub const FLAG_SYN: u8 = 0x02;
pub const FLAG_RST: u8 = 0x04;
pub const FLAG_PSH: u8 = 0x08;
pub const FLAG_ACK: u8 = 0x10;
pub const FLAG_URG: u8 = 0x20;

pub type SocketHandle = u32;

/// (local address, local port, remote address, remote port)
pub type ConnectionKey = (Ipv4Addr, u16, Ipv4Addr, u16);

// Sequence-space comparisons, wrapping.
#[inline]
fn seq_gt(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) > 0
}

#[inline]
fn seq_ge(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) >= 0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpState {
    Closed,
    Listen,
    SynSent,
    SynReceived,
    Established,
    FinWait1,
    FinWait2,
    CloseWait,
    Closing,
    LastAck,
    TimeWait,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpHeader {
    pub source_port: u16,
    pub destination_port: u16,
    pub sequence: u32,
    pub acknowledgment: u32,
    pub data_offset: u8,
    pub flags: u8,
    pub window: u16,
    pub checksum: u16,
    pub urgent: u16,
}

impl TcpHeader {
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < HEADER_LEN {
            return None;
        }
        let data_offset = data[12] >> 4;
        if data_offset < 5 || data.len() < data_offset as usize * 4 {
            return None;
        }
        Some(TcpHeader {
            source_port: u16::from_be_bytes([data[0], data[1]]),
            destination_port: u16::from_be_bytes([data[2], data[3]]),
            sequence: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
            acknowledgment: u32::from_be_bytes([data[8], data[9], data[10], data[11]]),
            data_offset,
            flags: data[13],
            window: u16::from_be_bytes([data[14], data[15]]),
            checksum: u16::from_be_bytes([data[16], data[17]]),
            urgent: u16::from_be_bytes([data[18], data[19]]),
        })
    }

    pub fn header_len(&self) -> usize {
        self.data_offset as usize * 4
    }

    pub fn has(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }
}

/// One's-complement sum over the pseudo-header (source, destination,
/// zero, protocol 6, TCP length) and the segment. A correct segment
/// verifies to zero.
pub fn pseudo_header_sum(source: Ipv4Addr, destination: Ipv4Addr, segment: &[u8]) -> u16 {
    let mut data = Vec::with_capacity(12 + segment.len());
    data.extend_from_slice(&source.0);
    data.extend_from_slice(&destination.0);
    data.push(0);
    data.push(ip::IP_PROTOCOL_TCP);
    data.extend_from_slice(&(segment.len() as u16).to_be_bytes());
    data.extend_from_slice(segment);
    checksum(&data)
}

pub fn checksum_valid(source: Ipv4Addr, destination: Ipv4Addr, segment: &[u8]) -> bool {
    pseudo_header_sum(source, destination, segment) == 0
}

/// Serialize a segment with the checksum finalized.
pub fn build_segment(
    source: Ipv4Addr,
    destination: Ipv4Addr,
    source_port: u16,
    destination_port: u16,
    sequence: u32,
    acknowledgment: u32,
    flags: u8,
    window: u16,
    payload: &[u8],
) -> Vec<u8> {
    let mut segment = Vec::with_capacity(HEADER_LEN + payload.len());
    segment.extend_from_slice(&source_port.to_be_bytes());
    segment.extend_from_slice(&destination_port.to_be_bytes());
    segment.extend_from_slice(&sequence.to_be_bytes());
    segment.extend_from_slice(&acknowledgment.to_be_bytes());
    segment.push((5u8) << 4);
    segment.push(flags);
    segment.extend_from_slice(&window.to_be_bytes());
    segment.extend_from_slice(&[0, 0]); // checksum placeholder
    segment.extend_from_slice(&[0, 0]); // urgent pointer
    segment.extend_from_slice(payload);

    let sum = pseudo_header_sum(source, destination, &segment);
    segment[16..18].copy_from_slice(&sum.to_be_bytes());
    segment
}

struct SendBuffer {
    sequence_start: u32,
    sequence_end: u32,
    data: Vec<u8>,
    timestamp: u64,
    acknowledged: bool,
    retransmits: u32,
}

struct ReceiveBuffer {
    sequence_start: u32,
    sequence_end: u32,
    data: Vec<u8>,
}

pub struct TcpSocket {
    local_address: Ipv4Addr,
    local_port: u16,
    remote_address: Ipv4Addr,
    remote_port: u16,
    state: TcpState,
    /// Next sequence number to send.
    send_sequence: u32,
    /// Oldest unacknowledged sequence number.
    send_unacknowledged: u32,
    /// Next in-order sequence number expected from the peer.
    receive_next_expected: u32,
    /// Peer's advertised window, 16-bit, unscaled.
    send_window: u32,
    send_buffers: Vec<SendBuffer>,
    receive_buffers: Vec<ReceiveBuffer>,
    receive_queue: VecDeque<u8>,
    /// Handles of accepted-but-unclaimed connections (listeners only).
    backlog: VecDeque<SocketHandle>,
    time_wait_since: u64,
}

impl TcpSocket {
    fn new() -> Self {
        TcpSocket {
            local_address: Ipv4Addr::any(),
            local_port: 0,
            remote_address: Ipv4Addr::any(),
            remote_port: 0,
            state: TcpState::Closed,
            send_sequence: 0,
            send_unacknowledged: 0,
            receive_next_expected: 0,
            send_window: 65_535,
            send_buffers: Vec::new(),
            receive_buffers: Vec::new(),
            receive_queue: VecDeque::new(),
            backlog: VecDeque::new(),
            time_wait_since: 0,
        }
    }

    fn receive_window(&self) -> u16 {
        (RECEIVE_QUEUE_CAPACITY - self.receive_queue.len()) as u16
    }

    fn key(&self) -> ConnectionKey {
        (self.local_address, self.local_port, self.remote_address, self.remote_port)
    }
}

pub struct TcpLayer {
    sockets: BTreeMap<SocketHandle, TcpSocket>,
    connections: BTreeMap<ConnectionKey, SocketHandle>,
    listeners: BTreeMap<u16, SocketHandle>,
    next_handle: SocketHandle,
    next_ephemeral: u16,
    tx: &'static dyn IpTx,
}

impl TcpLayer {
    pub const fn new(tx: &'static dyn IpTx) -> Self {
        TcpLayer {
            sockets: BTreeMap::new(),
            connections: BTreeMap::new(),
            listeners: BTreeMap::new(),
            next_handle: 1,
            next_ephemeral: 1024,
            tx,
        }
    }

    pub fn create_socket(&mut self) -> SocketHandle {
        let handle = self.next_handle;
        self.next_handle += 1;
        self.sockets.insert(handle, TcpSocket::new());
        handle
    }

    pub fn state(&self, handle: SocketHandle) -> Option<TcpState> {
        self.sockets.get(&handle).map(|s| s.state)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    fn allocate_port(&mut self) -> u16 {
        loop {
            let port = self.next_ephemeral;
            self.next_ephemeral = if port == u16::MAX { 1024 } else { port + 1 };
            if !self.listeners.contains_key(&port)
                && !self.connections.keys().any(|k| k.1 == port)
            {
                return port;
            }
        }
    }

    pub fn bind(&mut self, handle: SocketHandle, address: Ipv4Addr, port: u16) -> NetResult<u16> {
        let port = if port == 0 { self.allocate_port() } else { port };
        if self.listeners.contains_key(&port) {
            return Err(NetError::PortInUse);
        }
        let socket = self.sockets.get_mut(&handle).ok_or(NetError::NoSuchSocket)?;
        if socket.state != TcpState::Closed {
            return Err(NetError::InvalidState);
        }
        socket.local_address = address;
        socket.local_port = port;
        Ok(port)
    }

    pub fn listen(&mut self, handle: SocketHandle) -> NetResult<()> {
        let socket = self.sockets.get_mut(&handle).ok_or(NetError::NoSuchSocket)?;
        if socket.state != TcpState::Closed || socket.local_port == 0 {
            return Err(NetError::InvalidState);
        }
        socket.state = TcpState::Listen;
        self.listeners.insert(socket.local_port, handle);
        Ok(())
    }

    /// Active open: send SYN with a clock-derived ISS.
    pub fn connect(
        &mut self,
        handle: SocketHandle,
        address: Ipv4Addr,
        port: u16,
    ) -> NetResult<()> {
        if self
            .sockets
            .get(&handle)
            .ok_or(NetError::NoSuchSocket)?
            .state
            != TcpState::Closed
        {
            return Err(NetError::InvalidState);
        }

        let local_port = {
            let port = self.sockets[&handle].local_port;
            if port == 0 { self.allocate_port() } else { port }
        };
        let local_address = match self.sockets[&handle].local_address {
            addr if addr.is_any() => {
                ip::source_address_for(address).unwrap_or(Ipv4Addr::any())
            }
            addr => addr,
        };

        let iss = crate::time::cycles() as u32;
        let socket = self.sockets.get_mut(&handle).expect("checked above");
        socket.local_address = local_address;
        socket.local_port = local_port;
        socket.remote_address = address;
        socket.remote_port = port;
        socket.send_sequence = iss.wrapping_add(1);
        socket.send_unacknowledged = iss;
        socket.state = TcpState::SynSent;

        self.connections.insert(socket.key(), handle);

        let segment = build_segment(
            local_address,
            address,
            local_port,
            port,
            iss,
            0,
            FLAG_SYN,
            socket.receive_window(),
            &[],
        );
        self.tx.send(address, ip::IP_PROTOCOL_TCP, &segment)?;
        Ok(())
    }

    /// Pop an established connection spawned by this listener.
    pub fn accept(&mut self, handle: SocketHandle) -> Option<SocketHandle> {
        let socket = self.sockets.get_mut(&handle)?;
        if socket.state != TcpState::Listen {
            return None;
        }
        socket.backlog.pop_front()
    }

    fn send_control(&self, socket: &TcpSocket, flags: u8, sequence: u32, ack: u32) {
        let segment = build_segment(
            socket.local_address,
            socket.remote_address,
            socket.local_port,
            socket.remote_port,
            sequence,
            ack,
            flags,
            socket.receive_window(),
            &[],
        );
        if let Err(e) = self.tx.send(socket.remote_address, ip::IP_PROTOCOL_TCP, &segment) {
            log_debug!("TCP", "control segment not sent: {}", e);
        }
    }

    /// Queue and transmit application data in MSS chunks, pausing while
    /// the in-flight span reaches the peer's window. Returns bytes
    /// accepted, possibly zero.
    pub fn send(&mut self, handle: SocketHandle, data: &[u8], now: u64) -> NetResult<usize> {
        let socket = self.sockets.get_mut(&handle).ok_or(NetError::NoSuchSocket)?;
        if socket.state != TcpState::Established {
            return Err(NetError::InvalidState);
        }

        let mut accepted = 0usize;
        while accepted < data.len() {
            let in_flight = socket.send_sequence.wrapping_sub(socket.send_unacknowledged);
            if in_flight >= socket.send_window {
                break;
            }

            let chunk = (data.len() - accepted).min(MSS);
            let chunk_data = &data[accepted..accepted + chunk];
            let sequence = socket.send_sequence;

            socket.send_buffers.push(SendBuffer {
                sequence_start: sequence,
                sequence_end: sequence.wrapping_add(chunk as u32),
                data: chunk_data.to_vec(),
                timestamp: now,
                acknowledged: false,
                retransmits: 0,
            });

            let segment = build_segment(
                socket.local_address,
                socket.remote_address,
                socket.local_port,
                socket.remote_port,
                sequence,
                socket.receive_next_expected,
                FLAG_ACK | FLAG_PSH,
                socket.receive_window(),
                chunk_data,
            );
            self.tx
                .send(socket.remote_address, ip::IP_PROTOCOL_TCP, &segment)?;

            socket.send_sequence = socket.send_sequence.wrapping_add(chunk as u32);
            accepted += chunk;
        }

        Ok(accepted)
    }

    /// Drain the in-order byte ring. A non-empty read acknowledges with
    /// the refreshed window.
    pub fn try_receive(&mut self, handle: SocketHandle, buf: &mut [u8]) -> NetResult<usize> {
        let socket = self.sockets.get_mut(&handle).ok_or(NetError::NoSuchSocket)?;
        if socket.state != TcpState::Established && socket.state != TcpState::CloseWait {
            return Err(NetError::InvalidState);
        }

        let mut read = 0;
        while read < buf.len() {
            match socket.receive_queue.pop_front() {
                Some(byte) => {
                    buf[read] = byte;
                    read += 1;
                }
                None => break,
            }
        }

        if read > 0 {
            let (seq, ack) = (socket.send_sequence, socket.receive_next_expected);
            let socket = &self.sockets[&handle];
            self.send_control(socket, FLAG_ACK, seq, ack);
        }
        Ok(read)
    }

    /// Close per the state table: FIN out of Established or CloseWait,
    /// plain teardown elsewhere.
    pub fn close(&mut self, handle: SocketHandle) -> NetResult<()> {
        let socket = self.sockets.get_mut(&handle).ok_or(NetError::NoSuchSocket)?;
        match socket.state {
            TcpState::Established => {
                let seq = socket.send_sequence;
                socket.send_sequence = socket.send_sequence.wrapping_add(1);
                socket.state = TcpState::FinWait1;
                let (ack, socket) = {
                    let s = &self.sockets[&handle];
                    (s.receive_next_expected, s)
                };
                self.send_control(socket, FLAG_FIN | FLAG_ACK, seq, ack);
            }
            TcpState::CloseWait => {
                let seq = socket.send_sequence;
                socket.send_sequence = socket.send_sequence.wrapping_add(1);
                socket.state = TcpState::LastAck;
                let (ack, socket) = {
                    let s = &self.sockets[&handle];
                    (s.receive_next_expected, s)
                };
                self.send_control(socket, FLAG_FIN | FLAG_ACK, seq, ack);
            }
            TcpState::Listen => {
                let port = socket.local_port;
                socket.state = TcpState::Closed;
                self.listeners.remove(&port);
            }
            TcpState::SynSent | TcpState::SynReceived => {
                let key = socket.key();
                socket.state = TcpState::Closed;
                self.connections.remove(&key);
            }
            _ => {}
        }
        Ok(())
    }

    /// Reset the connection immediately.
    pub fn abort(&mut self, handle: SocketHandle) -> NetResult<()> {
        let socket = self.sockets.get_mut(&handle).ok_or(NetError::NoSuchSocket)?;
        if socket.state == TcpState::Closed {
            return Ok(());
        }
        let key = socket.key();
        let seq = socket.send_sequence;
        socket.state = TcpState::Closed;
        let socket = &self.sockets[&handle];
        self.send_control(socket, FLAG_RST, seq, 0);
        self.connections.remove(&key);
        Ok(())
    }

    /// Demultiplex an incoming segment. Unknown 4-tuples only matter
    /// when they are a SYN for a listening port; everything else drops.
    pub fn process_packet(&mut self, source: Ipv4Addr, destination: Ipv4Addr, data: &[u8]) {
        if !checksum_valid(source, destination, data) {
            log_debug!("TCP", "segment with bad checksum dropped");
            return;
        }
        let Some(header) = TcpHeader::parse(data) else { return };
        let payload = &data[header.header_len()..];

        let key: ConnectionKey = (destination, header.destination_port, source, header.source_port);

        if let Some(&handle) = self.connections.get(&key) {
            self.process_segment(handle, &header, payload);
            return;
        }

        if header.has(FLAG_SYN) && !header.has(FLAG_ACK) {
            if let Some(&listener) = self.listeners.get(&header.destination_port) {
                self.handle_new_connection(listener, key, &header);
            }
        }
    }

    /// Passive open: spawn a SynReceived socket keyed by the 4-tuple and
    /// answer SYN-ACK.
    fn handle_new_connection(
        &mut self,
        listener: SocketHandle,
        key: ConnectionKey,
        header: &TcpHeader,
    ) {
        let handle = self.create_socket();
        let iss = crate::time::cycles() as u32;
        {
            let socket = self.sockets.get_mut(&handle).expect("just created");
            socket.local_address = key.0;
            socket.local_port = key.1;
            socket.remote_address = key.2;
            socket.remote_port = key.3;
            socket.state = TcpState::SynReceived;
            socket.receive_next_expected = header.sequence.wrapping_add(1);
            socket.send_unacknowledged = iss;
            socket.send_sequence = iss.wrapping_add(1);
            socket.send_window = header.window as u32;
        }
        self.connections.insert(key, handle);

        if let Some(listener_socket) = self.sockets.get_mut(&listener) {
            listener_socket.backlog.push_back(handle);
        }

        let socket = &self.sockets[&handle];
        let ack = socket.receive_next_expected;
        self.send_control(socket, FLAG_SYN | FLAG_ACK, iss, ack);
    }

    fn process_segment(&mut self, handle: SocketHandle, header: &TcpHeader, payload: &[u8]) {
        // RST tears the connection down from any state.
        if header.has(FLAG_RST) {
            if let Some(socket) = self.sockets.get_mut(&handle) {
                let key = socket.key();
                socket.state = TcpState::Closed;
                self.connections.remove(&key);
            }
            return;
        }

        let Some(socket) = self.sockets.get_mut(&handle) else { return };

        if header.has(FLAG_ACK) {
            socket.send_window = header.window as u32;
            if seq_gt(header.acknowledgment, socket.send_unacknowledged)
                && seq_ge(socket.send_sequence, header.acknowledgment)
            {
                socket.send_unacknowledged = header.acknowledgment;
                for buffer in &mut socket.send_buffers {
                    if seq_ge(header.acknowledgment, buffer.sequence_end) {
                        buffer.acknowledged = true;
                    }
                }
            }
        }

        match socket.state {
            TcpState::SynSent => {
                if header.has(FLAG_SYN) && header.has(FLAG_ACK) {
                    socket.receive_next_expected = header.sequence.wrapping_add(1);
                    socket.state = TcpState::Established;
                    let (seq, ack) = (socket.send_sequence, socket.receive_next_expected);
                    let socket = &self.sockets[&handle];
                    self.send_control(socket, FLAG_ACK, seq, ack);
                }
            }
            TcpState::SynReceived => {
                if header.has(FLAG_ACK) && header.acknowledgment == socket.send_sequence {
                    socket.state = TcpState::Established;
                }
            }
            TcpState::Established => {
                if !payload.is_empty() {
                    Self::ingest_data(socket, header.sequence, payload);
                    let (seq, ack) = (socket.send_sequence, socket.receive_next_expected);
                    let socket = &self.sockets[&handle];
                    self.send_control(socket, FLAG_ACK, seq, ack);
                }
                let Some(socket) = self.sockets.get_mut(&handle) else { return };
                if header.has(FLAG_FIN) {
                    socket.receive_next_expected = socket.receive_next_expected.wrapping_add(1);
                    socket.state = TcpState::CloseWait;
                    let (seq, ack) = (socket.send_sequence, socket.receive_next_expected);
                    let socket = &self.sockets[&handle];
                    self.send_control(socket, FLAG_ACK, seq, ack);
                }
            }
            TcpState::FinWait1 => {
                if header.has(FLAG_ACK) && header.acknowledgment == socket.send_sequence {
                    socket.state = TcpState::FinWait2;
                }
            }
            TcpState::FinWait2 => {
                if header.has(FLAG_FIN) {
                    socket.receive_next_expected = header.sequence.wrapping_add(1);
                    socket.state = TcpState::TimeWait;
                    socket.time_wait_since = crate::time::cycles();
                    let (seq, ack) = (socket.send_sequence, socket.receive_next_expected);
                    let socket = &self.sockets[&handle];
                    self.send_control(socket, FLAG_ACK, seq, ack);
                }
            }
            TcpState::LastAck => {
                if header.has(FLAG_ACK) && header.acknowledgment == socket.send_sequence {
                    let key = socket.key();
                    socket.state = TcpState::Closed;
                    self.connections.remove(&key);
                }
            }
            _ => {}
        }
    }

    /// Out-of-order segments park in `receive_buffers`, sorted by
    /// sequence number; every contiguous prefix starting at
    /// `receive_next_expected` drains into the byte ring.
    fn ingest_data(socket: &mut TcpSocket, sequence: u32, payload: &[u8]) {
        let end = sequence.wrapping_add(payload.len() as u32);

        // Old or duplicate data is not buffered twice.
        if seq_ge(socket.receive_next_expected, end) {
            return;
        }
        if socket
            .receive_buffers
            .iter()
            .any(|b| b.sequence_start == sequence)
        {
            return;
        }

        let position = socket
            .receive_buffers
            .iter()
            .position(|b| seq_gt(b.sequence_start, sequence))
            .unwrap_or(socket.receive_buffers.len());
        socket.receive_buffers.insert(
            position,
            ReceiveBuffer { sequence_start: sequence, sequence_end: end, data: payload.to_vec() },
        );

        // Drain every buffer that now lines up with the expected point.
        loop {
            let Some(index) = socket
                .receive_buffers
                .iter()
                .position(|b| b.sequence_start == socket.receive_next_expected)
            else {
                break;
            };
            let buffer = socket.receive_buffers.remove(index);
            for byte in &buffer.data {
                if socket.receive_queue.len() >= RECEIVE_QUEUE_CAPACITY {
                    break;
                }
                socket.receive_queue.push_back(*byte);
            }
            socket.receive_next_expected = buffer.sequence_end;
        }
    }

    /// Retransmission pass: resend every unacknowledged buffer older
    /// than the timeout; a buffer past the retry budget aborts its
    /// socket. Acknowledged buffers are reaped.
    pub fn poll(&mut self, now: u64) {
        let timeout = crate::time::ms_to_cycles(RETRANSMIT_TIMEOUT_MS);
        let mut to_abort: Vec<SocketHandle> = Vec::new();
        let mut to_send: Vec<(Ipv4Addr, Vec<u8>)> = Vec::new();

        for (&handle, socket) in self.sockets.iter_mut() {
            socket.send_buffers.retain(|b| !b.acknowledged);

            let receive_window = socket.receive_window();
            for buffer in &mut socket.send_buffers {
                if now.saturating_sub(buffer.timestamp) <= timeout {
                    continue;
                }
                if buffer.retransmits >= MAX_RETRANSMITS {
                    to_abort.push(handle);
                    break;
                }
                buffer.timestamp = now;
                buffer.retransmits += 1;
                let segment = build_segment(
                    socket.local_address,
                    socket.remote_address,
                    socket.local_port,
                    socket.remote_port,
                    buffer.sequence_start,
                    socket.receive_next_expected,
                    FLAG_ACK | FLAG_PSH,
                    receive_window,
                    &buffer.data,
                );
                to_send.push((socket.remote_address, segment));
            }
        }

        for (destination, segment) in to_send {
            if let Err(e) = self.tx.send(destination, ip::IP_PROTOCOL_TCP, &segment) {
                log_debug!("TCP", "retransmit not sent: {}", e);
            }
        }
        for handle in to_abort {
            log_warn!("TCP", "socket {} exceeded retransmit budget, aborting", handle);
            let _ = self.abort(handle);
        }
    }

    pub fn retransmit_count(&self, handle: SocketHandle) -> u32 {
        self.sockets
            .get(&handle)
            .map(|s| s.send_buffers.iter().map(|b| b.retransmits).sum())
            .unwrap_or(0)
    }

    pub fn unacked_bytes(&self, handle: SocketHandle) -> u32 {
        self.sockets
            .get(&handle)
            .map(|s| s.send_sequence.wrapping_sub(s.send_unacknowledged))
            .unwrap_or(0)
    }

    pub fn receive_next(&self, handle: SocketHandle) -> Option<u32> {
        self.sockets.get(&handle).map(|s| s.receive_next_expected)
    }
}

static GLOBAL_TCP_TX: GlobalIpTx = GlobalIpTx;
static LAYER: Mutex<TcpLayer> = Mutex::new(TcpLayer::new(&GLOBAL_TCP_TX));

pub fn create_socket() -> SocketHandle {
    LAYER.lock().create_socket()
}

pub fn bind(handle: SocketHandle, address: Ipv4Addr, port: u16) -> NetResult<u16> {
    LAYER.lock().bind(handle, address, port)
}

pub fn listen(handle: SocketHandle) -> NetResult<()> {
    LAYER.lock().listen(handle)
}

pub fn connect(handle: SocketHandle, address: Ipv4Addr, port: u16) -> NetResult<()> {
    LAYER.lock().connect(handle, address, port)
}

pub fn accept(handle: SocketHandle) -> Option<SocketHandle> {
    LAYER.lock().accept(handle)
}

pub fn send(handle: SocketHandle, data: &[u8]) -> NetResult<usize> {
    let now = crate::time::cycles();
    LAYER.lock().send(handle, data, now)
}

/// Blocking receive in the UDP style: poll, dropping the layer lock
/// between iterations. Zero timeout polls once.
pub fn receive(handle: SocketHandle, buf: &mut [u8], timeout_ms: u64) -> NetResult<usize> {
    let deadline = crate::time::cycles() + crate::time::ms_to_cycles(timeout_ms);
    loop {
        let read = LAYER.lock().try_receive(handle, buf)?;
        if read > 0 {
            return Ok(read);
        }
        if timeout_ms == 0 || crate::time::cycles() >= deadline {
            return Ok(0);
        }
        crate::arch::x86_64::cpu::pause();
    }
}

pub fn close(handle: SocketHandle) -> NetResult<()> {
    LAYER.lock().close(handle)
}

pub fn state(handle: SocketHandle) -> Option<TcpState> {
    LAYER.lock().state(handle)
}

pub fn process_packet(source: Ipv4Addr, destination: Ipv4Addr, data: &[u8]) {
    LAYER.lock().process_packet(source, destination, data)
}

pub fn poll(now: u64) {
    LAYER.lock().poll(now)
}
