// Osmium Operating System
// Copyright (C) 2026 Osmium Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use crate::drivers::pci::{self, Bar, PciDevice};
use crate::memory::dma::{alloc_dma_coherent, DmaConstraints, DmaRegion};
use crate::memory::layout::{align_down, align_up, PAGE_SIZE_U64};
use crate::memory::virt::PageFlags;

use super::constants::*;
use super::descriptors::{RxDescriptor, TxDescriptor};
use super::error::E1000Error;

pub struct E1000Device {
    mmio_base: Option<u64>,
    io_base: Option<u16>,
    pub mac_address: [u8; 6],
    pub link_up: bool,
    pub link_speed: u16,
    pub full_duplex: bool,
    promiscuous: bool,
    rx_ring: DmaRegion,
    tx_ring: DmaRegion,
    rx_buffers: Vec<DmaRegion>,
    tx_buffers: Vec<DmaRegion>,
    rx_tail: usize,
    tx_tail: usize,
    pub rx_packets: AtomicU64,
    pub tx_packets: AtomicU64,
    pub rx_errors: AtomicU64,
}

/// Lay out an Ethernet II frame: destination, source, big-endian
/// ethertype, payload. Returns the frame length.
pub fn build_frame(
    buf: &mut [u8],
    dest: [u8; 6],
    src: [u8; 6],
    ethertype: u16,
    payload: &[u8],
) -> usize {
    buf[0..6].copy_from_slice(&dest);
    buf[6..12].copy_from_slice(&src);
    buf[12..14].copy_from_slice(&ethertype.to_be_bytes());
    buf[ETHERNET_HEADER_LEN..ETHERNET_HEADER_LEN + payload.len()].copy_from_slice(payload);
    ETHERNET_HEADER_LEN + payload.len()
}

impl E1000Device {
    pub fn new(pci_device: &PciDevice) -> Result<Self, E1000Error> {
        pci::enable_device(pci_device);

        let (mmio_base, io_base) = match pci_device.bar(0) {
            Some(Bar::Memory { base, .. }) => (Some(map_nic_registers(base)?), None),
            Some(Bar::Io { port }) => (None, Some(port)),
            None => return Err(E1000Error::Bar0NotConfigured),
        };

        let mut device = E1000Device {
            mmio_base,
            io_base,
            mac_address: [0; 6],
            link_up: false,
            link_speed: 0,
            full_duplex: false,
            promiscuous: false,
            rx_ring: alloc_ring(RX_DESC_COUNT)?,
            tx_ring: alloc_ring(TX_DESC_COUNT)?,
            rx_buffers: alloc_buffers(RX_DESC_COUNT)?,
            tx_buffers: alloc_buffers(TX_DESC_COUNT)?,
            rx_tail: RX_DESC_COUNT - 1,
            tx_tail: 0,
            rx_packets: AtomicU64::new(0),
            tx_packets: AtomicU64::new(0),
            rx_errors: AtomicU64::new(0),
        };

        if !device.reset() {
            return Err(E1000Error::ResetTimeout);
        }
        device.read_mac_address();
        device.init_rx();
        device.init_tx();
        device.enable_interrupts();
        device.update_link_status();

        log_info!(
            "E1000",
            "mac {:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}, link {} {}Mbps",
            device.mac_address[0],
            device.mac_address[1],
            device.mac_address[2],
            device.mac_address[3],
            device.mac_address[4],
            device.mac_address[5],
            if device.link_up { "up" } else { "down" },
            device.link_speed
        );
        Ok(device)
    }

    fn read_reg(&self, offset: u32) -> u32 {
        if let Some(base) = self.mmio_base {
            // SAFETY: base is the uncached BAR0 mapping.
            return unsafe { core::ptr::read_volatile((base + offset as u64) as *const u32) };
        }
        self.io_read(offset)
    }

    fn write_reg(&self, offset: u32, value: u32) {
        if let Some(base) = self.mmio_base {
            // SAFETY: see read_reg.
            unsafe { core::ptr::write_volatile((base + offset as u64) as *mut u32, value) };
            return;
        }
        self.io_write(offset, value);
    }

    /// Port-mapped fallback: IOADDR at the base, IODATA at base + 4.
    #[cfg(target_os = "none")]
    fn io_read(&self, offset: u32) -> u32 {
        use x86_64::instructions::port::Port;
        let Some(io) = self.io_base else { return 0 };
        let mut addr: Port<u32> = Port::new(io);
        let mut data: Port<u32> = Port::new(io + 4);
        // SAFETY: the BAR claims this port pair.
        unsafe {
            addr.write(offset);
            data.read()
        }
    }

    #[cfg(not(target_os = "none"))]
    fn io_read(&self, _offset: u32) -> u32 {
        0
    }

    #[cfg(target_os = "none")]
    fn io_write(&self, offset: u32, value: u32) {
        use x86_64::instructions::port::Port;
        let Some(io) = self.io_base else { return };
        let mut addr: Port<u32> = Port::new(io);
        let mut data: Port<u32> = Port::new(io + 4);
        // SAFETY: the BAR claims this port pair.
        unsafe {
            addr.write(offset);
            data.write(value);
        }
    }

    #[cfg(not(target_os = "none"))]
    fn io_write(&self, _offset: u32, _value: u32) {}

    fn reset(&self) -> bool {
        self.write_reg(reg::CTRL, self.read_reg(reg::CTRL) | ctrl::RST);

        let mut cleared = false;
        for _ in 0..RESET_TIMEOUT {
            if self.read_reg(reg::CTRL) & ctrl::RST == 0 {
                cleared = true;
                break;
            }
            crate::arch::x86_64::cpu::pause();
        }

        // Mask and drain any stale interrupt state.
        self.write_reg(reg::IMC, 0xFFFF_FFFF);
        let _ = self.read_reg(reg::ICR);
        cleared
    }

    fn read_mac_address(&mut self) {
        let ral = self.read_reg(reg::RAL0);
        let rah = self.read_reg(reg::RAH0);

        if ral != 0 || rah & 0xFFFF != 0 {
            self.mac_address = [
                ral as u8,
                (ral >> 8) as u8,
                (ral >> 16) as u8,
                (ral >> 24) as u8,
                rah as u8,
                (rah >> 8) as u8,
            ];
        } else {
            for i in 0..3 {
                let word = self.eeprom_read(i as u8).unwrap_or(0);
                self.mac_address[i * 2] = word as u8;
                self.mac_address[i * 2 + 1] = (word >> 8) as u8;
            }
        }

        // Load the unicast filter with the address valid bit.
        let ral = u32::from_le_bytes([
            self.mac_address[0],
            self.mac_address[1],
            self.mac_address[2],
            self.mac_address[3],
        ]);
        let rah = (self.mac_address[4] as u32) | ((self.mac_address[5] as u32) << 8) | (1 << 31);
        self.write_reg(reg::RAL0, ral);
        self.write_reg(reg::RAH0, rah);
    }

    fn eeprom_read(&self, addr: u8) -> Option<u16> {
        self.write_reg(reg::EERD, 1 | ((addr as u32) << 8));
        for _ in 0..EEPROM_TIMEOUT {
            let value = self.read_reg(reg::EERD);
            if value & (1 << 4) != 0 {
                return Some((value >> 16) as u16);
            }
            crate::arch::x86_64::cpu::pause();
        }
        log_warn!("E1000", "eeprom read timeout at word {}", addr);
        None
    }

    fn rx_descs(&self) -> *mut RxDescriptor {
        self.rx_ring.virt_addr.as_mut_ptr::<RxDescriptor>()
    }

    fn tx_descs(&self) -> *mut TxDescriptor {
        self.tx_ring.virt_addr.as_mut_ptr::<TxDescriptor>()
    }

    fn init_rx(&mut self) {
        for i in 0..RX_DESC_COUNT {
            // SAFETY: the ring spans RX_DESC_COUNT descriptors.
            unsafe {
                let desc = &mut *self.rx_descs().add(i);
                desc.buffer_addr = self.rx_buffers[i].phys_addr.as_u64();
                desc.rearm();
            }
        }

        self.write_reg(reg::RDBAL, (self.rx_ring.phys_addr.as_u64() & 0xFFFF_FFFF) as u32);
        self.write_reg(reg::RDBAH, (self.rx_ring.phys_addr.as_u64() >> 32) as u32);
        self.write_reg(reg::RDLEN, (RX_DESC_COUNT * DESC_SIZE) as u32);
        self.write_reg(reg::RDH, 0);
        // Tail one behind head: every descriptor is device-owned.
        self.write_reg(reg::RDT, (RX_DESC_COUNT - 1) as u32);

        for i in 0..128 {
            self.write_reg(reg::MTA + i * 4, 0);
        }

        self.write_reg(reg::RCTL, rctl::EN | rctl::BAM | rctl::BSIZE_2048);
    }

    fn init_tx(&mut self) {
        for i in 0..TX_DESC_COUNT {
            // SAFETY: the ring spans TX_DESC_COUNT descriptors.
            unsafe {
                let desc = &mut *self.tx_descs().add(i);
                desc.buffer_addr = self.tx_buffers[i].phys_addr.as_u64();
                desc.mark_available();
            }
        }

        self.write_reg(reg::TDBAL, (self.tx_ring.phys_addr.as_u64() & 0xFFFF_FFFF) as u32);
        self.write_reg(reg::TDBAH, (self.tx_ring.phys_addr.as_u64() >> 32) as u32);
        self.write_reg(reg::TDLEN, (TX_DESC_COUNT * DESC_SIZE) as u32);
        self.write_reg(reg::TDH, 0);
        self.write_reg(reg::TDT, 0);

        self.write_reg(
            reg::TCTL,
            tctl::EN
                | tctl::PSP
                | (COLLISION_THRESHOLD << tctl::CT_SHIFT)
                | (COLLISION_DISTANCE << tctl::COLD_SHIFT),
        );
    }

    fn enable_interrupts(&self) {
        self.write_reg(reg::IMS, int::RXT0 | int::RXDMT0 | int::LSC | int::TXDW);
    }

    pub fn update_link_status(&mut self) {
        let status_val = self.read_reg(reg::STATUS);
        self.link_up = status_val & status::LU != 0;
        self.full_duplex = status_val & status::FD != 0;
        self.link_speed = match status_val & status::SPEED_MASK {
            status::SPEED_10 => 10,
            status::SPEED_100 => 100,
            status::SPEED_1000 => 1000,
            _ => 0,
        };

        self.write_reg(reg::CTRL, self.read_reg(reg::CTRL) | ctrl::SLU | ctrl::ASDE);
    }

    pub fn set_promiscuous(&mut self, enable: bool) {
        let mut value = self.read_reg(reg::RCTL);
        if enable {
            value |= rctl::UPE | rctl::MPE;
        } else {
            value &= !(rctl::UPE | rctl::MPE);
        }
        self.write_reg(reg::RCTL, value);
        self.promiscuous = enable;
    }

    pub fn is_promiscuous(&self) -> bool {
        self.promiscuous
    }

    /// Queue one frame. The Ethernet header is assembled in front of the
    /// payload inside the slot's DMA buffer.
    pub fn send(&mut self, dest: [u8; 6], ethertype: u16, payload: &[u8]) -> Result<(), E1000Error> {
        if ETHERNET_HEADER_LEN + payload.len() > MAX_FRAME_SIZE {
            return Err(E1000Error::FrameTooLarge);
        }

        let slot = self.tx_tail;
        // SAFETY: slot < TX_DESC_COUNT; the descriptor and its buffer are
        // pinned DMA memory.
        unsafe {
            let desc = &mut *self.tx_descs().add(slot);
            if !desc.is_done() {
                return Err(E1000Error::RingFull);
            }

            let buf = core::slice::from_raw_parts_mut(
                self.tx_buffers[slot].virt_addr.as_mut_ptr::<u8>(),
                BUFFER_SIZE,
            );
            let frame_len = build_frame(buf, dest, self.mac_address, ethertype, payload);

            desc.setup(
                self.tx_buffers[slot].phys_addr.as_u64(),
                frame_len as u16,
                tx_cmd::EOP | tx_cmd::IFCS | tx_cmd::RS | tx_cmd::RPS,
            );
        }

        self.tx_tail = (self.tx_tail + 1) % TX_DESC_COUNT;
        self.write_reg(reg::TDT, self.tx_tail as u32);
        self.tx_packets.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Drain completed receive descriptors. Each returned frame has the
    /// four FCS bytes stripped; the descriptor is re-armed and the tail
    /// advanced behind it.
    pub fn receive(&mut self) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();

        loop {
            let slot = (self.rx_tail + 1) % RX_DESC_COUNT;
            // SAFETY: slot < RX_DESC_COUNT; descriptor and buffer are
            // pinned DMA memory.
            unsafe {
                let desc = &mut *self.rx_descs().add(slot);
                if !desc.is_done() {
                    break;
                }

                if desc.has_error() {
                    self.rx_errors.fetch_add(1, Ordering::Relaxed);
                } else if desc.is_end_of_packet()
                    && desc.length as usize > ETHERNET_FCS_LEN
                    && (desc.length as usize) <= BUFFER_SIZE
                {
                    let len = desc.length as usize - ETHERNET_FCS_LEN;
                    let buf = self.rx_buffers[slot].virt_addr.as_ptr::<u8>();
                    frames.push(core::slice::from_raw_parts(buf, len).to_vec());
                    self.rx_packets.fetch_add(1, Ordering::Relaxed);
                }

                desc.rearm();
            }

            self.rx_tail = slot;
            self.write_reg(reg::RDT, self.rx_tail as u32);
        }

        frames
    }

    /// ICR dispatch. Returns any frames drained by a receive cause so
    /// the caller can deliver them after dropping the device lock.
    pub fn handle_interrupt(&mut self) -> Vec<Vec<u8>> {
        let cause = self.read_reg(reg::ICR);
        let mut frames = Vec::new();

        if cause & int::LSC != 0 {
            self.update_link_status();
            log_info!(
                "E1000",
                "link {} {}Mbps",
                if self.link_up { "up" } else { "down" },
                self.link_speed
            );
        }
        if cause & (int::RXT0 | int::RXDMT0) != 0 {
            frames = self.receive();
        }
        // TXDW needs no work: send() checks DD before reusing a slot.
        frames
    }

    /// Hardware statistics: (rx packets, rx bytes, rx errors, tx packets,
    /// tx bytes, tx errors).
    pub fn hardware_statistics(&self) -> (u32, u32, u32, u32, u32, u32) {
        (
            self.read_reg(reg::GPRC),
            self.read_reg(reg::GORCL),
            self.read_reg(reg::RXERRC),
            self.read_reg(reg::GPTC),
            self.read_reg(reg::GOTCL),
            self.read_reg(reg::TXERRC),
        )
    }
}

fn alloc_ring(count: usize) -> Result<DmaRegion, E1000Error> {
    alloc_dma_coherent(count * DESC_SIZE, DmaConstraints { alignment: 4096, dma32_only: false })
        .map_err(|_| E1000Error::DmaAllocationFailed)
}

fn alloc_buffers(count: usize) -> Result<Vec<DmaRegion>, E1000Error> {
    let mut buffers = Vec::with_capacity(count);
    for _ in 0..count {
        buffers.push(
            alloc_dma_coherent(BUFFER_SIZE, DmaConstraints { alignment: 16, dma32_only: false })
                .map_err(|_| E1000Error::DmaAllocationFailed)?,
        );
    }
    Ok(buffers)
}

/// BAR0 registers reached through an uncached window mapping.
fn map_nic_registers(bar0: u64) -> Result<u64, E1000Error> {
    let phys_base = align_down(bar0, PAGE_SIZE_U64);
    let span = align_up(bar0 + 0x2_0000, PAGE_SIZE_U64) - phys_base;
    let virt_base = crate::memory::layout::MMIO_BASE + phys_base;

    let flags = PageFlags::PRESENT
        | PageFlags::WRITABLE
        | PageFlags::CACHE_DISABLED
        | PageFlags::NO_EXECUTE;
    crate::memory::virt::map_pages(virt_base, phys_base, (span / PAGE_SIZE_U64) as usize, flags)
        .map_err(|_| E1000Error::MmioMapFailed)?;

    Ok(virt_base + (bar0 - phys_base))
}
