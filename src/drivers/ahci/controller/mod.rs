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

pub mod commands;
pub mod helpers;
pub mod init;
pub mod io;

pub use helpers::{build_prdt, fill_h2d_fis, hdr_flags_for, RegisterAccess};

use alloc::collections::BTreeMap;
use core::sync::atomic::{AtomicU64, Ordering};
use spin::{Mutex, RwLock};

use crate::drivers::pci::{self, Bar, PciDevice};
use crate::memory::layout::{align_down, align_up, PAGE_SIZE_U64};
use crate::memory::virt::PageFlags;

use super::constants::*;
use super::dma::PortDma;
use super::error::AhciError;
use super::types::AhciDevice;

pub struct AhciController {
    mmio_base: u64,
    pub(super) ports: RwLock<BTreeMap<u32, AhciDevice>>,
    pub(super) port_dma: Mutex<BTreeMap<u32, PortDma>>,
    /// One command in flight per controller.
    pub(super) command_lock: Mutex<()>,
    pub(super) read_ops: AtomicU64,
    pub(super) write_ops: AtomicU64,
    pub(super) bytes_read: AtomicU64,
    pub(super) bytes_written: AtomicU64,
    pub(super) errors: AtomicU64,
}

impl RegisterAccess for AhciController {
    fn base_addr(&self) -> u64 {
        self.mmio_base
    }
}

impl AhciController {
    /// Claim the PCI function and map BAR5 uncached into the MMIO window.
    pub fn new(pci_device: &PciDevice) -> Result<Self, AhciError> {
        pci::enable_device(pci_device);

        let Some(Bar::Memory { base: bar5, .. }) = pci_device.bar(5) else {
            return Err(AhciError::Bar5NotConfigured);
        };

        let mmio_base = map_hba_registers(bar5)?;

        Ok(AhciController {
            mmio_base,
            ports: RwLock::new(BTreeMap::new()),
            port_dma: Mutex::new(BTreeMap::new()),
            command_lock: Mutex::new(()),
            read_ops: AtomicU64::new(0),
            write_ops: AtomicU64::new(0),
            bytes_read: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        })
    }

    /// HBA bring-up followed by per-port probing.
    pub fn init(&self) -> Result<(), AhciError> {
        let ports_implemented = init::init_hba(self)?;

        for port in 0..32 {
            if ports_implemented & (1 << port) == 0 {
                continue;
            }
            match init::init_port(self, port) {
                Ok(true) => log_info!("AHCI", "port {} initialized", port),
                Ok(false) => {}
                Err(e) => log_warn!("AHCI", "port {} skipped: {}", port, e),
            }
        }

        Ok(())
    }

    pub fn read_sectors(&self, port: u32, lba: u64, count: u16, buf: &mut [u8]) -> Result<(), AhciError> {
        io::read_sectors(self, port, lba, count, buf)
    }

    pub fn write_sectors(&self, port: u32, lba: u64, count: u16, buf: &[u8]) -> Result<(), AhciError> {
        io::write_sectors(self, port, lba, count, buf)
    }

    pub fn device_count(&self) -> usize {
        self.ports.read().len()
    }

    /// (reads, writes, bytes read, bytes written, errors)
    pub fn statistics(&self) -> (u64, u64, u64, u64, u64) {
        (
            self.read_ops.load(Ordering::Relaxed),
            self.write_ops.load(Ordering::Relaxed),
            self.bytes_read.load(Ordering::Relaxed),
            self.bytes_written.load(Ordering::Relaxed),
            self.errors.load(Ordering::Relaxed),
        )
    }

    pub fn with_device<T>(&self, port: u32, f: impl FnOnce(&AhciDevice) -> T) -> Option<T> {
        self.ports.read().get(&port).map(f)
    }
}

/// The HBA register block must be reached through an uncached mapping.
fn map_hba_registers(bar5: u64) -> Result<u64, AhciError> {
    let phys_base = align_down(bar5, PAGE_SIZE_U64);
    let span = align_up(bar5 + 0x1100, PAGE_SIZE_U64) - phys_base;
    let virt_base = crate::memory::layout::MMIO_BASE + phys_base;

    let flags = PageFlags::PRESENT
        | PageFlags::WRITABLE
        | PageFlags::CACHE_DISABLED
        | PageFlags::NO_EXECUTE;
    crate::memory::virt::map_pages(virt_base, phys_base, (span / PAGE_SIZE_U64) as usize, flags)
        .map_err(|_| AhciError::MmioMapFailed)?;

    Ok(virt_base + (bar5 - phys_base))
}
