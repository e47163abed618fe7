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
//
//! AHCI (Advanced Host Controller Interface) SATA driver.
//!
//! # References
//! - AHCI 1.3.1 Specification (Intel)
//! - Serial ATA Revision 3.0 Specification

pub mod constants;
pub mod controller;
pub mod dma;
pub mod error;
pub mod types;


pub use controller::AhciController;
pub use error::AhciError;
pub use types::{AhciDevice, AhciDeviceType, CommandHeader, CommandTable, IdentifyInfo, PrdtEntry};

use spin::Once;

use crate::drivers::pci::PciDevice;

static AHCI_CONTROLLER: Once<AhciController> = Once::new();

/// Find the HBA on PCI (class 0x01, subclass 0x06, prog-if 0x01) and
/// bring up every implemented port.
pub fn init_ahci(devices: &[PciDevice]) -> Result<(), AhciError> {
    if AHCI_CONTROLLER.is_completed() {
        return Ok(());
    }

    let pci_device =
        crate::drivers::pci::find_device_by_class(devices, 0x01, 0x06, Some(0x01))
            .ok_or(AhciError::NoControllerFound)?;

    let controller = AhciController::new(pci_device)?;
    controller.init()?;

    AHCI_CONTROLLER.call_once(|| controller);
    log_info!("AHCI", "subsystem initialized");
    Ok(())
}

#[inline]
pub fn get_controller() -> Option<&'static AhciController> {
    AHCI_CONTROLLER.get()
}

/// Block API consumed by the filesystem layer. 512-byte LBAs.
pub fn read_sectors(port: u32, lba: u64, count: u16, buf: &mut [u8]) -> Result<(), AhciError> {
    get_controller()
        .ok_or(AhciError::NoControllerFound)?
        .read_sectors(port, lba, count, buf)
}

pub fn write_sectors(port: u32, lba: u64, count: u16, buf: &[u8]) -> Result<(), AhciError> {
    get_controller()
        .ok_or(AhciError::NoControllerFound)?
        .write_sectors(port, lba, count, buf)
}
