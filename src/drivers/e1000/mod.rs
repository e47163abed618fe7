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
//! Intel 8254x-class gigabit Ethernet driver.

pub mod constants;
pub mod descriptors;
pub mod device;
pub mod error;

#[cfg(test)]
mod tests;

pub use device::E1000Device;
pub use error::E1000Error;

use spin::{Mutex, Once};

use crate::drivers::pci::PciDevice;
use constants::{E1000_DEVICE_IDS, INTEL_VENDOR_ID};

static E1000_DEVICE: Once<Mutex<E1000Device>> = Once::new();
static NET_DEVICE_INDEX: Once<u32> = Once::new();

pub fn init_e1000(devices: &[PciDevice]) -> Result<(), E1000Error> {
    if E1000_DEVICE.is_completed() {
        return Ok(());
    }

    let pci_device = devices
        .iter()
        .find(|d| d.vendor_id == INTEL_VENDOR_ID && E1000_DEVICE_IDS.contains(&d.device_id))
        .or_else(|| devices.iter().find(|d| d.matches_class(0x02, 0x00)))
        .ok_or(E1000Error::NoDeviceFound)?;

    let device = E1000Device::new(pci_device)?;
    E1000_DEVICE.call_once(|| Mutex::new(device));

    let index = crate::net::ethernet::register_device(&E1000_BRIDGE);
    NET_DEVICE_INDEX.call_once(|| index);
    log_info!("E1000", "registered with the network stack as device {}", index);
    Ok(())
}

/// Index the Ethernet layer assigned to this NIC, for interface setup.
pub fn net_device_index() -> Option<u32> {
    NET_DEVICE_INDEX.get().copied()
}

pub fn get_device() -> Option<&'static Mutex<E1000Device>> {
    E1000_DEVICE.get()
}

/// ISR entry wired to the NIC's IRQ line.
pub fn handle_interrupt() {
    if let Some(device) = get_device() {
        let frames = {
            let mut device = device.lock();
            device.handle_interrupt()
        };
        for frame in frames {
            crate::net::ethernet::deliver_frame(&frame);
        }
    }
}

/// Poll-mode receive pump for the bring-up path without the IRQ wired.
pub fn poll() {
    if let Some(device) = get_device() {
        let frames = device.lock().receive();
        for frame in frames {
            crate::net::ethernet::deliver_frame(&frame);
        }
    }
}

/// Stateless bridge: the network stack holds `&'static dyn NetDevice`,
/// the bridge locks the driver per call.
pub struct E1000Bridge;

pub static E1000_BRIDGE: E1000Bridge = E1000Bridge;

impl crate::net::ethernet::NetDevice for E1000Bridge {
    fn mac_address(&self) -> [u8; 6] {
        get_device().map(|d| d.lock().mac_address).unwrap_or([0; 6])
    }

    fn mtu(&self) -> usize {
        constants::MAX_MTU
    }

    fn link_up(&self) -> bool {
        get_device().map(|d| d.lock().link_up).unwrap_or(false)
    }

    fn send_frame(&self, dest: [u8; 6], ethertype: u16, payload: &[u8]) -> bool {
        match get_device() {
            Some(device) => device.lock().send(dest, ethertype, payload).is_ok(),
            None => false,
        }
    }
}
