//! Hardware drivers.

pub mod ahci;
pub mod e1000;
pub mod pci;

/// Bring up storage and network. Either may be absent; a missing device
/// degrades the corresponding subsystem instead of failing the boot.
pub fn init() -> Result<(), &'static str> {
    let devices = pci::scan();
    log_info!("DRIVER", "pci scan found {} devices", devices.len());

    let mut degraded = None;

    match ahci::init_ahci(&devices) {
        Ok(()) => {}
        Err(e) => {
            log_warn!("DRIVER", "ahci unavailable: {}", e);
            degraded = Some("no usable AHCI controller");
        }
    }

    match e1000::init_e1000(&devices) {
        Ok(()) => {}
        Err(e) => {
            log_warn!("DRIVER", "e1000 unavailable: {}", e);
            degraded = Some("no usable Ethernet device");
        }
    }

    match degraded {
        Some(reason) => Err(reason),
        None => Ok(()),
    }
}
