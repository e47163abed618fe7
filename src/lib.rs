#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]

extern crate alloc;

#[macro_use]
pub mod log;

pub mod arch;
pub mod boot;
pub mod drivers;
pub mod memory;
pub mod net;
pub mod sched;
pub mod task;
pub mod time;

#[cfg(all(not(test), target_os = "none"))]
mod panic;

use boot::BootInfo;

/// Kernel entry, called by the bootloader trampoline with the boot record
/// already copied out of reclaimable memory.
pub fn kernel_main(boot_info: &'static BootInfo) -> ! {
    boot::validate(boot_info);

    log::logger::init();
    memory::init(boot_info);

    log_info!("KERNEL", "osmium online, boot record v{}", boot_info.version);
    memory::phys::dump_statistics();

    task::manager::init();
    sched::init();

    if let Err(e) = drivers::init() {
        log_warn!("KERNEL", "driver bring-up degraded: {}", e);
    }

    net::init();

    // Static interface configuration until a DHCP client lands: the
    // QEMU user-network defaults.
    if let Some(device_index) = drivers::e1000::net_device_index() {
        let result = net::ip::add_interface(
            device_index,
            net::Ipv4Addr::new(10, 0, 2, 15),
            net::Ipv4Addr::new(255, 255, 255, 0),
            net::Ipv4Addr::new(10, 0, 2, 2),
        );
        if let Err(e) = result {
            log_warn!("KERNEL", "interface configuration failed: {}", e);
        }
    }

    sched::enter()
}
