//! Kernel panic path: disable interrupts, dump what we know through the
//! log sink, halt forever.

use core::panic::PanicInfo;

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    crate::arch::x86_64::cpu::disable_interrupts();
    crate::log::logger::enter_panic_mode();

    log_err!("PANIC", "{}", info);
    crate::memory::phys::dump_statistics();

    loop {
        crate::arch::x86_64::cpu::halt();
    }
}
