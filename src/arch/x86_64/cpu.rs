//! CPU instruction wrappers.

/// Current timestamp counter.
#[inline]
pub fn read_tsc() -> u64 {
    #[cfg(target_arch = "x86_64")]
    // SAFETY: RDTSC has no side effects and is executable at any privilege
    // level we run at.
    unsafe {
        core::arch::x86_64::_rdtsc()
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        use core::sync::atomic::{AtomicU64, Ordering};
        static FAKE_TSC: AtomicU64 = AtomicU64::new(0);
        FAKE_TSC.fetch_add(1, Ordering::Relaxed)
    }
}

/// Spin-wait hint.
#[inline]
pub fn pause() {
    core::hint::spin_loop();
}

/// Halt until the next interrupt. Hosted builds spin-hint instead.
#[inline]
pub fn halt() {
    #[cfg(target_os = "none")]
    x86_64::instructions::hlt();
    #[cfg(not(target_os = "none"))]
    core::hint::spin_loop();
}

#[inline]
pub fn enable_interrupts() {
    #[cfg(target_os = "none")]
    x86_64::instructions::interrupts::enable();
}

#[inline]
pub fn disable_interrupts() {
    #[cfg(target_os = "none")]
    x86_64::instructions::interrupts::disable();
}

/// Run `f` with interrupts disabled, restoring the previous state after.
#[inline]
pub fn without_interrupts<T, F: FnOnce() -> T>(f: F) -> T {
    #[cfg(target_os = "none")]
    {
        x86_64::instructions::interrupts::without_interrupts(f)
    }
    #[cfg(not(target_os = "none"))]
    {
        f()
    }
}

/// Invalidate the TLB entry covering `virt`.
#[inline]
pub fn invlpg(virt: u64) {
    #[cfg(target_os = "none")]
    x86_64::instructions::tlb::flush(x86_64::VirtAddr::new(virt));
    #[cfg(not(target_os = "none"))]
    let _ = virt;
}

/// Load CR3 with a new top-level page table.
///
/// # Safety
///
/// `pml4_phys` must be the page-aligned physical address of a valid PML4
/// whose upper half maps the running kernel.
#[inline]
pub unsafe fn write_cr3(pml4_phys: u64) {
    #[cfg(target_os = "none")]
    // SAFETY: caller upholds the PML4 contract above.
    unsafe {
        use x86_64::registers::control::{Cr3, Cr3Flags};
        use x86_64::structures::paging::PhysFrame;
        use x86_64::PhysAddr;
        Cr3::write(
            PhysFrame::containing_address(PhysAddr::new(pml4_phys)),
            Cr3Flags::empty(),
        );
    }
    #[cfg(not(target_os = "none"))]
    let _ = pml4_phys;
}

#[inline]
pub fn read_cr3() -> u64 {
    #[cfg(target_os = "none")]
    {
        let (frame, _) = x86_64::registers::control::Cr3::read();
        frame.start_address().as_u64()
    }
    #[cfg(not(target_os = "none"))]
    {
        0
    }
}
