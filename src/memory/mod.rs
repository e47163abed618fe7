//! Memory management: byte allocator, physical frames, virtual mappings.
//!
//! Bring-up order matters: the byte allocator arena lives in kernel .bss
//! and comes up first so region bitmaps can allocate, then the PMM
//! consumes the boot memory map, then the VMM builds the kernel address
//! space on top of it.

pub mod dma;
pub mod layout;
pub mod phys;
pub mod virt;

use crate::boot::BootInfo;

pub fn init(boot_info: &'static BootInfo) {
    #[cfg(all(not(test), target_os = "none"))]
    rust_heap::init();

    // SAFETY: the loader contract guarantees the map outlives the kernel.
    let entries = unsafe { boot_info.memory_map() };
    phys::init_from_map(entries);

    if let Err(e) = virt::init() {
        panic!("VMM init failed: {}", e);
    }
}

#[cfg(all(not(test), target_os = "none"))]
mod rust_heap {
    use crate::memory::layout::RUST_HEAP_SIZE;
    use linked_list_allocator::LockedHeap;

    #[global_allocator]
    static ALLOCATOR: LockedHeap = LockedHeap::empty();

    static mut ARENA: [u8; RUST_HEAP_SIZE] = [0; RUST_HEAP_SIZE];

    pub fn init() {
        // SAFETY: ARENA is only handed to the allocator once, here.
        unsafe {
            ALLOCATOR.lock().init(core::ptr::addr_of_mut!(ARENA) as *mut u8, RUST_HEAP_SIZE);
        }
    }
}
