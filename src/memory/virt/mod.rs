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
//! Virtual memory manager: address spaces, the four-level walker, and
//! the page-granular kernel heap.

pub mod entry;
pub mod error;
pub mod heap;
pub mod mapper;
pub mod space;

#[cfg(test)]
pub mod testutil;

pub use entry::{PageFlags, PageTable, PageTableEntry, PAGE_TABLE_ENTRIES};
pub use error::{VmmError, VmmResult};
pub use heap::BumpHeap;
pub use mapper::FrameProvider;
pub use space::AddressSpace;

use spin::Mutex;

use crate::memory::layout::{phys_to_virt, KHEAP_BASE, KHEAP_SIZE, PAGE_SIZE};

/// Frame provider wired to the global PMM through the direct map.
pub struct KernelFrames;

impl FrameProvider for KernelFrames {
    fn allocate_table_frame(&mut self) -> Option<u64> {
        let phys = crate::memory::phys::allocate_page().ok()?;
        // SAFETY: freshly allocated frame, reachable through the direct map.
        unsafe {
            core::ptr::write_bytes(phys_to_virt(phys) as *mut u8, 0, PAGE_SIZE);
        }
        Some(phys)
    }

    fn free_frame(&mut self, phys: u64) {
        if let Err(e) = crate::memory::phys::free_page(phys) {
            log_warn!("VMM", "table frame free failed at {:#x}: {}", phys, e);
        }
    }

    fn table_ptr(&mut self, phys: u64) -> *mut PageTable {
        phys_to_virt(phys) as *mut PageTable
    }
}

static KERNEL_SPACE: Mutex<Option<AddressSpace>> = Mutex::new(None);
static KERNEL_HEAP: Mutex<BumpHeap> = Mutex::new(BumpHeap::new(KHEAP_BASE, KHEAP_SIZE));

/// Create the kernel address space. Must run after the PMM is live.
pub fn init() -> VmmResult<()> {
    let mut frames = KernelFrames;
    let space = AddressSpace::new(&mut frames)?;
    *KERNEL_SPACE.lock() = Some(space);
    log_info!("VMM", "kernel address space created");
    Ok(())
}

/// Run `f` against the kernel address space.
pub fn with_kernel_space<T>(f: impl FnOnce(&mut AddressSpace, &mut KernelFrames) -> T) -> VmmResult<T> {
    let mut guard = KERNEL_SPACE.lock();
    let space = guard.as_mut().ok_or(VmmError::NotInitialized)?;
    Ok(f(space, &mut KernelFrames))
}

pub fn map_page(virt: u64, phys: u64, flags: PageFlags) -> VmmResult<()> {
    with_kernel_space(|space, frames| mapper::map_page(space, frames, virt, phys, flags))?
}

pub fn map_pages(virt: u64, phys: u64, count: usize, flags: PageFlags) -> VmmResult<()> {
    with_kernel_space(|space, frames| mapper::map_pages(space, frames, virt, phys, count, flags))?
}

pub fn unmap_page(virt: u64) -> VmmResult<()> {
    with_kernel_space(|space, frames| mapper::unmap_page(space, frames, virt))?
}

pub fn get_physical_address(virt: u64) -> Option<u64> {
    with_kernel_space(|space, frames| mapper::translate(space, frames, virt))
        .ok()
        .flatten()
}

/// Fork a new address space sharing the kernel upper half.
pub fn create_address_space() -> VmmResult<AddressSpace> {
    let mut guard = KERNEL_SPACE.lock();
    let kernel = guard.as_mut().ok_or(VmmError::NotInitialized)?;
    AddressSpace::new_user(&mut KernelFrames, kernel)
}

/// Drop a reference to `space`; tear it down when the count hits zero.
/// The kernel space itself is never destroyed.
pub fn destroy_address_space(space: &mut AddressSpace) {
    space::destroy(space, &mut KernelFrames);
}

pub fn kmalloc(size: usize) -> VmmResult<u64> {
    let mut guard = KERNEL_SPACE.lock();
    let space = guard.as_mut().ok_or(VmmError::NotInitialized)?;
    KERNEL_HEAP.lock().kmalloc(space, &mut KernelFrames, size)
}

pub fn kmalloc_aligned(size: usize, align: usize) -> VmmResult<u64> {
    let mut guard = KERNEL_SPACE.lock();
    let space = guard.as_mut().ok_or(VmmError::NotInitialized)?;
    KERNEL_HEAP.lock().kmalloc_aligned(space, &mut KernelFrames, size, align)
}

pub fn kfree(ptr: u64) {
    let mut guard = KERNEL_SPACE.lock();
    if let Some(space) = guard.as_mut() {
        KERNEL_HEAP.lock().kfree(space, &mut KernelFrames, ptr);
    }
}

pub fn krealloc(ptr: u64, new_size: usize) -> VmmResult<u64> {
    let mut guard = KERNEL_SPACE.lock();
    let space = guard.as_mut().ok_or(VmmError::NotInitialized)?;
    KERNEL_HEAP.lock().krealloc(space, &mut KernelFrames, ptr, new_size)
}
