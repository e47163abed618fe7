//! DMA-coherent allocations for device command structures and buffers.
//!
//! Backed by physically contiguous PMM pages reached through the direct
//! map. Buffers stay pinned for the device's lifetime; callers install
//! the physical address into device registers and use the virtual side.

use x86_64::{PhysAddr, VirtAddr};

use super::layout::{phys_to_virt, PAGE_SIZE};
use super::phys::{self, PmmError};

#[derive(Debug, Clone, Copy)]
pub struct DmaConstraints {
    /// Physical alignment in bytes; rounded up to a page internally.
    pub alignment: usize,
    /// Restrict the allocation to 32-bit physical addresses.
    pub dma32_only: bool,
}

impl Default for DmaConstraints {
    fn default() -> Self {
        DmaConstraints { alignment: PAGE_SIZE, dma32_only: false }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DmaRegion {
    pub phys_addr: PhysAddr,
    pub virt_addr: VirtAddr,
    pub size: usize,
}

pub fn alloc_dma_coherent(size: usize, constraints: DmaConstraints) -> Result<DmaRegion, PmmError> {
    let pages = (size + PAGE_SIZE - 1) / PAGE_SIZE;
    let phys = phys::allocate_aligned(pages, constraints.alignment as u64)?;

    if constraints.dma32_only && phys + (pages * PAGE_SIZE) as u64 > u32::MAX as u64 {
        let _ = phys::free_pages(phys, pages);
        return Err(PmmError::OutOfMemory);
    }

    let virt = VirtAddr::new(phys_to_virt(phys));
    // SAFETY: fresh contiguous frames, reachable through the direct map.
    unsafe {
        core::ptr::write_bytes(virt.as_mut_ptr::<u8>(), 0, pages * PAGE_SIZE);
    }

    Ok(DmaRegion {
        phys_addr: PhysAddr::new(phys),
        virt_addr: virt,
        size: pages * PAGE_SIZE,
    })
}

pub fn free_dma_coherent(region: DmaRegion) {
    let pages = region.size / PAGE_SIZE;
    if let Err(e) = phys::free_pages(region.phys_addr.as_u64(), pages) {
        log_warn!("DMA", "free of region at {:#x} failed: {}", region.phys_addr.as_u64(), e);
    }
}
