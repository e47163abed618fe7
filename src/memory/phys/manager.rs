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

use alloc::vec::Vec;
use spin::Mutex;

use super::constants::MAX_MEMORY_REGIONS;
use super::error::{PmmError, PmmResult};
use super::types::{PmmStats, Region};
use crate::boot::{MemoryMapEntry, MemoryType};
use crate::memory::layout::{align_down, align_up, PAGE_SIZE_U64};

pub struct PhysManager {
    regions: Vec<Region>,
    reserved_bytes: u64,
    allocations: u64,
    frees: u64,
}

impl PhysManager {
    pub const fn new() -> Self {
        PhysManager {
            regions: Vec::new(),
            reserved_bytes: 0,
            allocations: 0,
            frees: 0,
        }
    }

    /// Build regions from the loader memory map. Free ranges become
    /// allocatable regions; Reserved and BadMemory lengths accrue to the
    /// reserved counter; overlaps of non-Free ranges with regions are
    /// marked allocated. Adjacent regions are merged at the end.
    pub fn init_from_map(&mut self, entries: &[MemoryMapEntry]) {
        for entry in entries {
            match entry.region_type {
                MemoryType::Free => {
                    if let Err(e) = self.add_region(entry.base_address, entry.region_length) {
                        log_warn!("PMM", "skipping map entry at {:#x}: {}", entry.base_address, e);
                    }
                }
                other => {
                    self.mark_range_allocated(entry.base_address, entry.region_length);
                    if matches!(other, MemoryType::Reserved | MemoryType::BadMemory) {
                        self.reserved_bytes += entry.region_length;
                    }
                }
            }
        }

        self.merge_adjacent_regions();

        let stats = self.statistics();
        log_info!(
            "PMM",
            "{} regions, {} pages total, {} free, {} KiB reserved",
            stats.region_count,
            stats.total_pages,
            stats.free_pages,
            stats.reserved_bytes / 1024
        );
    }

    pub fn add_region(&mut self, base: u64, length: u64) -> PmmResult<()> {
        if self.regions.len() >= MAX_MEMORY_REGIONS {
            return Err(PmmError::RegionLimitExceeded);
        }

        let aligned_base = align_up(base, PAGE_SIZE_U64);
        let end = align_down(base + length, PAGE_SIZE_U64);
        if end <= aligned_base {
            return Err(PmmError::ZeroPageCount);
        }

        self.regions.push(Region::new(aligned_base, end - aligned_base));
        Ok(())
    }

    fn merge_adjacent_regions(&mut self) {
        self.regions.sort_unstable_by_key(|r| r.base);
        let mut merged: Vec<Region> = Vec::with_capacity(self.regions.len());
        for region in self.regions.drain(..) {
            match merged.last_mut() {
                Some(last) if last.end() == region.base => last.absorb(region),
                _ => merged.push(region),
            }
        }
        self.regions = merged;
    }

    /// Force pages overlapping [base, base+length) into the allocated
    /// state, without touching the allocation counters. Used for firmware
    /// ranges that intersect otherwise-free regions.
    fn mark_range_allocated(&mut self, base: u64, length: u64) {
        let start = align_down(base, PAGE_SIZE_U64);
        let end = align_up(base + length, PAGE_SIZE_U64);

        for region in &mut self.regions {
            if start >= region.end() || end <= region.base {
                continue;
            }
            let first = region.page_index(start.max(region.base));
            let last = region.page_index((end.min(region.end()) - 1).max(region.base)) + 1;
            for page in first..last {
                if !region.is_allocated(page) {
                    region.mark_allocated(page, 1);
                }
            }
        }
    }

    pub fn allocate_page(&mut self) -> PmmResult<u64> {
        self.allocate_pages(1)
    }

    /// First-fit scan: regions in configuration order, `count` consecutive
    /// clear bits within one region.
    pub fn allocate_pages(&mut self, count: usize) -> PmmResult<u64> {
        if count == 0 {
            return Err(PmmError::ZeroPageCount);
        }

        for region in &mut self.regions {
            if let Some(start) = region.find_free_run(count, 1, 0) {
                region.mark_allocated(start, count);
                self.allocations += count as u64;
                return Ok(region.page_addr(start));
            }
        }

        log_err!("PMM", "out of memory: failed to allocate {} pages", count);
        Err(PmmError::OutOfMemory)
    }

    /// Like `allocate_pages` but only considers starts whose absolute
    /// physical address is a multiple of `alignment` (rounded up to a
    /// page multiple).
    pub fn allocate_aligned(&mut self, count: usize, alignment: u64) -> PmmResult<u64> {
        if count == 0 {
            return Err(PmmError::ZeroPageCount);
        }

        let alignment = align_up(alignment.max(PAGE_SIZE_U64), PAGE_SIZE_U64);
        let stride = (alignment / PAGE_SIZE_U64) as usize;

        for region in &mut self.regions {
            // Page index congruence that makes base + i*PAGE aligned.
            let base_pages = (region.base / PAGE_SIZE_U64) as usize;
            let phase = (stride - base_pages % stride) % stride;
            if let Some(start) = region.find_free_run(count, stride, phase) {
                region.mark_allocated(start, count);
                self.allocations += count as u64;
                return Ok(region.page_addr(start));
            }
        }

        log_err!(
            "PMM",
            "out of memory: {} pages at alignment {:#x}",
            count,
            alignment
        );
        Err(PmmError::OutOfMemory)
    }

    pub fn free_page(&mut self, phys: u64) -> PmmResult<()> {
        self.free_pages(phys, 1)
    }

    pub fn free_pages(&mut self, base: u64, count: usize) -> PmmResult<()> {
        if count == 0 {
            return Ok(());
        }
        if base % PAGE_SIZE_U64 != 0 {
            log_warn!("PMM", "free of unaligned address {:#x}", base);
            return Err(PmmError::UnalignedAddress);
        }

        for region in &mut self.regions {
            if !region.contains(base) {
                continue;
            }
            let start = region.page_index(base);
            if start + count > region.total_pages {
                log_err!("PMM", "free range {:#x}+{} pages leaves region", base, count);
                return Err(PmmError::RangeBeyondRegion);
            }
            for page in start..start + count {
                if !region.is_allocated(page) {
                    log_warn!("PMM", "double free at {:#x}", region.page_addr(page));
                    return Err(PmmError::DoubleFree);
                }
            }
            region.mark_free(start, count);
            self.frees += count as u64;
            return Ok(());
        }

        log_err!("PMM", "free of unknown frame {:#x}", base);
        Err(PmmError::UnknownFrame)
    }

    pub fn is_page_free(&self, phys: u64) -> bool {
        self.regions
            .iter()
            .find(|r| r.contains(phys))
            .map(|r| !r.is_allocated(r.page_index(phys)))
            .unwrap_or(false)
    }

    pub fn is_page_allocated(&self, phys: u64) -> bool {
        self.regions
            .iter()
            .find(|r| r.contains(phys))
            .map(|r| r.is_allocated(r.page_index(phys)))
            .unwrap_or(false)
    }

    /// Global frame numbering across regions, in configuration order.
    pub fn page_to_phys(&self, page_index: usize) -> Option<u64> {
        let mut current = 0usize;
        for region in &self.regions {
            if page_index < current + region.total_pages {
                return Some(region.page_addr(page_index - current));
            }
            current += region.total_pages;
        }
        None
    }

    pub fn phys_to_page(&self, phys: u64) -> Option<usize> {
        let mut current = 0usize;
        for region in &self.regions {
            if region.contains(phys) {
                return Some(current + region.page_index(phys));
            }
            current += region.total_pages;
        }
        None
    }

    pub fn statistics(&self) -> PmmStats {
        let total_pages: usize = self.regions.iter().map(|r| r.total_pages).sum();
        let free_pages: usize = self.regions.iter().map(|r| r.free_pages).sum();
        let used_pages = total_pages - free_pages;
        PmmStats {
            total_pages,
            free_pages,
            used_pages,
            total_bytes: total_pages as u64 * PAGE_SIZE_U64,
            free_bytes: free_pages as u64 * PAGE_SIZE_U64,
            used_bytes: used_pages as u64 * PAGE_SIZE_U64,
            reserved_bytes: self.reserved_bytes,
            allocations: self.allocations,
            frees: self.frees,
            region_count: self.regions.len(),
        }
    }
}

// ============================================================================
// GLOBAL STATE
// ============================================================================

static PMM: Mutex<PhysManager> = Mutex::new(PhysManager::new());

// ============================================================================
// PUBLIC API
// ============================================================================

pub fn init_from_map(entries: &[MemoryMapEntry]) {
    PMM.lock().init_from_map(entries);
}

pub fn allocate_page() -> PmmResult<u64> {
    PMM.lock().allocate_page()
}

pub fn allocate_pages(count: usize) -> PmmResult<u64> {
    PMM.lock().allocate_pages(count)
}

pub fn allocate_aligned(count: usize, alignment: u64) -> PmmResult<u64> {
    PMM.lock().allocate_aligned(count, alignment)
}

pub fn free_page(phys: u64) -> PmmResult<()> {
    PMM.lock().free_page(phys)
}

pub fn free_pages(base: u64, count: usize) -> PmmResult<()> {
    PMM.lock().free_pages(base, count)
}

pub fn is_page_free(phys: u64) -> bool {
    PMM.lock().is_page_free(phys)
}

pub fn is_page_allocated(phys: u64) -> bool {
    PMM.lock().is_page_allocated(phys)
}

pub fn page_to_phys(page_index: usize) -> Option<u64> {
    PMM.lock().page_to_phys(page_index)
}

pub fn phys_to_page(phys: u64) -> Option<usize> {
    PMM.lock().phys_to_page(phys)
}

pub fn statistics() -> PmmStats {
    PMM.lock().statistics()
}

pub fn dump_statistics() {
    let stats = statistics();
    log_info!(
        "PMM",
        "pages: total={} free={} used={}, allocs={} frees={}, reserved={} KiB, regions={}",
        stats.total_pages,
        stats.free_pages,
        stats.used_pages,
        stats.allocations,
        stats.frees,
        stats.reserved_bytes / 1024,
        stats.region_count
    );
}
