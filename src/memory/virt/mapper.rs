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
//! Four-level table walker. All table frames come from a `FrameProvider`
//! so the walker runs identically against the PMM + direct map and
//! against the hosted test provider.

use super::entry::{table_indices, PageFlags, PageTable};
use super::error::{VmmError, VmmResult};
use super::space::AddressSpace;
use crate::memory::layout::{is_page_aligned, PAGE_SIZE_U64};

/// Source of page-table frames and the phys→pointer resolution for them.
pub trait FrameProvider {
    /// A zeroed frame for a new table (or a heap-backed leaf).
    fn allocate_table_frame(&mut self) -> Option<u64>;
    fn free_frame(&mut self, phys: u64);
    fn table_ptr(&mut self, phys: u64) -> *mut PageTable;
}

/// Level of a leaf entry: index into `table_indices` order.
const LEAF: usize = 0;
const PML4: usize = 3;

/// Walk to the table holding the leaf entry for `virt`, allocating zeroed
/// intermediates when `allocate` is set. Returns the PT physical address.
fn walk_to_leaf_table<F: FrameProvider>(
    space: &mut AddressSpace,
    frames: &mut F,
    virt: u64,
    allocate: bool,
    user: bool,
) -> VmmResult<u64> {
    let idx = table_indices(virt);
    let mut table_phys = space.pml4;

    for level in (LEAF + 1..=PML4).rev() {
        // SAFETY: table_phys always names a live table frame owned by this
        // address space; the provider resolves it to a valid pointer.
        let table = unsafe { &mut *frames.table_ptr(table_phys) };
        let entry = &mut table.entries[idx[level]];

        if !entry.is_present() {
            if !allocate {
                return Err(VmmError::NotMapped);
            }
            let new_table = frames.allocate_table_frame().ok_or(VmmError::OutOfMemory)?;
            let mut flags = PageFlags::PRESENT | PageFlags::WRITABLE;
            if user {
                flags |= PageFlags::USER;
            }
            entry.set(new_table, flags);
            space.allocated_tables += 1;
        } else if entry.is_huge() {
            return Err(VmmError::HugeParent);
        }

        table_phys = entry.addr();
    }

    Ok(table_phys)
}

pub fn map_page<F: FrameProvider>(
    space: &mut AddressSpace,
    frames: &mut F,
    virt: u64,
    phys: u64,
    flags: PageFlags,
) -> VmmResult<()> {
    if !is_page_aligned(virt) || !is_page_aligned(phys) {
        return Err(VmmError::Misaligned);
    }

    let user = flags.contains(PageFlags::USER);
    let pt_phys = walk_to_leaf_table(space, frames, virt, true, user)?;

    // SAFETY: pt_phys was just produced by the walk over live tables.
    let table = unsafe { &mut *frames.table_ptr(pt_phys) };
    let entry = &mut table.entries[table_indices(virt)[LEAF]];
    if entry.is_present() {
        log_warn!("VMM", "page already mapped: {:#x} -> {:#x}", virt, entry.addr());
        return Err(VmmError::AlreadyMapped);
    }

    entry.set(phys, flags | PageFlags::PRESENT);
    space.mapped_pages += 1;
    crate::arch::x86_64::cpu::invlpg(virt);
    Ok(())
}

/// Map a contiguous range; on any failure every page mapped by this call
/// is unmapped again before the error is returned.
pub fn map_pages<F: FrameProvider>(
    space: &mut AddressSpace,
    frames: &mut F,
    virt: u64,
    phys: u64,
    count: usize,
    flags: PageFlags,
) -> VmmResult<()> {
    for i in 0..count {
        let offset = i as u64 * PAGE_SIZE_U64;
        if let Err(e) = map_page(space, frames, virt + offset, phys + offset, flags) {
            for j in 0..i {
                let _ = unmap_page_keep_frame(space, frames, virt + j as u64 * PAGE_SIZE_U64);
            }
            return Err(e);
        }
    }
    Ok(())
}

/// Unmap `virt`, free the mapped frame through the provider, and prune
/// intermediate tables that the removal emptied.
pub fn unmap_page<F: FrameProvider>(
    space: &mut AddressSpace,
    frames: &mut F,
    virt: u64,
) -> VmmResult<()> {
    let phys = unmap_page_keep_frame(space, frames, virt)?;
    frames.free_frame(phys);
    Ok(())
}

/// Unmap without releasing the leaf frame (rollback paths own it).
pub fn unmap_page_keep_frame<F: FrameProvider>(
    space: &mut AddressSpace,
    frames: &mut F,
    virt: u64,
) -> VmmResult<u64> {
    if !is_page_aligned(virt) {
        return Err(VmmError::Misaligned);
    }

    let idx = table_indices(virt);

    // Collect the table chain so empty parents can be pruned afterwards.
    let mut chain = [0u64; 4];
    chain[PML4] = space.pml4;
    let mut table_phys = space.pml4;
    for level in (LEAF + 1..=PML4).rev() {
        // SAFETY: chain entries name live tables of this space.
        let table = unsafe { &mut *frames.table_ptr(table_phys) };
        let entry = &table.entries[idx[level]];
        if !entry.is_present() {
            return Err(VmmError::NotMapped);
        }
        if entry.is_huge() {
            return Err(VmmError::HugeParent);
        }
        table_phys = entry.addr();
        chain[level - 1] = table_phys;
    }

    // SAFETY: chain[LEAF] is the live PT for virt.
    let pt = unsafe { &mut *frames.table_ptr(chain[LEAF]) };
    let entry = &mut pt.entries[idx[LEAF]];
    if !entry.is_present() {
        return Err(VmmError::NotMapped);
    }
    let phys = entry.addr();
    entry.clear();
    space.mapped_pages -= 1;
    crate::arch::x86_64::cpu::invlpg(virt);

    // Prune: free each emptied table and clear its parent entry, bottom up.
    for level in LEAF..PML4 {
        // SAFETY: chain holds live table frames checked above.
        let table = unsafe { &*frames.table_ptr(chain[level]) };
        if !table.is_empty() {
            break;
        }
        let parent = unsafe { &mut *frames.table_ptr(chain[level + 1]) };
        parent.entries[idx[level + 1]].clear();
        frames.free_frame(chain[level]);
        space.allocated_tables -= 1;
    }

    Ok(phys)
}

/// Resolve `virt` to its physical address, page offset included. Huge
/// intermediate entries resolve with the wider offset.
pub fn translate<F: FrameProvider>(
    space: &mut AddressSpace,
    frames: &mut F,
    virt: u64,
) -> Option<u64> {
    let idx = table_indices(virt);
    let mut table_phys = space.pml4;

    for level in (LEAF..=PML4).rev() {
        // SAFETY: the chain only follows present entries of live tables.
        let table = unsafe { &*frames.table_ptr(table_phys) };
        let entry = &table.entries[idx[level]];
        if !entry.is_present() {
            return None;
        }
        if level == LEAF {
            return Some(entry.addr() + (virt & (PAGE_SIZE_U64 - 1)));
        }
        if entry.is_huge() {
            // 2 MiB at level 1, 1 GiB at level 2.
            let span = PAGE_SIZE_U64 << (9 * level);
            return Some(entry.addr() + (virt & (span - 1)));
        }
        table_phys = entry.addr();
    }

    None
}
