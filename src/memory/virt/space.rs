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

use super::entry::PAGE_TABLE_ENTRIES;
use super::error::{VmmError, VmmResult};
use super::mapper::FrameProvider;

/// Half-way index: PML4 entries 256..512 are the shared kernel half.
pub const KERNEL_HALF_START: usize = PAGE_TABLE_ENTRIES / 2;

/// One PML4 tree plus bookkeeping. The upper half is shared with the
/// kernel space; the lower half is private.
pub struct AddressSpace {
    pub pml4: u64,
    pub mapped_pages: usize,
    pub allocated_tables: usize,
    pub reference_count: usize,
    is_kernel: bool,
}

impl AddressSpace {
    /// The kernel space: fresh zeroed PML4, owns its whole tree.
    pub fn new<F: FrameProvider>(frames: &mut F) -> VmmResult<Self> {
        let pml4 = frames.allocate_table_frame().ok_or(VmmError::OutOfMemory)?;
        Ok(AddressSpace {
            pml4,
            mapped_pages: 0,
            allocated_tables: 0,
            reference_count: 1,
            is_kernel: true,
        })
    }

    /// A process space: zeroed lower half, kernel upper half copied so
    /// ring 0 stays mapped after a CR3 switch.
    pub fn new_user<F: FrameProvider>(frames: &mut F, kernel: &AddressSpace) -> VmmResult<Self> {
        let pml4 = frames.allocate_table_frame().ok_or(VmmError::OutOfMemory)?;

        // SAFETY: both frames are live tables owned by their spaces.
        unsafe {
            let src = &*frames.table_ptr(kernel.pml4);
            let entries: [super::entry::PageTableEntry; PAGE_TABLE_ENTRIES / 2] =
                core::array::from_fn(|i| src.entries[KERNEL_HALF_START + i]);
            let dst = &mut *frames.table_ptr(pml4);
            dst.entries[KERNEL_HALF_START..].copy_from_slice(&entries);
        }

        Ok(AddressSpace {
            pml4,
            mapped_pages: 0,
            allocated_tables: 0,
            reference_count: 1,
            is_kernel: false,
        })
    }

    pub fn add_ref(&mut self) {
        self.reference_count += 1;
    }

    pub fn is_kernel(&self) -> bool {
        self.is_kernel
    }
}

/// Drop one reference; at zero, free every lower-half table and mapped
/// frame, then the PML4. Kernel space requests are ignored.
pub fn destroy<F: FrameProvider>(space: &mut AddressSpace, frames: &mut F) {
    if space.is_kernel {
        return;
    }
    if space.reference_count > 1 {
        space.reference_count -= 1;
        return;
    }
    space.reference_count = 0;

    for i in 0..KERNEL_HALF_START {
        // SAFETY: the PML4 frame stays live until the end of this function.
        let entry = unsafe { (*frames.table_ptr(space.pml4)).entries[i] };
        if entry.is_present() {
            free_table_recursive(frames, entry.addr(), 3);
        }
    }
    frames.free_frame(space.pml4);
}

/// Free a table frame and, above the leaf level, everything it points at.
fn free_table_recursive<F: FrameProvider>(frames: &mut F, table_phys: u64, level: usize) {
    for i in 0..PAGE_TABLE_ENTRIES {
        // SAFETY: table_phys is a live table frame until the free below.
        let entry = unsafe { (*frames.table_ptr(table_phys)).entries[i] };
        if !entry.is_present() {
            continue;
        }
        if level > 1 && !entry.is_huge() {
            free_table_recursive(frames, entry.addr(), level - 1);
        } else {
            frames.free_frame(entry.addr());
        }
    }
    frames.free_frame(table_phys);
}
