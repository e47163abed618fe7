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
//! Per-port DMA memory: command list, FIS receive area, command tables.

use crate::memory::dma::{alloc_dma_coherent, DmaConstraints, DmaRegion};

use super::constants::{
    COMMAND_LIST_SIZE, COMMAND_SLOTS_PER_PORT, COMMAND_TABLE_SLOT_SIZE, FIS_RECEIVE_SIZE,
};
use super::error::AhciError;
use super::types::{CommandHeader, CommandTable};

/// DMA-coherent structures for one port. The bases programmed into
/// CLB/FB are physical; every region is page-aligned (stricter than the
/// 1 KiB / 256 B / 128 B minimums the specification demands) and pinned
/// for the controller's lifetime.
pub struct PortDma {
    command_list: DmaRegion,
    fis_receive: DmaRegion,
    command_tables: DmaRegion,
}

impl PortDma {
    pub fn new() -> Result<Self, AhciError> {
        let page = DmaConstraints { alignment: 4096, dma32_only: true };

        let command_list = alloc_dma_coherent(COMMAND_LIST_SIZE, page)
            .map_err(|_| AhciError::DmaAllocationFailed)?;
        let fis_receive = alloc_dma_coherent(FIS_RECEIVE_SIZE, page)
            .map_err(|_| AhciError::DmaAllocationFailed)?;
        let command_tables =
            alloc_dma_coherent(COMMAND_TABLE_SLOT_SIZE * COMMAND_SLOTS_PER_PORT, page)
                .map_err(|_| AhciError::DmaAllocationFailed)?;

        Ok(PortDma { command_list, fis_receive, command_tables })
    }

    #[inline]
    pub fn command_list_phys(&self) -> u64 {
        self.command_list.phys_addr.as_u64()
    }

    #[inline]
    pub fn fis_receive_phys(&self) -> u64 {
        self.fis_receive.phys_addr.as_u64()
    }

    /// Header entry for `slot` in the command list.
    #[inline]
    pub fn header_for_slot(&self, slot: u32) -> *mut CommandHeader {
        debug_assert!((slot as usize) < COMMAND_SLOTS_PER_PORT);
        // SAFETY: the command list spans 32 consecutive headers.
        unsafe { self.command_list.virt_addr.as_mut_ptr::<CommandHeader>().add(slot as usize) }
    }

    /// Command table and its physical base for `slot`.
    #[inline]
    pub fn table_for_slot(&self, slot: u32) -> (*mut CommandTable, u64) {
        debug_assert!((slot as usize) < COMMAND_SLOTS_PER_PORT);
        let offset = COMMAND_TABLE_SLOT_SIZE as u64 * slot as u64;
        let virt = (self.command_tables.virt_addr + offset).as_mut_ptr::<CommandTable>();
        (virt, self.command_tables.phys_addr.as_u64() + offset)
    }
}
