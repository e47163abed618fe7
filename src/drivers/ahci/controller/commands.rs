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
//! Command assembly into the per-port DMA structures.

use super::super::constants::*;
use super::super::error::AhciError;
use super::super::types::{CommandHeader, CommandTable};
use super::helpers::{build_prdt, fill_h2d_fis, hdr_flags_for};
use super::io::COMMAND_SLOT;
use super::AhciController;

/// Zero the slot's header and table, returning pointers for filling.
fn prepare_slot(
    ctrl: &AhciController,
    port: u32,
    slot: u32,
) -> Result<(*mut CommandHeader, *mut CommandTable, u64), AhciError> {
    let dma = ctrl.port_dma.lock();
    let dma = dma.get(&port).ok_or(AhciError::PortNotInitialized)?;

    let header = dma.header_for_slot(slot);
    let (table, table_phys) = dma.table_for_slot(slot);

    // SAFETY: both point into this port's pinned DMA allocations.
    unsafe {
        core::ptr::write_bytes(header, 0, 1);
        core::ptr::write_bytes(table, 0, 1);
    }

    Ok((header, table, table_phys))
}

pub fn build_identify_command(
    ctrl: &AhciController,
    port: u32,
    buffer_phys: u64,
) -> Result<(), AhciError> {
    let (header, table, table_phys) = prepare_slot(ctrl, port, COMMAND_SLOT)?;

    // SAFETY: header/table were just prepared for this slot.
    unsafe {
        fill_h2d_fis(&mut (*table).cfis, ATA_CMD_IDENTIFY, 0, 0, false);
        (*table).prdt[0].set(buffer_phys, 512, true);

        (*header).flags = hdr_flags_for(5, false);
        (*header).prdtl = 1;
        (*header).ctba = (table_phys & 0xFFFF_FFFF) as u32;
        (*header).ctbau = (table_phys >> 32) as u32;
    }
    Ok(())
}

/// Read or write `count` sectors: pick the 48-bit opcode when the device
/// supports it, scatter the transfer across the slot's PRDT.
pub fn build_rw_command(
    ctrl: &AhciController,
    port: u32,
    lba: u64,
    count: u16,
    buffer_phys: u64,
    lba48: bool,
    is_write: bool,
) -> Result<(), AhciError> {
    let (header, table, table_phys) = prepare_slot(ctrl, port, COMMAND_SLOT)?;
    let bytes = count as usize * SECTOR_SIZE as usize;

    let cmd = match (is_write, lba48) {
        (false, true) => ATA_CMD_READ_DMA_EXT,
        (false, false) => ATA_CMD_READ_DMA,
        (true, true) => ATA_CMD_WRITE_DMA_EXT,
        (true, false) => ATA_CMD_WRITE_DMA,
    };

    // SAFETY: header/table were just prepared for this slot.
    unsafe {
        fill_h2d_fis(&mut (*table).cfis, cmd, lba, count, lba48);
        let prdt_len = build_prdt(&mut (*table).prdt, buffer_phys, bytes)?;

        (*header).flags = hdr_flags_for(5, is_write);
        (*header).prdtl = prdt_len;
        (*header).ctba = (table_phys & 0xFFFF_FFFF) as u32;
        (*header).ctbau = (table_phys >> 32) as u32;
    }
    Ok(())
}
