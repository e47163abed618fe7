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
//! Sector read/write via a bounce buffer, command issue and completion.

use core::sync::atomic::{compiler_fence, Ordering};

use super::super::constants::*;
use super::super::error::AhciError;
use super::{commands, AhciController, RegisterAccess};
use crate::memory::dma::{alloc_dma_coherent, free_dma_coherent, DmaConstraints};

/// Commands are serialized per controller, so slot 0 and its
/// pre-allocated table carry every transfer.
pub const COMMAND_SLOT: u32 = 0;

/// Issue the slot and poll CI until the engine retires it. Bit 30 of the
/// interrupt status reports a task-file error from the device.
pub fn issue_and_wait<T: RegisterAccess>(regs: &T, port: u32, slot: u32) -> Result<(), AhciError> {
    regs.write_port_reg(port, PORT_IS, 0xFFFF_FFFF);

    // The header and table writes must be visible before the doorbell.
    compiler_fence(Ordering::SeqCst);
    regs.write_port_reg(port, PORT_CI, 1 << slot);

    if !regs.wait_while(
        || regs.read_port_reg(port, PORT_CI) & (1 << slot) != 0,
        COMMAND_TIMEOUT,
    ) {
        return Err(AhciError::CommandTimeout);
    }

    let interrupt_status = regs.read_port_reg(port, PORT_IS);
    if interrupt_status & IS_TFES != 0 {
        regs.write_port_reg(port, PORT_IS, interrupt_status);
        return Err(AhciError::CommandFailed);
    }
    Ok(())
}

fn check_range(ctrl: &AhciController, port: u32, lba: u64, count: u16) -> Result<bool, AhciError> {
    let ports = ctrl.ports.read();
    let device = ports.get(&port).ok_or(AhciError::PortNotInitialized)?;
    if lba + count as u64 > device.sector_count {
        return Err(AhciError::LbaRangeExceeded);
    }
    Ok(device.supports_48bit)
}

pub fn read_sectors(
    ctrl: &AhciController,
    port: u32,
    lba: u64,
    count: u16,
    buf: &mut [u8],
) -> Result<(), AhciError> {
    let bytes = count as usize * SECTOR_SIZE as usize;
    if buf.len() < bytes {
        return Err(AhciError::BufferTooSmall);
    }
    let lba48 = check_range(ctrl, port, lba, count)?;

    let bounce = alloc_dma_coherent(bytes, DmaConstraints { alignment: 2, dma32_only: true })
        .map_err(|_| AhciError::DmaAllocationFailed)?;

    let guard = ctrl.command_lock.lock();
    commands::build_rw_command(ctrl, port, lba, count, bounce.phys_addr.as_u64(), lba48, false)?;
    let result = issue_and_wait(ctrl, port, COMMAND_SLOT);
    drop(guard);

    match result {
        Ok(()) => {
            // SAFETY: the device DMA-filled `bytes` into the bounce region.
            unsafe {
                core::ptr::copy_nonoverlapping(bounce.virt_addr.as_ptr::<u8>(), buf.as_mut_ptr(), bytes);
            }
            free_dma_coherent(bounce);
            ctrl.read_ops.fetch_add(1, Ordering::Relaxed);
            ctrl.bytes_read.fetch_add(bytes as u64, Ordering::Relaxed);
            Ok(())
        }
        Err(e) => {
            free_dma_coherent(bounce);
            ctrl.errors.fetch_add(1, Ordering::Relaxed);
            Err(e)
        }
    }
}

pub fn write_sectors(
    ctrl: &AhciController,
    port: u32,
    lba: u64,
    count: u16,
    buf: &[u8],
) -> Result<(), AhciError> {
    let bytes = count as usize * SECTOR_SIZE as usize;
    if buf.len() < bytes {
        return Err(AhciError::BufferTooSmall);
    }
    let lba48 = check_range(ctrl, port, lba, count)?;

    let bounce = alloc_dma_coherent(bytes, DmaConstraints { alignment: 2, dma32_only: true })
        .map_err(|_| AhciError::DmaAllocationFailed)?;
    // SAFETY: the bounce region is at least `bytes` long.
    unsafe {
        core::ptr::copy_nonoverlapping(buf.as_ptr(), bounce.virt_addr.as_mut_ptr::<u8>(), bytes);
    }

    let guard = ctrl.command_lock.lock();
    commands::build_rw_command(ctrl, port, lba, count, bounce.phys_addr.as_u64(), lba48, true)?;
    let result = issue_and_wait(ctrl, port, COMMAND_SLOT);
    drop(guard);

    free_dma_coherent(bounce);
    match result {
        Ok(()) => {
            ctrl.write_ops.fetch_add(1, Ordering::Relaxed);
            ctrl.bytes_written.fetch_add(bytes as u64, Ordering::Relaxed);
            Ok(())
        }
        Err(e) => {
            ctrl.errors.fetch_add(1, Ordering::Relaxed);
            Err(e)
        }
    }
}
