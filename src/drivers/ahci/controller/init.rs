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
//! HBA and port initialization, IDENTIFY DEVICE.

use super::super::constants::*;
use super::super::dma::PortDma;
use super::super::error::AhciError;
use super::super::types::{AhciDevice, AhciDeviceType, IdentifyInfo};
use super::{commands, io, AhciController, RegisterAccess};
use crate::memory::dma::{alloc_dma_coherent, free_dma_coherent, DmaConstraints};

/// Claim the HBA from firmware: set the OS-owned bit and poll until the
/// BIOS lets go. Controllers without the handoff capability skip this.
pub fn bios_handoff<T: RegisterAccess>(regs: &T) -> Result<(), AhciError> {
    if regs.read_hba_reg(HBA_CAP2) & 1 == 0 {
        return Ok(());
    }
    regs.write_hba_reg(HBA_BOHC, regs.read_hba_reg(HBA_BOHC) | BOHC_OS_OWNED);
    if !regs.wait_while(
        || regs.read_hba_reg(HBA_BOHC) & BOHC_BIOS_OWNED != 0,
        BIOS_HANDOFF_TIMEOUT,
    ) {
        return Err(AhciError::BiosHandoffTimeout);
    }
    Ok(())
}

/// Reset the controller, enable AHCI mode and interrupts. Returns the
/// implemented-ports bitmap.
pub fn init_hba<T: RegisterAccess>(regs: &T) -> Result<u32, AhciError> {
    bios_handoff(regs)?;

    regs.write_hba_reg(HBA_GHC, regs.read_hba_reg(HBA_GHC) | GHC_AHCI_ENABLE);
    regs.write_hba_reg(HBA_GHC, regs.read_hba_reg(HBA_GHC) | GHC_HBA_RESET);
    if !regs.wait_while(
        || regs.read_hba_reg(HBA_GHC) & GHC_HBA_RESET != 0,
        HBA_RESET_TIMEOUT,
    ) {
        return Err(AhciError::HbaResetTimeout);
    }

    regs.write_hba_reg(HBA_GHC, regs.read_hba_reg(HBA_GHC) | GHC_AHCI_ENABLE);
    regs.write_hba_reg(HBA_GHC, regs.read_hba_reg(HBA_GHC) | GHC_INT_ENABLE);

    let version = regs.read_hba_reg(HBA_VS);
    let ports = regs.read_hba_reg(HBA_PI);
    log_info!(
        "AHCI",
        "hba version {:x}.{:02x}, ports implemented {:#010x}",
        version >> 16,
        version & 0xFFFF,
        ports
    );
    Ok(ports)
}

/// Stop the port command engine and wait for it to drain.
pub fn stop_port<T: RegisterAccess>(regs: &T, port: u32) -> Result<(), AhciError> {
    regs.write_port_reg(port, PORT_CMD, regs.read_port_reg(port, PORT_CMD) & !CMD_ST);
    if !regs.wait_while(
        || regs.read_port_reg(port, PORT_CMD) & CMD_CR != 0,
        PORT_STOP_TIMEOUT,
    ) {
        return Err(AhciError::PortStopTimeout);
    }

    regs.write_port_reg(port, PORT_CMD, regs.read_port_reg(port, PORT_CMD) & !CMD_FRE);
    if !regs.wait_while(
        || regs.read_port_reg(port, PORT_CMD) & CMD_FR != 0,
        PORT_STOP_TIMEOUT,
    ) {
        return Err(AhciError::PortStopTimeout);
    }
    Ok(())
}

/// COMRESET: request via SCTL.DET and wait for the bit to self-clear.
pub fn reset_port<T: RegisterAccess>(regs: &T, port: u32) -> Result<(), AhciError> {
    stop_port(regs, port)?;

    regs.write_port_reg(
        port,
        PORT_SCTL,
        regs.read_port_reg(port, PORT_SCTL) | SCTL_DET_COMRESET,
    );
    if !regs.wait_while(
        || regs.read_port_reg(port, PORT_SCTL) & SCTL_DET_COMRESET != 0,
        COMRESET_TIMEOUT,
    ) {
        return Err(AhciError::ComresetTimeout);
    }
    Ok(())
}

/// Start the command engine after the DMA bases are installed.
pub fn start_port<T: RegisterAccess>(regs: &T, port: u32) -> Result<(), AhciError> {
    regs.write_port_reg(port, PORT_CMD, regs.read_port_reg(port, PORT_CMD) | CMD_FRE);
    regs.write_port_reg(port, PORT_CMD, regs.read_port_reg(port, PORT_CMD) | CMD_ST);
    if !regs.wait_while(
        || regs.read_port_reg(port, PORT_CMD) & CMD_CR == 0,
        PORT_STOP_TIMEOUT,
    ) {
        return Err(AhciError::PortStartTimeout);
    }
    Ok(())
}

/// Probe one implemented port. Returns true when a SATA disk came up.
pub fn init_port(ctrl: &AhciController, port: u32) -> Result<bool, AhciError> {
    // DET=3: device present, PHY established.
    let ssts = ctrl.read_port_reg(port, PORT_SSTS);
    if ssts & 0xF != SSTS_DET_PRESENT {
        return Ok(false);
    }

    let signature = ctrl.read_port_reg(port, PORT_SIG);
    let device_type = match AhciDeviceType::from_signature(signature) {
        Some(device_type) => device_type,
        None => {
            log_debug!("AHCI", "port {}: unknown signature {:#010x}", port, signature);
            return Ok(false);
        }
    };
    log_info!("AHCI", "port {}: {} device", port, device_type.as_str());

    reset_port(ctrl, port)?;

    let dma = PortDma::new()?;
    ctrl.write_port_reg(port, PORT_CLB, (dma.command_list_phys() & 0xFFFF_FFFF) as u32);
    ctrl.write_port_reg(port, PORT_CLBU, (dma.command_list_phys() >> 32) as u32);
    ctrl.write_port_reg(port, PORT_FB, (dma.fis_receive_phys() & 0xFFFF_FFFF) as u32);
    ctrl.write_port_reg(port, PORT_FBU, (dma.fis_receive_phys() >> 32) as u32);

    ctrl.write_port_reg(port, PORT_SERR, 0xFFFF_FFFF);
    ctrl.write_port_reg(port, PORT_IS, 0xFFFF_FFFF);

    start_port(ctrl, port)?;
    ctrl.port_dma.lock().insert(port, dma);

    if device_type != AhciDeviceType::Sata {
        // ATAPI, bridges, and multipliers are detected but not driven.
        return Ok(false);
    }

    identify_device(ctrl, port, device_type)?;
    Ok(true)
}

/// IDENTIFY DEVICE: one 512-byte PRDT entry, command 0xEC on slot 0.
pub fn identify_device(
    ctrl: &AhciController,
    port: u32,
    device_type: AhciDeviceType,
) -> Result<(), AhciError> {
    let buffer = alloc_dma_coherent(512, DmaConstraints { alignment: 512, dma32_only: true })
        .map_err(|_| AhciError::DmaAllocationFailed)?;

    let guard = ctrl.command_lock.lock();
    commands::build_identify_command(ctrl, port, buffer.phys_addr.as_u64())?;
    io::issue_and_wait(ctrl, port, io::COMMAND_SLOT)?;
    drop(guard);

    // SAFETY: the device DMA-filled the 256-word identify payload.
    let words = unsafe { &*(buffer.virt_addr.as_ptr::<u16>() as *const [u16; 256]) };
    let info = IdentifyInfo::parse(words);
    free_dma_coherent(buffer);

    if info.sector_count == 0 {
        return Err(AhciError::ZeroSectorCapacity);
    }

    log_info!(
        "AHCI",
        "port {}: {} sectors, model '{}', lba48={}, ncq={}",
        port,
        info.sector_count,
        info.model,
        info.supports_48bit,
        info.supports_ncq
    );

    ctrl.ports.write().insert(
        port,
        AhciDevice {
            port,
            device_type,
            sector_count: info.sector_count,
            sector_size: SECTOR_SIZE,
            supports_48bit: info.supports_48bit,
            supports_ncq: info.supports_ncq,
            model: info.model,
            serial: info.serial,
            firmware: info.firmware,
        },
    );
    Ok(())
}
