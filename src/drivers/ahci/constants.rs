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

// HBA global registers.
pub const HBA_CAP: u32 = 0x00;
pub const HBA_GHC: u32 = 0x04;
pub const HBA_IS: u32 = 0x08;
pub const HBA_PI: u32 = 0x0C;
pub const HBA_VS: u32 = 0x10;
pub const HBA_CAP2: u32 = 0x24;
pub const HBA_BOHC: u32 = 0x28;

// GHC bits.
pub const GHC_HBA_RESET: u32 = 1 << 0;
pub const GHC_INT_ENABLE: u32 = 1 << 1;
pub const GHC_AHCI_ENABLE: u32 = 1 << 31;

// BOHC bits.
pub const BOHC_BIOS_OWNED: u32 = 1 << 0;
pub const BOHC_OS_OWNED: u32 = 1 << 1;

// Per-port registers, relative to 0x100 + port * 0x80.
pub const PORT_CLB: u32 = 0x00;
pub const PORT_CLBU: u32 = 0x04;
pub const PORT_FB: u32 = 0x08;
pub const PORT_FBU: u32 = 0x0C;
pub const PORT_IS: u32 = 0x10;
pub const PORT_IE: u32 = 0x14;
pub const PORT_CMD: u32 = 0x18;
pub const PORT_TFD: u32 = 0x20;
pub const PORT_SIG: u32 = 0x24;
pub const PORT_SSTS: u32 = 0x28;
pub const PORT_SCTL: u32 = 0x2C;
pub const PORT_SERR: u32 = 0x30;
pub const PORT_SACT: u32 = 0x34;
pub const PORT_CI: u32 = 0x38;

// PORT_CMD bits.
pub const CMD_ST: u32 = 1 << 0;
pub const CMD_FRE: u32 = 1 << 4;
pub const CMD_FR: u32 = 1 << 14;
pub const CMD_CR: u32 = 1 << 15;

// PORT_IS task-file error summary.
pub const IS_TFES: u32 = 1 << 30;

// SSTS.DET value for an established PHY link.
pub const SSTS_DET_PRESENT: u32 = 3;

// SCTL.DET COMRESET request.
pub const SCTL_DET_COMRESET: u32 = 1;

pub const FIS_TYPE_REG_H2D: u8 = 0x27;

pub const ATA_CMD_READ_DMA: u8 = 0x20;
pub const ATA_CMD_READ_DMA_EXT: u8 = 0x25;
pub const ATA_CMD_WRITE_DMA: u8 = 0x30;
pub const ATA_CMD_WRITE_DMA_EXT: u8 = 0x35;
pub const ATA_CMD_IDENTIFY: u8 = 0xEC;

pub const SECTOR_SIZE: u32 = 512;
pub const COMMAND_SLOTS_PER_PORT: usize = 32;
/// One 4 KiB table per slot.
pub const COMMAND_TABLE_SLOT_SIZE: usize = 4096;
pub const COMMAND_LIST_SIZE: usize = 1024;
pub const FIS_RECEIVE_SIZE: usize = 256;

pub const PRDT_MAX_ENTRIES: usize = 8;
pub const PRDT_MAX_BYTES: usize = 256 * 1024;

// Bounded-poll iteration counts.
pub const BIOS_HANDOFF_TIMEOUT: u32 = 25_000;
pub const HBA_RESET_TIMEOUT: u32 = 1_000_000;
pub const PORT_STOP_TIMEOUT: u32 = 1_000_000;
pub const COMRESET_TIMEOUT: u32 = 1_000_000;
pub const COMMAND_TIMEOUT: u32 = 1_000_000;
