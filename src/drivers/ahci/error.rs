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

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AhciError {
    NoControllerFound,
    Bar5NotConfigured,
    MmioMapFailed,
    HbaResetTimeout,
    BiosHandoffTimeout,
    PortStopTimeout,
    ComresetTimeout,
    PortStartTimeout,
    PortNotInitialized,
    LbaRangeExceeded,
    TransferTooLarge,
    BufferTooSmall,
    DmaAllocationFailed,
    CommandFailed,
    CommandTimeout,
    ZeroSectorCapacity,
}

impl AhciError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoControllerFound => "No AHCI controller found",
            Self::Bar5NotConfigured => "AHCI BAR5 not configured",
            Self::MmioMapFailed => "Failed to map HBA registers",
            Self::HbaResetTimeout => "HBA reset did not clear",
            Self::BiosHandoffTimeout => "BIOS/OS handoff timed out",
            Self::PortStopTimeout => "Port command engine did not stop",
            Self::ComresetTimeout => "COMRESET did not self-clear",
            Self::PortStartTimeout => "Port command engine did not start",
            Self::PortNotInitialized => "Port not initialized",
            Self::LbaRangeExceeded => "LBA range exceeds device capacity",
            Self::TransferTooLarge => "Transfer exceeds PRDT capacity",
            Self::BufferTooSmall => "Buffer smaller than the transfer",
            Self::DmaAllocationFailed => "DMA allocation failed",
            Self::CommandFailed => "Device reported task-file error",
            Self::CommandTimeout => "AHCI command timeout",
            Self::ZeroSectorCapacity => "Device reports zero sectors",
        }
    }
}

impl fmt::Display for AhciError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
