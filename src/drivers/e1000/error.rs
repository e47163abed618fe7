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
pub enum E1000Error {
    NoDeviceFound,
    Bar0NotConfigured,
    MmioMapFailed,
    ResetTimeout,
    DmaAllocationFailed,
    FrameTooLarge,
    RingFull,
}

impl E1000Error {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoDeviceFound => "No 8254x device found",
            Self::Bar0NotConfigured => "BAR0 not configured",
            Self::MmioMapFailed => "Failed to map device registers",
            Self::ResetTimeout => "Device reset did not clear",
            Self::DmaAllocationFailed => "Descriptor ring allocation failed",
            Self::FrameTooLarge => "Frame exceeds 1514 bytes",
            Self::RingFull => "Transmit ring slot still owned by hardware",
        }
    }
}

impl fmt::Display for E1000Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
