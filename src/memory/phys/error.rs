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
pub enum PmmError {
    OutOfMemory,
    ZeroPageCount,
    RegionLimitExceeded,
    UnalignedAddress,
    UnknownFrame,
    DoubleFree,
    RangeBeyondRegion,
}

impl PmmError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OutOfMemory => "Out of physical memory",
            Self::ZeroPageCount => "Zero page count requested",
            Self::RegionLimitExceeded => "Maximum memory regions exceeded",
            Self::UnalignedAddress => "Frame address not page-aligned",
            Self::UnknownFrame => "Frame address outside every managed region",
            Self::DoubleFree => "Double free detected",
            Self::RangeBeyondRegion => "Page range extends beyond its region",
        }
    }
}

impl fmt::Display for PmmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

pub type PmmResult<T> = Result<T, PmmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            alloc::format!("{}", PmmError::OutOfMemory),
            "Out of physical memory"
        );
        assert_eq!(PmmError::DoubleFree.as_str(), "Double free detected");
    }
}
