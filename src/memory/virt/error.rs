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
pub enum VmmError {
    NotInitialized,
    OutOfMemory,
    Misaligned,
    AlreadyMapped,
    NotMapped,
    HugeParent,
    HeapExhausted,
    UnknownPointer,
}

impl VmmError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotInitialized => "Virtual memory manager not initialized",
            Self::OutOfMemory => "No physical frame for page table",
            Self::Misaligned => "Address not page-aligned",
            Self::AlreadyMapped => "Page already mapped",
            Self::NotMapped => "Page not mapped",
            Self::HugeParent => "Walk hit a huge-page entry",
            Self::HeapExhausted => "Kernel heap arena exhausted",
            Self::UnknownPointer => "Pointer does not belong to the kernel heap",
        }
    }
}

impl fmt::Display for VmmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

pub type VmmResult<T> = Result<T, VmmError>;
