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
//! Legacy 16-byte receive and transmit descriptors.

#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct RxDescriptor {
    pub buffer_addr: u64,
    pub length: u16,
    pub checksum: u16,
    pub status: u8,
    pub errors: u8,
    pub special: u16,
}

impl RxDescriptor {
    pub const STATUS_DD: u8 = 1 << 0;
    pub const STATUS_EOP: u8 = 1 << 1;

    #[inline]
    pub fn is_done(&self) -> bool {
        self.status & Self::STATUS_DD != 0
    }

    #[inline]
    pub fn is_end_of_packet(&self) -> bool {
        self.status & Self::STATUS_EOP != 0
    }

    #[inline]
    pub fn has_error(&self) -> bool {
        self.errors != 0
    }

    /// Hand the descriptor back to hardware.
    #[inline]
    pub fn rearm(&mut self) {
        self.status = 0;
        self.length = 0;
        self.errors = 0;
        self.checksum = 0;
        self.special = 0;
    }
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct TxDescriptor {
    pub buffer_addr: u64,
    pub length: u16,
    pub cso: u8,
    pub cmd: u8,
    pub status: u8,
    pub css: u8,
    pub special: u16,
}

impl TxDescriptor {
    pub const STATUS_DD: u8 = 1 << 0;

    #[inline]
    pub fn is_done(&self) -> bool {
        self.status & Self::STATUS_DD != 0
    }

    pub fn setup(&mut self, buffer_phys: u64, len: u16, cmd: u8) {
        self.buffer_addr = buffer_phys;
        self.length = len;
        self.cso = 0;
        self.cmd = cmd;
        self.status = 0;
        self.css = 0;
        self.special = 0;
    }

    /// Initial state: descriptor available to software.
    pub fn mark_available(&mut self) {
        self.length = 0;
        self.cmd = 0;
        self.status = Self::STATUS_DD;
        self.cso = 0;
        self.css = 0;
        self.special = 0;
    }
}

const _: () = {
    assert!(core::mem::size_of::<RxDescriptor>() == 16);
    assert!(core::mem::size_of::<TxDescriptor>() == 16);
};
