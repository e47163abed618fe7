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

use super::constants::*;
use super::descriptors::{RxDescriptor, TxDescriptor};
use super::device::build_frame;

#[test]
fn test_register_offsets_match_spec() {
    assert_eq!(reg::CTRL, 0x0000);
    assert_eq!(reg::STATUS, 0x0008);
    assert_eq!(reg::EECD, 0x0010);
    assert_eq!(reg::ICR, 0x00C0);
    assert_eq!(reg::IMS, 0x00D0);
    assert_eq!(reg::RCTL, 0x0100);
    assert_eq!(reg::TCTL, 0x0400);
    assert_eq!(reg::RDBAL, 0x2800);
    assert_eq!(reg::RDBAH, 0x2804);
    assert_eq!(reg::RDLEN, 0x2808);
    assert_eq!(reg::RDH, 0x2810);
    assert_eq!(reg::RDT, 0x2818);
    assert_eq!(reg::TDBAL, 0x3800);
    assert_eq!(reg::TDT, 0x3818);
    assert_eq!(reg::RAL0, 0x5400);
    assert_eq!(reg::RAH0, 0x5404);
    assert_eq!(reg::GPRC, 0x4040);
    assert_eq!(reg::GORCL, 0x4048);
    assert_eq!(reg::RXERRC, 0x4050);
    assert_eq!(reg::GPTC, 0x4080);
    assert_eq!(reg::GOTCL, 0x4088);
    assert_eq!(reg::TXERRC, 0x4090);
}

#[test]
fn test_descriptor_sizes() {
    assert_eq!(core::mem::size_of::<RxDescriptor>(), DESC_SIZE);
    assert_eq!(core::mem::size_of::<TxDescriptor>(), DESC_SIZE);
}

#[test]
fn test_rx_descriptor_lifecycle() {
    let mut desc = RxDescriptor::default();
    assert!(!desc.is_done());

    desc.status = RxDescriptor::STATUS_DD | RxDescriptor::STATUS_EOP;
    desc.length = 64;
    assert!(desc.is_done());
    assert!(desc.is_end_of_packet());
    assert!(!desc.has_error());

    desc.rearm();
    assert!(!desc.is_done());
    assert_eq!(desc.length, 0);
}

#[test]
fn test_tx_descriptor_lifecycle() {
    let mut desc = TxDescriptor::default();
    desc.mark_available();
    assert!(desc.is_done());

    desc.setup(0x1000, 60, tx_cmd::EOP | tx_cmd::IFCS | tx_cmd::RS | tx_cmd::RPS);
    assert!(!desc.is_done());
    assert_eq!(desc.buffer_addr, 0x1000);
    assert_eq!(desc.length, 60);
    assert_eq!(desc.cmd, 0x1B);
}

#[test]
fn test_build_frame_layout() {
    let mut buf = [0u8; BUFFER_SIZE];
    let dest = [0xFF; 6];
    let src = [0x52, 0x54, 0x00, 0x12, 0x34, 0x56];

    let len = build_frame(&mut buf, dest, src, 0x0800, b"payload");
    assert_eq!(len, ETHERNET_HEADER_LEN + 7);
    assert_eq!(&buf[0..6], &dest);
    assert_eq!(&buf[6..12], &src);
    // Ethertype in network byte order.
    assert_eq!(&buf[12..14], &[0x08, 0x00]);
    assert_eq!(&buf[14..21], b"payload");
}

#[test]
fn test_frame_size_limits() {
    assert_eq!(MAX_FRAME_SIZE, 1514);
    assert_eq!(MAX_MTU, 1500);
    assert_eq!(ETHERNET_HEADER_LEN + MAX_MTU, MAX_FRAME_SIZE);
    assert_eq!(BUFFER_SIZE, 2048);
    assert!(MAX_FRAME_SIZE <= BUFFER_SIZE);
}

#[test]
fn test_ring_geometry() {
    assert_eq!(RX_DESC_COUNT, 256);
    assert_eq!(TX_DESC_COUNT, 256);
    // RDLEN/TDLEN must be 128-byte multiples.
    assert_eq!((RX_DESC_COUNT * DESC_SIZE) % 128, 0);
    assert_eq!((TX_DESC_COUNT * DESC_SIZE) % 128, 0);
}

#[test]
fn test_known_device_ids() {
    assert!(E1000_DEVICE_IDS.contains(&0x100E)); // qemu default
    assert!(E1000_DEVICE_IDS.contains(&0x10D3)); // 82574L
    assert_eq!(INTEL_VENDOR_ID, 0x8086);
}
