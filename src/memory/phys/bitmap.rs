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
//! Bit operations over a region's allocation bitmap. Bit set means the
//! page is allocated.

use super::constants::BITS_PER_BYTE;

#[inline]
pub fn bit_test(bits: &[u8], idx: usize) -> bool {
    bits[idx / BITS_PER_BYTE] & (1u8 << (idx & 7)) != 0
}

#[inline]
pub fn bit_set(bits: &mut [u8], idx: usize) {
    bits[idx / BITS_PER_BYTE] |= 1u8 << (idx & 7);
}

#[inline]
pub fn bit_clear(bits: &mut [u8], idx: usize) {
    bits[idx / BITS_PER_BYTE] &= !(1u8 << (idx & 7));
}

pub fn count_free_bits(bits: &[u8], total: usize) -> usize {
    (0..total).filter(|&i| !bit_test(bits, i)).count()
}

/// First run of `count` clear bits, scanning from bit 0. When `stride`
/// is greater than one, only start indices congruent to `phase` modulo
/// `stride` are considered (alignment-constrained allocation; the caller
/// folds the region base into `phase`).
pub fn find_contiguous_free(
    bits: &[u8],
    total: usize,
    count: usize,
    stride: usize,
    phase: usize,
) -> Option<usize> {
    if count == 0 || count > total {
        return None;
    }

    let mut start = 0;
    while start + count <= total {
        if stride > 1 && start % stride != phase {
            start += 1;
            continue;
        }
        match (start..start + count).find(|&i| bit_test(bits, i)) {
            None => return Some(start),
            // Resume past the allocated bit that broke the run.
            Some(blocked) => start = blocked + 1,
        }
    }

    None
}

pub fn set_bit_range(bits: &mut [u8], start: usize, count: usize) {
    for i in start..start + count {
        bit_set(bits, i);
    }
}

pub fn clear_bit_range(bits: &mut [u8], start: usize, count: usize) {
    for i in start..start + count {
        bit_clear(bits, i);
    }
}
