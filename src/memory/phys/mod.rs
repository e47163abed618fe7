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
//! Physical memory manager: per-region page bitmaps over the loader's
//! memory map.

pub mod bitmap;
pub mod constants;
pub mod error;
pub mod manager;
pub mod types;


pub use error::{PmmError, PmmResult};
pub use manager::{
    allocate_aligned, allocate_page, allocate_pages, dump_statistics, free_page, free_pages,
    init_from_map, is_page_allocated, is_page_free, page_to_phys, phys_to_page, statistics,
    PhysManager,
};
pub use types::{PmmStats, Region};
