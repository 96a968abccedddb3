//! Process-independent block references

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{HugelinkError, Result};

/// Bit position of the arena id inside a reference
pub const ARENA_SHIFT: u32 = 48;

/// A 64-bit name for a byte inside the shared arena that means the same
/// thing in both processes.
///
/// References produced by the arena resolver pack `[arena_id:16][page:..][offset:page_shift]`;
/// references produced by the pagemap resolver are raw physical addresses.
/// Either way only the low `page_shift` bits vary within one page.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct BlockRef(u64);

/// Fields of an arena-resolver reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRefParts {
    pub arena_id: u16,
    pub page_index: u32,
    pub offset: u64,
}

impl BlockRef {
    /// Reserved "no block" value
    pub const NULL: BlockRef = BlockRef(0);

    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Pack an arena-resolver reference
    pub fn compose(arena_id: u16, page_index: u32, offset: u64, page_shift: u32) -> Result<Self> {
        if page_shift == 0 || page_shift >= ARENA_SHIFT {
            return Err(HugelinkError::invalid_parameter(
                "page_shift",
                format!("{} is outside 1..{}", page_shift, ARENA_SHIFT),
            ));
        }
        if offset >= 1u64 << page_shift {
            return Err(HugelinkError::invalid_parameter(
                "offset",
                format!("{:#x} does not fit in a {}-bit page offset", offset, page_shift),
            ));
        }
        if (page_index as u64) >= 1u64 << (ARENA_SHIFT - page_shift) {
            return Err(HugelinkError::invalid_parameter(
                "page_index",
                format!("{} does not fit beside a {}-bit offset", page_index, page_shift),
            ));
        }
        Ok(Self(
            ((arena_id as u64) << ARENA_SHIFT) | ((page_index as u64) << page_shift) | offset,
        ))
    }

    /// Unpack an arena-resolver reference
    pub fn decompose(self, page_shift: u32) -> BlockRefParts {
        let low = self.0 & ((1u64 << ARENA_SHIFT) - 1);
        BlockRefParts {
            arena_id: (self.0 >> ARENA_SHIFT) as u16,
            page_index: (low >> page_shift) as u32,
            offset: low & ((1u64 << page_shift) - 1),
        }
    }

    /// Reference to the start of the page holding this byte
    pub fn page_base(self, page_size: u64) -> BlockRef {
        Self(self.0 & !(page_size - 1))
    }

    /// Byte offset inside the page
    pub fn page_offset(self, page_size: u64) -> u64 {
        self.0 & (page_size - 1)
    }

    /// Reference `bytes` further into the same arena
    pub fn offset_by(self, bytes: u64) -> BlockRef {
        Self(self.0.wrapping_add(bytes))
    }

    /// Whether `[self, self + size)` stays inside one page
    pub fn within_one_page(self, size: u64, page_size: u64) -> bool {
        if size == 0 {
            return true;
        }
        let Some(last) = self.0.checked_add(size - 1) else {
            return false;
        };
        let mask = !(page_size - 1);
        (self.0 & mask) == (last & mask)
    }
}

impl fmt::Debug for BlockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockRef({:#018x})", self.0)
    }
}

impl fmt::Display for BlockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl From<BlockRef> for u64 {
    fn from(block: BlockRef) -> u64 {
        block.0
    }
}
