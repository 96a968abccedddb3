//! The window of the shared region that holds message blocks

use crate::error::{HugelinkError, Result};

/// Local view of the arena: where it is mapped in this process and how it
/// is paged. Both peers see the same size and page size, but usually a
/// different base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaView {
    pub base: usize,
    pub size: usize,
    pub page_size: usize,
}

impl ArenaView {
    pub fn new(base: usize, size: usize, page_size: usize) -> Result<Self> {
        if !page_size.is_power_of_two() {
            return Err(HugelinkError::invalid_parameter(
                "page_size",
                format!("{} is not a power of two", page_size),
            ));
        }
        if size == 0 || size % page_size != 0 {
            return Err(HugelinkError::invalid_parameter(
                "size",
                format!("arena size {} is not a non-zero multiple of {}", size, page_size),
            ));
        }
        Ok(Self {
            base,
            size,
            page_size,
        })
    }

    pub fn page_shift(&self) -> u32 {
        self.page_size.trailing_zeros()
    }

    pub fn page_count(&self) -> usize {
        self.size / self.page_size
    }

    pub fn end(&self) -> usize {
        self.base + self.size
    }

    /// Whether `[addr, addr + len)` lies inside the arena
    pub fn contains(&self, addr: usize, len: usize) -> bool {
        addr >= self.base && addr.saturating_add(len) <= self.end()
    }

    /// Sub-range of the arena at `offset` with `len` bytes
    pub fn slice(&self, offset: usize, len: usize) -> Result<ArenaView> {
        if offset % self.page_size != 0 || len % self.page_size != 0 {
            return Err(HugelinkError::invalid_parameter(
                "offset",
                "arena partitions must be page aligned",
            ));
        }
        if offset.saturating_add(len) > self.size {
            return Err(HugelinkError::invalid_parameter(
                "len",
                format!("{}+{} exceeds arena of {} bytes", offset, len, self.size),
            ));
        }
        Ok(ArenaView {
            base: self.base + offset,
            size: len,
            page_size: self.page_size,
        })
    }
}
