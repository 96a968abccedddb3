//! Per-context table translating between local addresses and block references

use std::ptr::{self, NonNull};

use log::{debug, error};

use crate::{
    error::{HugelinkError, Result},
    layout::constants::MAX_HUGE_PAGES,
};

use super::{arena::ArenaView, block_ref::BlockRef, resolver::IovaResolver};

/// One arena page as seen by this process and by the peer
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageMapping {
    pub virtual_base: u64,
    pub physical_base: u64,
}

/// Translation table built once at registration.
///
/// Entry `i` covers `[arena_base + i * page_size, arena_base + (i + 1) * page_size)`,
/// so translation is a shift and a lookup in both directions.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct BlockAddressTable {
    arena_base: u64,
    page_size: u64,
    page_shift: u32,
    page_count: u32,
    entries: [PageMapping; MAX_HUGE_PAGES],
}

impl Default for BlockAddressTable {
    fn default() -> Self {
        Self {
            arena_base: 0,
            page_size: 0,
            page_shift: 0,
            page_count: 0,
            entries: [PageMapping::default(); MAX_HUGE_PAGES],
        }
    }
}

/// Fault a page in and keep its contents
fn touch_page(addr: usize) {
    unsafe {
        let p = addr as *mut u8;
        let value = ptr::read_volatile(p);
        ptr::write_volatile(p, value);
    }
}

impl BlockAddressTable {
    /// Touch every page of `arena` and record its shared reference
    pub fn build(arena: &ArenaView, resolver: &dyn IovaResolver) -> Result<Self> {
        let page_count = arena.page_count();
        if page_count == 0 || page_count > MAX_HUGE_PAGES {
            return Err(HugelinkError::invalid_parameter(
                "arena",
                format!(
                    "arena spans {} pages of {} bytes, expected 1..={}",
                    page_count, arena.page_size, MAX_HUGE_PAGES
                ),
            ));
        }

        let mut table = Self {
            arena_base: arena.base as u64,
            page_size: arena.page_size as u64,
            page_shift: arena.page_shift(),
            page_count: page_count as u32,
            entries: [PageMapping::default(); MAX_HUGE_PAGES],
        };

        for (index, entry) in table.entries.iter_mut().take(page_count).enumerate() {
            let virtual_base = arena.base + index * arena.page_size;
            touch_page(virtual_base);
            let physical_base = resolver.resolve(index, virtual_base)?;
            // to_local finds entries by masking the low page bits off a reference
            if physical_base.raw() % arena.page_size as u64 != 0 {
                return Err(HugelinkError::platform(format!(
                    "{} resolver placed page {} at {}, which is not aligned to {} bytes \
                     (is the arena backed by huge pages?)",
                    resolver.name(),
                    index,
                    physical_base,
                    arena.page_size
                )));
            }
            *entry = PageMapping {
                virtual_base: virtual_base as u64,
                physical_base: physical_base.raw(),
            };
        }

        debug!(
            "{} resolver mapped {} pages starting at {:#x}",
            resolver.name(),
            page_count,
            arena.base
        );
        Ok(table)
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    pub fn page_count(&self) -> usize {
        self.page_count as usize
    }

    pub fn arena_base(&self) -> u64 {
        self.arena_base
    }

    pub fn entries(&self) -> &[PageMapping] {
        &self.entries[..self.page_count()]
    }

    pub fn is_empty(&self) -> bool {
        self.page_count == 0
    }

    /// Shared reference for a local address inside the arena
    pub fn to_physical(&self, local: usize) -> Result<BlockRef> {
        let local = local as u64;
        let rel = local.wrapping_sub(self.arena_base);
        if local < self.arena_base || self.page_size == 0 {
            error!("address {:#x} is below the arena at {:#x}", local, self.arena_base);
            return Err(HugelinkError::translation(local));
        }
        let index = (rel >> self.page_shift) as usize;
        match self.entries().get(index) {
            Some(entry) => Ok(BlockRef::from_raw(
                entry.physical_base + (rel & (self.page_size - 1)),
            )),
            None => {
                error!("address {:#x} is beyond the mapped arena", local);
                Err(HugelinkError::translation(local))
            }
        }
    }

    /// Local address for a shared reference
    pub fn to_local(&self, reference: BlockRef) -> Result<NonNull<u8>> {
        let raw = reference.raw();
        let offset = raw & self.page_size.wrapping_sub(1);
        let base = raw - offset;
        let entry = self
            .entries()
            .iter()
            .find(|entry| entry.physical_base == base)
            .ok_or_else(|| {
                error!("reference {} has no page in the table", reference);
                HugelinkError::translation(raw)
            })?;
        NonNull::new((entry.virtual_base + offset) as *mut u8)
            .ok_or_else(|| HugelinkError::translation(raw))
    }

    /// Whether `[local, local + len)` falls inside the mapped arena
    pub fn contains_local(&self, local: usize, len: usize) -> bool {
        let start = local as u64;
        let end = self.arena_base + self.page_count as u64 * self.page_size;
        start >= self.arena_base && start.saturating_add(len as u64) <= end
    }
}
