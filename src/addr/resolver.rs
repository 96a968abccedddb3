//! Strategies for naming arena pages in a process-independent way

use std::{
    fs::File,
    os::unix::fs::FileExt,
};

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::{HugelinkError, Result};

use super::block_ref::BlockRef;

/// Produces the shared reference of an arena page
pub trait IovaResolver: Send + Sync {
    /// Reference naming page `page_index`, mapped locally at `virtual_base`
    fn resolve(&self, page_index: usize, virtual_base: usize) -> Result<BlockRef>;

    /// Short name for logs
    fn name(&self) -> &'static str;
}

/// Which resolver a context builds its table with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ResolverKind {
    /// Deterministic `[arena_id][page][offset]` references
    #[default]
    Arena,
    /// Physical addresses read from `/proc/self/pagemap`
    Pagemap,
}

impl ResolverKind {
    pub fn name(&self) -> &'static str {
        match self {
            ResolverKind::Arena => "arena",
            ResolverKind::Pagemap => "pagemap",
        }
    }
}

/// References derived from the arena id and page index alone
#[derive(Debug, Clone, Copy)]
pub struct ArenaIovaResolver {
    arena_id: u16,
    page_shift: u32,
}

impl ArenaIovaResolver {
    pub fn new(arena_id: u16, page_shift: u32) -> Self {
        Self {
            arena_id,
            page_shift,
        }
    }
}

impl IovaResolver for ArenaIovaResolver {
    fn resolve(&self, page_index: usize, _virtual_base: usize) -> Result<BlockRef> {
        let index = u32::try_from(page_index).map_err(|_| {
            HugelinkError::invalid_parameter("page_index", format!("{} overflows u32", page_index))
        })?;
        let reference = BlockRef::compose(self.arena_id, index, 0, self.page_shift)?;
        if reference.is_null() {
            // page 0 of arena 0 would alias the null reference
            return Err(HugelinkError::invalid_parameter(
                "arena_id",
                "arena id 0 is reserved",
            ));
        }
        Ok(reference)
    }

    fn name(&self) -> &'static str {
        "arena"
    }
}

const PAGEMAP_PRESENT: u64 = 1 << 63;
const PAGEMAP_PFN_MASK: u64 = (1 << 55) - 1;

/// Physical addresses from `/proc/self/pagemap`.
///
/// Requires `CAP_SYS_ADMIN`; without it the kernel reports PFN 0 and
/// resolution fails.
#[derive(Debug)]
pub struct PagemapResolver {
    pagemap: File,
    os_page_size: usize,
}

impl PagemapResolver {
    pub fn open() -> Result<Self> {
        let pagemap = File::open("/proc/self/pagemap")
            .map_err(|e| HugelinkError::from_io(e, "Failed to open /proc/self/pagemap"))?;
        let os_page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if os_page_size <= 0 {
            return Err(HugelinkError::last_os_error("sysconf(_SC_PAGESIZE)"));
        }
        debug!("pagemap resolver ready, base page {} bytes", os_page_size);
        Ok(Self {
            pagemap,
            os_page_size: os_page_size as usize,
        })
    }

    /// Physical address backing `virtual_addr`
    pub fn physical_address(&self, virtual_addr: usize) -> Result<u64> {
        let index = (virtual_addr / self.os_page_size) as u64;
        let mut entry = [0u8; 8];
        self.pagemap
            .read_exact_at(&mut entry, index * 8)
            .map_err(|e| HugelinkError::from_io(e, "Failed to read pagemap entry"))?;
        let entry = u64::from_ne_bytes(entry);

        let pfn = entry & PAGEMAP_PFN_MASK;
        if entry & PAGEMAP_PRESENT == 0 || pfn == 0 {
            warn!(
                "pagemap has no frame for {:#x} (entry {:#x}); is CAP_SYS_ADMIN missing?",
                virtual_addr, entry
            );
            return Err(HugelinkError::platform(format!(
                "page at {:#x} is not present or its frame number is hidden",
                virtual_addr
            )));
        }
        Ok(pfn * self.os_page_size as u64 + (virtual_addr % self.os_page_size) as u64)
    }
}

impl IovaResolver for PagemapResolver {
    fn resolve(&self, _page_index: usize, virtual_base: usize) -> Result<BlockRef> {
        self.physical_address(virtual_base).map(BlockRef::from_raw)
    }

    fn name(&self) -> &'static str {
        "pagemap"
    }
}
