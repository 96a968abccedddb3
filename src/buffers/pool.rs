//! Process-local pool of fixed-size blocks carved from an arena partition

use std::{
    collections::{HashMap, VecDeque},
    ptr::NonNull,
    sync::{Arc, Mutex, PoisonError, RwLock},
};

use log::{debug, warn};

use crate::{
    addr::{ArenaView, BlockRef},
    channel::MessageChannel,
    error::{HugelinkError, Result},
    registry::PeerRegistry,
};

use super::{block::Block, config::BlockPoolConfig, stats::BlockPoolStats};

/// Start addresses of the blocks fitting in `partition`.
///
/// Pages and alignment are measured from `arena_base`, the origin block
/// references are relative to; the mapping itself may only be aligned to
/// the system page size.
fn carve(arena_base: usize, partition: &ArenaView, config: &BlockPoolConfig) -> Vec<usize> {
    let page_size = partition.page_size;
    let stride = config.stride();
    let limit = config.max_blocks.unwrap_or(usize::MAX);
    let align = |addr: usize| {
        arena_base + ((addr - arena_base + config.alignment - 1) & !(config.alignment - 1))
    };

    let mut blocks = Vec::new();
    let mut addr = align(partition.base);
    while blocks.len() < limit && addr + config.block_size <= partition.end() {
        let page_end = arena_base + ((addr - arena_base) / page_size + 1) * page_size;
        if addr + config.block_size > page_end {
            addr = page_end;
            continue;
        }
        blocks.push(addr);
        addr += stride;
    }
    blocks
}

#[derive(Debug)]
struct PoolState {
    available: VecDeque<usize>,
    in_use: Vec<bool>,
}

/// Allocator the master uses to obtain blocks it hands to the peer.
///
/// No block straddles a page boundary, so every block can be put as a
/// single message.
#[derive(Debug)]
pub struct LocalBlockPool {
    config: BlockPoolConfig,
    partition: ArenaView,
    blocks: Vec<(NonNull<u8>, BlockRef)>,
    index: HashMap<BlockRef, usize>,
    state: Mutex<PoolState>,
    stats: RwLock<BlockPoolStats>,
    /// Keeps the mapping alive while blocks point into it
    _registry: Arc<PeerRegistry>,
}

unsafe impl Send for LocalBlockPool {}
unsafe impl Sync for LocalBlockPool {}

impl LocalBlockPool {
    /// Carve the channel's own partition of the arena
    pub fn new(channel: &MessageChannel, config: BlockPoolConfig) -> Result<Self> {
        let partition = channel.registry().partition(channel.role())?;
        Self::with_partition(channel, partition, config)
    }

    /// Carve an explicit part of the arena
    pub fn with_partition(
        channel: &MessageChannel,
        partition: ArenaView,
        config: BlockPoolConfig,
    ) -> Result<Self> {
        config.validate(partition.page_size)?;
        let arena = channel.registry().arena();
        if partition.page_size != arena.page_size
            || !arena.contains(partition.base, partition.size)
        {
            return Err(HugelinkError::invalid_parameter(
                "partition",
                format!(
                    "{} bytes at {:#x} are not a part of the arena at {:#x}",
                    partition.size, partition.base, arena.base
                ),
            ));
        }

        let arena_base = arena.base;
        let mut blocks = Vec::new();
        for addr in carve(arena_base, &partition, &config) {
            let ptr = NonNull::new(addr as *mut u8)
                .ok_or_else(|| HugelinkError::translation(addr as u64))?;
            let reference = channel.to_physical(ptr.as_ptr())?;
            blocks.push((ptr, reference));
        }

        if blocks.is_empty() {
            return Err(HugelinkError::invalid_parameter(
                "partition",
                format!(
                    "{} bytes cannot hold a single {}-byte block",
                    partition.size, config.block_size
                ),
            ));
        }

        let index = blocks
            .iter()
            .enumerate()
            .map(|(i, (_, reference))| (*reference, i))
            .collect();
        let count = blocks.len();
        debug!(
            "carved {} blocks of {} bytes from {} bytes at {:#x}",
            count, config.block_size, partition.size, partition.base
        );

        Ok(Self {
            config,
            partition,
            blocks,
            index,
            state: Mutex::new(PoolState {
                available: (0..count).collect(),
                in_use: vec![false; count],
            }),
            stats: RwLock::new(BlockPoolStats {
                total_blocks: count,
                ..Default::default()
            }),
            _registry: Arc::clone(channel.registry()),
        })
    }

    /// Take a block from the pool
    pub fn alloc(&self) -> Result<Block> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(i) = state.available.pop_front() else {
            drop(state);
            self.stats
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .allocation_failures += 1;
            return Err(HugelinkError::exhausted("block pool"));
        };
        state.in_use[i] = true;
        drop(state);

        let mut stats = self.stats.write().unwrap_or_else(PoisonError::into_inner);
        stats.total_allocations += 1;
        stats.currently_in_use += 1;
        stats.peak_usage = stats.peak_usage.max(stats.currently_in_use);

        let (ptr, reference) = self.blocks[i];
        Ok(Block::new(ptr, reference, self.config.block_size))
    }

    /// Return a block
    pub fn free(&self, block: Block) -> Result<()> {
        self.free_ref(block.block_ref())
    }

    /// Return a block by reference, e.g. one the peer sent back in a message
    pub fn free_ref(&self, reference: BlockRef) -> Result<()> {
        let i = *self.index.get(&reference).ok_or_else(|| {
            HugelinkError::invalid_parameter(
                "block",
                format!("{} was not carved from this pool", reference),
            )
        })?;

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if !state.in_use[i] {
            warn!("block {} returned twice", reference);
            return Err(HugelinkError::validation(format!(
                "block {} is already free",
                reference
            )));
        }
        state.in_use[i] = false;
        state.available.push_back(i);
        drop(state);

        let mut stats = self.stats.write().unwrap_or_else(PoisonError::into_inner);
        stats.currently_in_use = stats.currently_in_use.saturating_sub(1);
        stats.total_releases += 1;
        Ok(())
    }

    /// Whether the reference names a block of this pool
    pub fn contains(&self, reference: BlockRef) -> bool {
        self.index.contains_key(&reference)
    }

    /// Get number of available blocks
    pub fn available(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .available
            .len()
    }

    /// Total number of blocks carved
    pub fn capacity(&self) -> usize {
        self.blocks.len()
    }

    pub fn block_size(&self) -> usize {
        self.config.block_size
    }

    pub fn partition(&self) -> &ArenaView {
        &self.partition
    }

    /// Get current statistics
    pub fn stats(&self) -> BlockPoolStats {
        self.stats
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::constants::DMA_ALIGNMENT;

    const PAGE: usize = 64 * 1024;
    // memfd and file mappings are only aligned to the system page
    const ARENA_BASE: usize = 0x7f00_0000_5000;

    fn unaligned_arena(pages: usize) -> ArenaView {
        ArenaView::new(ARENA_BASE, pages * PAGE, PAGE).unwrap()
    }

    #[test]
    fn test_carve_measures_pages_from_arena_base() {
        let arena = unaligned_arena(4);
        let config = BlockPoolConfig::new(3000);
        let blocks = carve(arena.base, &arena, &config);

        assert_eq!(blocks.len(), 4 * 21);
        for addr in &blocks {
            let offset = (addr - arena.base) % PAGE;
            assert!(offset + 3000 <= PAGE, "block at {:#x} crosses a page", addr);
            assert_eq!((addr - arena.base) % DMA_ALIGNMENT, 0);
        }
        assert_eq!(blocks[21], arena.base + PAGE);
    }

    #[test]
    fn test_carve_whole_page_blocks() {
        let arena = unaligned_arena(8);
        let upper = arena.slice(5 * PAGE, 3 * PAGE).unwrap();
        let blocks = carve(arena.base, &upper, &BlockPoolConfig::new(PAGE));
        assert_eq!(
            blocks,
            vec![
                arena.base + 5 * PAGE,
                arena.base + 6 * PAGE,
                arena.base + 7 * PAGE
            ]
        );
    }

    #[test]
    fn test_carve_respects_max_blocks() {
        let arena = unaligned_arena(2);
        let config = BlockPoolConfig::new(1024).with_max_blocks(5);
        assert_eq!(carve(arena.base, &arena, &config).len(), 5);
    }
}
