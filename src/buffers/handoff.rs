//! Block hand-off from the master to its partner's free-block queue

use std::{
    ptr,
    sync::{Mutex, PoisonError},
};

use log::{trace, warn};

use crate::{
    addr::BlockRef,
    channel::MessageChannel,
    error::{HugelinkError, Result},
    layout::{PeerRole, BLOCK_SENTINEL},
};

use super::block::Block;

fn acquire(lock: &Mutex<()>) -> std::sync::MutexGuard<'_, ()> {
    lock.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MessageChannel {
    /// Give an empty block to the partner.
    ///
    /// Only the master may hand out blocks. With sentinel checking enabled
    /// the first 8 bytes are stamped before the reference is published.
    pub fn enqueue_block(&self, block: BlockRef) -> Result<()> {
        self.ensure_open()?;
        if block.is_null() {
            return Err(HugelinkError::validation("null block reference"));
        }
        if self.role() != PeerRole::Master {
            return Err(HugelinkError::protocol(
                "only the master may hand blocks to its peer",
            ));
        }
        let peer = self.linked_peer()?;

        if self.config().sentinel_check {
            let local = self.to_local(block)?;
            unsafe { ptr::write_unaligned(local.as_ptr() as *mut u64, BLOCK_SENTINEL) };
        }

        let _guard = acquire(&self.enqueue_lock);
        if !peer.free_blocks.try_enqueue(block.raw()) {
            self.stats.record_capacity_failure();
            return Err(HugelinkError::capacity("peer free-block queue"));
        }
        self.stats.record_block_enqueued();
        trace!("handed block {} to the peer of slot {}", block, self.slot());
        Ok(())
    }

    /// Take the oldest block the master handed to this channel
    pub fn dequeue_block(&self) -> Result<Block> {
        self.ensure_open()?;
        let ctx = self.context()?;

        let raw = {
            let _guard = acquire(&self.dequeue_lock);
            ctx.free_blocks
                .try_dequeue()
                .ok_or_else(|| HugelinkError::exhausted("free-block queue"))?
        };
        let reference = BlockRef::from_raw(raw);
        let local = self.to_local(reference)?;

        if self.config().sentinel_check {
            let stamp = unsafe { ptr::read_unaligned(local.as_ptr() as *const u64) };
            if stamp != BLOCK_SENTINEL {
                self.stats.record_sentinel_violation();
                warn!(
                    "block {} arrived without its sentinel (found {:#018x})",
                    reference, stamp
                );
            }
        }
        self.stats.record_block_dequeued();

        let page_size = self.page_size() as u64;
        let capacity = (page_size - reference.page_offset(page_size)) as usize;
        Ok(Block::new(local, reference, capacity))
    }

    /// Blocks waiting in this channel's free-block queue
    pub fn free_blocks(&self) -> usize {
        self.context().map(|ctx| ctx.free_blocks.count()).unwrap_or(0)
    }

    /// Blocks waiting in the partner's free-block queue
    pub fn peer_free_blocks(&self) -> usize {
        self.linked_peer()
            .map(|peer| peer.free_blocks.count())
            .unwrap_or(0)
    }
}
