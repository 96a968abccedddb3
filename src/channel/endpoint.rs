//! One peer's handle on a linked pair of contexts
//!
//! A put stages the message in the caller's own put queue. `Standalone` and
//! `Last` messages then drain the whole staged batch into the peer's get
//! queue in order and post the peer's wait channel once. If the peer's queue
//! fills mid-drain, whatever was not moved stays staged for the next flush.

use std::{
    ptr::NonNull,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    thread,
    time::{Duration, Instant},
};

use log::{debug, error, trace, warn};
use nix::{
    errno::Errno,
    sys::signal::kill,
    unistd::Pid,
};

use crate::{
    addr::{BlockAddressTable, BlockRef},
    buffers::Block,
    error::{HugelinkError, Result},
    layout::{MessageSlot, PeerContext, PeerRole, PeerState},
    registry::PeerRegistry,
    sync::WakeKind,
};

use super::{
    config::ChannelConfig,
    message::{GroupRole, Message, MsgFlags},
    stats::{ChannelStats, ChannelStatsSnapshot},
};

fn acquire(lock: &Mutex<()>) -> MutexGuard<'_, ()> {
    lock.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Signal 0 probes for existence; EPERM still means the process exists
fn process_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    match kill(Pid::from_raw(pid as i32), None) {
        Ok(()) | Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Handle returned by [`PeerRegistry::register`]
#[derive(Debug)]
pub struct MessageChannel {
    registry: Arc<PeerRegistry>,
    slot: usize,
    config: ChannelConfig,
    put_lock: Mutex<()>,
    get_lock: Mutex<()>,
    pub(crate) enqueue_lock: Mutex<()>,
    pub(crate) dequeue_lock: Mutex<()>,
    closed: AtomicBool,
    pub(crate) stats: ChannelStats,
}

impl MessageChannel {
    pub(crate) fn new(registry: Arc<PeerRegistry>, slot: usize, config: ChannelConfig) -> Self {
        Self {
            registry,
            slot,
            config,
            put_lock: Mutex::new(()),
            get_lock: Mutex::new(()),
            enqueue_lock: Mutex::new(()),
            dequeue_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
            stats: ChannelStats::default(),
        }
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn role(&self) -> PeerRole {
        self.config.role
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<PeerRegistry> {
        &self.registry
    }

    pub fn stats(&self) -> ChannelStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(HugelinkError::protocol("channel is closed"))
        } else {
            Ok(())
        }
    }

    pub(crate) fn context(&self) -> Result<&PeerContext> {
        self.registry.context(self.slot)
    }

    /// The partner's context, if this one is linked
    pub(crate) fn linked_peer(&self) -> Result<&PeerContext> {
        let ctx = self.context()?;
        match (ctx.state(), ctx.peer_slot()) {
            (Some(PeerState::Linked), Some(peer)) => self.registry.context(peer),
            _ => Err(HugelinkError::protocol(format!(
                "slot {} is not linked to a peer",
                self.slot
            ))),
        }
    }

    pub fn is_linked(&self) -> bool {
        self.linked_peer().is_ok()
    }

    /// Linked and the partner has a live owner
    pub fn ready(&self) -> bool {
        !self.is_closed()
            && self
                .linked_peer()
                .map(|peer| process_alive(peer.pid()))
                .unwrap_or(false)
    }

    /// Poll until the partner registers or `timeout` passes
    pub fn wait_for_peer(&self, timeout: Duration) -> Result<()> {
        self.ensure_open()?;
        let deadline = Instant::now() + timeout;
        while !self.ready() {
            if Instant::now() >= deadline {
                return Err(HugelinkError::protocol(format!(
                    "no peer linked to slot {} within {:?}",
                    self.slot, timeout
                )));
            }
            thread::sleep(Duration::from_millis(1));
        }
        debug!("slot {} is linked", self.slot);
        Ok(())
    }

    pub(crate) fn table(&self) -> Result<&BlockAddressTable> {
        Ok(self.context()?.table())
    }

    /// Arena page size
    pub fn page_size(&self) -> usize {
        self.registry.arena().page_size
    }

    /// Shared reference for a local pointer into the arena
    pub fn to_physical(&self, local: *const u8) -> Result<BlockRef> {
        self.table()?.to_physical(local as usize)
    }

    /// Local pointer for a shared reference
    pub fn to_local(&self, reference: BlockRef) -> Result<NonNull<u8>> {
        self.table()?.to_local(reference)
    }

    /// Local view of a received message's payload
    pub fn block_for(&self, message: &Message) -> Result<Block> {
        let ptr = self.to_local(message.block)?;
        Ok(Block::new(ptr, message.block, message.size as usize))
    }

    fn validate_put(&self, block: BlockRef, size: u32, flags: MsgFlags) -> Result<GroupRole> {
        let page_size = self.page_size() as u64;
        if size == 0 {
            return Err(HugelinkError::validation("message size must be non-zero"));
        }
        if size as u64 > page_size {
            return Err(HugelinkError::validation(format!(
                "message of {} bytes exceeds the {}-byte page",
                size, page_size
            )));
        }
        if block.is_null() {
            return Err(HugelinkError::validation("null block reference"));
        }
        if !block.within_one_page(size as u64, page_size) {
            return Err(HugelinkError::validation(format!(
                "block {} of {} bytes crosses a page boundary",
                block, size
            )));
        }
        flags.group_role()
    }

    /// Send a block to the peer.
    ///
    /// `First` and `Middle` messages are only staged. `Standalone` and `Last`
    /// messages flush the staged batch to the peer and wake it.
    pub fn put(&self, block: BlockRef, size: u32, type_tag: u16, flags: MsgFlags) -> Result<()> {
        self.ensure_open()?;
        let role = self.validate_put(block, size, flags)?;
        let peer = self.linked_peer()?;
        let ctx = self.context()?;

        let _guard = acquire(&self.put_lock);
        let slot = MessageSlot {
            physical_ref: block.raw(),
            size,
            type_tag,
            flags: flags.bits(),
        };
        if !ctx.put_queue.try_enqueue(slot) {
            self.stats.record_capacity_failure();
            warn!("staging queue of slot {} is full", self.slot);
            return Err(HugelinkError::capacity("put staging queue"));
        }
        self.stats.record_staged();

        if !role.flushes() {
            trace!("staged {:?} message {} ({} bytes)", role, block, size);
            return Ok(());
        }
        self.drain(ctx, peer)
    }

    /// Convenience wrapper putting a whole block
    pub fn put_block(&self, block: &Block, size: u32, type_tag: u16, flags: MsgFlags) -> Result<()> {
        self.put(block.block_ref(), size, type_tag, flags)
    }

    /// Move staged messages to the peer in order; caller holds the put lock
    fn drain(&self, ctx: &PeerContext, peer: &PeerContext) -> Result<()> {
        let mut moved = 0u64;
        while let Some(item) = ctx.put_queue.peek() {
            if !peer.get_queue.try_enqueue(item) {
                self.stats.record_delivered(moved);
                self.stats.record_capacity_failure();
                warn!(
                    "peer receive queue full after {} messages; {} remain staged",
                    moved,
                    ctx.put_queue.count()
                );
                return Err(HugelinkError::capacity("peer get queue"));
            }
            ctx.put_queue.advance();
            moved += 1;
        }
        self.stats.record_delivered(moved);

        if !peer.wait.post(WakeKind::Data)? {
            debug!("peer wake FIFO saturated; delivered {} without a new post", moved);
        }
        trace!("delivered {} messages from slot {}", moved, self.slot);
        Ok(())
    }

    /// Retry delivery of messages left staged by an earlier capacity error
    pub fn flush(&self) -> Result<()> {
        self.ensure_open()?;
        let peer = self.linked_peer()?;
        let ctx = self.context()?;
        let _guard = acquire(&self.put_lock);
        if ctx.put_queue.is_empty() {
            return Ok(());
        }
        self.drain(ctx, peer)
    }

    /// Messages staged but not yet delivered
    pub fn staged(&self) -> usize {
        self.context().map(|ctx| ctx.put_queue.count()).unwrap_or(0)
    }

    /// Drop staged messages, e.g. to abandon a partially built group
    pub fn discard_staged(&self) -> Result<usize> {
        self.ensure_open()?;
        let ctx = self.context()?;
        let _guard = acquire(&self.put_lock);
        let mut discarded = 0;
        while ctx.put_queue.try_dequeue().is_some() {
            discarded += 1;
        }
        if discarded > 0 {
            warn!("discarded {} staged messages on slot {}", discarded, self.slot);
        }
        Ok(discarded)
    }

    /// Take the next received message without blocking
    pub fn get(&self) -> Result<Option<Message>> {
        self.ensure_open()?;
        let ctx = self.context()?;
        let _guard = acquire(&self.get_lock);
        let message = ctx.get_queue.try_dequeue().map(Message::from);
        if message.is_some() {
            self.stats.record_received();
        }
        Ok(message)
    }

    /// Number of received messages waiting
    pub fn check(&self) -> usize {
        self.context().map(|ctx| ctx.get_queue.count()).unwrap_or(0)
    }

    /// Block until the peer delivers or [`wake_up`](Self::wake_up) is called.
    ///
    /// Returns the number of queued messages, which may be 0 after a wake-up
    /// or a spurious wake.
    pub fn wait(&self) -> Result<usize> {
        self.ensure_open()?;
        let ctx = self.context()?;

        let queued = ctx.get_queue.count();
        if queued > 0 {
            return Ok(queued);
        }

        ctx.is_waiting.store(1, Ordering::SeqCst);
        if self.is_closed() {
            ctx.is_waiting.store(0, Ordering::SeqCst);
            return Err(HugelinkError::protocol("channel is closed"));
        }
        let result = ctx.wait.wait();
        ctx.is_waiting.store(0, Ordering::SeqCst);

        let record = result?;
        self.stats.record_wait(record.is_none());
        let queued = ctx.get_queue.count();
        match record {
            Some(record) => trace!(
                "slot {} woke by {:?} after {:?} with {} queued",
                self.slot,
                record.kind(),
                record.latency(),
                queued
            ),
            None => debug!("slot {} woke without a wake record", self.slot),
        }
        Ok(queued)
    }

    /// Wait, then take one message
    pub fn wget(&self) -> Result<Option<Message>> {
        loop {
            if let Some(message) = self.get()? {
                return Ok(Some(message));
            }
            if self.wait()? == 0 {
                return self.get();
            }
        }
    }

    /// Release this channel's own blocked `wait`
    pub fn wake_up(&self) -> Result<()> {
        self.ensure_open()?;
        self.context()?.wait.post(WakeKind::WakeUp)?;
        Ok(())
    }

    /// Post the partner's wait channel without delivering data
    pub fn wake_peer(&self) -> Result<()> {
        self.ensure_open()?;
        self.linked_peer()?.wait.post(WakeKind::Probe)?;
        Ok(())
    }

    /// Unlink from the partner and free the slot.
    ///
    /// Refused while a `wait` on this channel is blocked; wake it first.
    /// Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        let _put = acquire(&self.put_lock);
        let _get = acquire(&self.get_lock);

        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let ctx = self.context()?;
        if ctx.is_waiting() {
            self.closed.store(false, Ordering::SeqCst);
            return Err(HugelinkError::protocol(
                "cannot close while a wait is in progress",
            ));
        }

        let staged = ctx.put_queue.count();
        if staged > 0 {
            warn!("closing slot {} with {} undelivered messages", self.slot, staged);
        }
        if let Err(err) = self.registry.release(self.slot) {
            self.closed.store(false, Ordering::SeqCst);
            error!("failed to release slot {}: {}", self.slot, err);
            return Err(err);
        }
        debug!("closed slot {}", self.slot);
        Ok(())
    }
}

impl Drop for MessageChannel {
    fn drop(&mut self) {
        if !self.is_closed() {
            if let Err(err) = self.close() {
                warn!("slot {} was not released on drop: {}", self.slot, err);
            }
        }
    }
}
