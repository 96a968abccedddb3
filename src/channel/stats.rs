//! Per-channel counters kept in process-local memory

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Channel statistics
#[derive(Debug, Default)]
pub struct ChannelStats {
    /// Messages accepted by `put`
    pub messages_staged: AtomicU64,
    /// Messages moved to the peer's receive queue
    pub messages_delivered: AtomicU64,
    /// Messages taken from this channel's receive queue
    pub messages_received: AtomicU64,
    /// `put` calls rejected for lack of queue space
    pub capacity_failures: AtomicU64,
    /// Waits that returned
    pub waits: AtomicU64,
    /// Waits that returned without a wake record
    pub spurious_wakes: AtomicU64,
    /// Blocks pushed to the peer's free-block queue
    pub blocks_enqueued: AtomicU64,
    /// Blocks taken from this channel's free-block queue
    pub blocks_dequeued: AtomicU64,
    /// Dequeued blocks whose sentinel stamp was missing
    pub sentinel_violations: AtomicU64,
}

impl ChannelStats {
    pub fn record_staged(&self) {
        self.messages_staged.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivered(&self, count: u64) {
        self.messages_delivered.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_capacity_failure(&self) {
        self.capacity_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_wait(&self, spurious: bool) {
        self.waits.fetch_add(1, Ordering::Relaxed);
        if spurious {
            self.spurious_wakes.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_block_enqueued(&self) {
        self.blocks_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_block_dequeued(&self) {
        self.blocks_dequeued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sentinel_violation(&self) {
        self.sentinel_violations.fetch_add(1, Ordering::Relaxed);
    }

    /// Plain copy of the counters
    pub fn snapshot(&self) -> ChannelStatsSnapshot {
        ChannelStatsSnapshot {
            messages_staged: self.messages_staged.load(Ordering::Relaxed),
            messages_delivered: self.messages_delivered.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            capacity_failures: self.capacity_failures.load(Ordering::Relaxed),
            waits: self.waits.load(Ordering::Relaxed),
            spurious_wakes: self.spurious_wakes.load(Ordering::Relaxed),
            blocks_enqueued: self.blocks_enqueued.load(Ordering::Relaxed),
            blocks_dequeued: self.blocks_dequeued.load(Ordering::Relaxed),
            sentinel_violations: self.sentinel_violations.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`ChannelStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChannelStatsSnapshot {
    pub messages_staged: u64,
    pub messages_delivered: u64,
    pub messages_received: u64,
    pub capacity_failures: u64,
    pub waits: u64,
    pub spurious_wakes: u64,
    pub blocks_enqueued: u64,
    pub blocks_dequeued: u64,
    pub sentinel_violations: u64,
}
