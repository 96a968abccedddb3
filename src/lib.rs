//! # hugelink - zero-copy message transport over a shared huge-page arena
//!
//! Two cooperating processes map the same region. Messages never copy their
//! payload: a message is a [`BlockRef`] naming a block inside the shared
//! arena plus its size, a type tag and flags. Each process translates
//! references to its own addresses through a per-process block address
//! table, so the arena may be mapped at different virtual addresses.
//!
//! ## Features
//!
//! - **Peer registry**: slots `2k`/`2k+1` link automatically when both register
//! - **Scatter/gather**: `First`/`Middle` messages stage, `Last` flushes the batch in order
//! - **Blocking receive**: process-shared semaphore with timestamped wake records
//! - **Block hand-off**: the master feeds empty blocks into its partner's free-block queue
//! - **Two resolvers**: deterministic arena references or `/proc/self/pagemap` physical addresses
//!
//! ## Architecture
//!
//! ```text
//! process A (master)                          process B (slave)
//! ┌──────────────────────┐                    ┌──────────────────────┐
//! │ MessageChannel       │                    │ MessageChannel       │
//! │  put ──► put queue ──┼──── drain ───────► │ get queue ──► get    │
//! │  get ◄── get queue ◄─┼──── drain ──────── │ put queue ◄── put    │
//! │  enqueue_block ──────┼──── free blocks ─► │ dequeue_block        │
//! │  wait (semaphore) ◄──┼──── post ───────── │                      │
//! └──────────────────────┘                    └──────────────────────┘
//!            └────────────── shared registry region ──────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use hugelink::{BackingType, ChannelConfig, MsgFlags, PeerRegistry, RegionConfig, RegistryConfig};
//!
//! # fn main() -> hugelink::Result<()> {
//! let region = RegionConfig::new("demo", 8 * 1024 * 1024).with_backing_type(BackingType::MemFd);
//! let registry = PeerRegistry::create(RegistryConfig::new(region))?;
//! let master = registry.register(ChannelConfig::master())?;
//! let slave = registry.register(ChannelConfig::slave())?;
//!
//! let block = master.registry().arena().base as *const u8;
//! let reference = master.to_physical(block)?;
//! master.put(reference, 64, 1, MsgFlags::empty())?;
//! let message = slave.get()?.expect("delivered");
//! assert_eq!(message.block, reference);
//! # Ok(())
//! # }
//! ```

pub mod addr;
pub mod buffers;
pub mod channel;
pub mod error;
pub mod layout;
pub mod memory;
pub mod registry;
pub mod ringbuf;
pub mod sync;

// Main API re-exports
pub use addr::{ArenaView, BlockAddressTable, BlockRef, IovaResolver, ResolverKind};
pub use buffers::{Block, BlockPoolConfig, BlockPoolStats, LocalBlockPool};
pub use channel::{ChannelConfig, ChannelStatsSnapshot, GroupRole, Message, MessageChannel, MsgFlags};
pub use error::{HugelinkError, Result};
pub use layout::{ArenaDescriptor, PeerRole, PeerState};
pub use memory::{BackingType, RegionConfig, SharedMemoryRegion};
pub use registry::{PeerInfo, PeerRegistry, RegistryConfig};
pub use ringbuf::RingQueue;
pub use sync::{WaitChannel, WakeKind, WakeRecord};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Wire-compatibility version recorded in every registry this build creates
pub const LIBRARY_VERSION: u32 = 101;

pub use layout::constants::LAYOUT_VERSION;

/// Default configuration constants
pub mod config {
    pub use crate::layout::constants::{
        DEFAULT_PAGE_SIZE, DMA_ALIGNMENT, FREE_BLOCK_QUEUE_SLOTS, GET_QUEUE_SLOTS, MAX_HUGE_PAGES,
        MAX_PEERS, PUT_QUEUE_SLOTS,
    };

    /// Default region size: header page plus 16 huge pages
    pub const DEFAULT_REGION_SIZE: usize = 17 * DEFAULT_PAGE_SIZE;
}
