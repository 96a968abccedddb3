//! Constants fixing the shared layout both peers agree on

/// Cache line size for alignment (64 bytes on most x86_64 systems)
pub const CACHE_LINE_SIZE: usize = 64;

/// Magic number identifying an initialized registry region
pub const HUGELINK_MAGIC: u64 = 0x484C_494E_4B53_484D; // "HLINKSHM"

/// Version of the shared layout; bumped whenever a `#[repr(C)]` type changes
pub const LAYOUT_VERSION: u32 = 1;

/// Number of peer contexts in a registry
pub const MAX_PEERS: usize = 4;

/// Maximum number of huge pages one arena may span
pub const MAX_HUGE_PAGES: usize = 32;

/// Slots in a context's receive queue
pub const GET_QUEUE_SLOTS: usize = 1024;

/// Slots in a context's staging queue
pub const PUT_QUEUE_SLOTS: usize = 1024;

/// Slots in a context's free-block queue
pub const FREE_BLOCK_QUEUE_SLOTS: usize = 1200;

/// Wake records a wait channel can hold before posts are dropped
pub const WAKE_FIFO_LEN: usize = 1024;

/// Bytes reserved in the registry header for the serialized arena descriptor
pub const DESCRIPTOR_AREA_SIZE: usize = 512;

/// Pattern stamped into the first 8 bytes of a block handed to the peer
pub const BLOCK_SENTINEL: u64 = 0xFFFF_FFFF_FFFF_FFFF;

/// Default huge page size (2 MiB)
pub const DEFAULT_PAGE_SIZE: usize = 2 * 1024 * 1024;

/// Smallest page size accepted for an arena
pub const MIN_PAGE_SIZE: usize = 4096;

/// Alignment of blocks carved for DMA-capable consumers
pub const DMA_ALIGNMENT: usize = 256;

/// Marker for "no partner" in a peer context
pub const NO_PEER: u32 = u32::MAX;
