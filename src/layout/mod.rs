//! Layout of the registry region shared by both peers
//!
//! ```text
//! offset 0                     arena_offset (page aligned)
//! ┌───────────────────────────┬──────────────────────────────────┐
//! │ RegistryHeader            │ arena                            │
//! │  magic / versions         │  master partition │ slave part.  │
//! │  SharedMutex              │  (block pools)    │              │
//! │  ArenaDescriptor bytes    │                   │              │
//! │  PeerContext x MAX_PEERS  │                   │              │
//! └───────────────────────────┴──────────────────────────────────┘
//! ```

pub mod constants;
pub mod descriptor;
pub mod headers;

pub use constants::*;
pub use descriptor::ArenaDescriptor;
pub use headers::{
    arena_offset, FreeBlockQueue, GetQueue, MessageSlot, PeerContext, PeerRole, PeerState,
    PutQueue, RegistryHeader,
};
