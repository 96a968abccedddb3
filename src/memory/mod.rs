//! Shared memory region management

pub mod config;
pub mod regions;

pub use config::{BackingType, RegionConfig};
pub use regions::{RegionInfo, SharedMemoryRegion};
