//! Blocks, the master's local block pool and block hand-off
//!
//! The master carves its arena partition into a [`LocalBlockPool`], hands
//! empty blocks to its partner with [`MessageChannel::enqueue_block`], and
//! receives them back filled in messages. The partner takes blocks with
//! [`MessageChannel::dequeue_block`].
//!
//! [`MessageChannel::enqueue_block`]: crate::channel::MessageChannel::enqueue_block
//! [`MessageChannel::dequeue_block`]: crate::channel::MessageChannel::dequeue_block

pub mod block;
pub mod config;
pub mod handoff;
pub mod pool;
pub mod stats;

pub use block::Block;
pub use config::BlockPoolConfig;
pub use pool::LocalBlockPool;
pub use stats::BlockPoolStats;
