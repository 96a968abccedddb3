//! Bounded queues shared between the two peers

pub mod queue;


pub use queue::{CachePadded, RingQueue, SharedPod};
