//! Synchronization primitives that live inside the shared region
//!
//! - [`WaitChannel`]: counting semaphore plus a FIFO of timestamped wake records
//! - [`SharedMutex`]: robust process-shared mutex serializing registry changes

pub mod mutex;
pub mod wait;

pub use mutex::{SharedMutex, SharedMutexGuard};
pub use wait::{monotonic_ns, WaitChannel, WakeKind, WakeRecord};
