//! Cross-process wait channel backed by a process-shared POSIX semaphore
//!
//! The semaphore lives inside the shared region so the peer can post to it
//! through its own mapping. Each post also appends a timestamped record to a
//! bounded FIFO; once `WAKE_FIFO_LEN` records are held, further posts are
//! dropped and counted so the semaphore can never run ahead of the FIFO.
//!
//! Both peers may post the same channel at once (the partner delivering data
//! and the owner calling `wake_up`), so a poster first reserves room, then
//! claims a slot, writes the record and stamps the slot with its sequence
//! number. The waiter reads a slot only once its stamp matches.

use std::{
    cell::UnsafeCell,
    fmt,
    sync::atomic::{AtomicU32, AtomicU64, Ordering},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use log::{debug, trace, warn};
use nix::{errno::Errno, time::{clock_gettime, ClockId}};

use crate::{
    error::{HugelinkError, Result},
    layout::constants::WAKE_FIFO_LEN,
};

/// Why a wait channel was posted
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeKind {
    /// The peer delivered messages
    Data = 1,
    /// The owner asked its own waiter to return
    WakeUp = 2,
    /// The peer poked the owner without data
    Probe = 3,
}

impl WakeKind {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(WakeKind::Data),
            2 => Some(WakeKind::WakeUp),
            3 => Some(WakeKind::Probe),
            _ => None,
        }
    }
}

/// Entry in the wake FIFO
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WakeRecord {
    /// CLOCK_MONOTONIC nanoseconds at post time
    pub timestamp_ns: u64,
    pub kind: u32,
    _reserved: u32,
}

impl WakeRecord {
    pub fn new(kind: WakeKind) -> Self {
        Self {
            timestamp_ns: monotonic_ns(),
            kind: kind as u32,
            _reserved: 0,
        }
    }

    pub fn kind(&self) -> Option<WakeKind> {
        WakeKind::from_raw(self.kind)
    }

    /// Time between the post and now
    pub fn latency(&self) -> Duration {
        Duration::from_nanos(monotonic_ns().saturating_sub(self.timestamp_ns))
    }
}

/// Nanoseconds on the monotonic clock, shared by all processes on the host
pub fn monotonic_ns() -> u64 {
    clock_gettime(ClockId::CLOCK_MONOTONIC)
        .map(|ts| ts.tv_sec() as u64 * 1_000_000_000 + ts.tv_nsec() as u64)
        .unwrap_or(0)
}

/// Bound on how long a waiter lets a claimed slot stay unpublished
const PUBLISH_SPIN_LIMIT: u32 = 1 << 16;

/// Counting wake primitive that lives in shared memory
#[repr(C)]
pub struct WaitChannel {
    sem: UnsafeCell<libc::sem_t>,
    initialized: AtomicU32,
    /// Published posts not yet consumed by a wait
    pending: AtomicU32,
    /// Slots claimed by posters and not yet read back
    reserved: AtomicU32,
    fifo_put: AtomicU32,
    fifo_get: AtomicU32,
    dropped: AtomicU64,
    /// Sequence number plus one of the record last written to each slot
    ready: [AtomicU32; WAKE_FIFO_LEN],
    records: [UnsafeCell<WakeRecord>; WAKE_FIFO_LEN],
}

unsafe impl Send for WaitChannel {}
unsafe impl Sync for WaitChannel {}

impl WaitChannel {
    /// Initialize the semaphore in place and clear the FIFO
    pub fn init(&self) -> Result<()> {
        if self.initialized.load(Ordering::Acquire) != 0 {
            self.destroy();
        }
        if unsafe { libc::sem_init(self.sem.get(), 1, 0) } != 0 {
            return Err(HugelinkError::last_os_error("sem_init"));
        }
        self.pending.store(0, Ordering::Relaxed);
        self.reserved.store(0, Ordering::Relaxed);
        for stamp in self.ready.iter() {
            stamp.store(0, Ordering::Relaxed);
        }
        self.fifo_put.store(0, Ordering::Relaxed);
        self.fifo_get.store(0, Ordering::Relaxed);
        self.dropped.store(0, Ordering::Relaxed);
        self.initialized.store(1, Ordering::Release);
        Ok(())
    }

    /// Destroy the semaphore; later posts and waits fail with a protocol error
    pub fn destroy(&self) {
        if self.initialized.swap(0, Ordering::AcqRel) != 0 {
            unsafe { libc::sem_destroy(self.sem.get()) };
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire) != 0
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(HugelinkError::protocol("wait channel is not initialized"))
        }
    }

    /// Record a wake and post the semaphore.
    ///
    /// Returns `Ok(false)` when the FIFO is saturated and the post was dropped.
    pub fn post(&self, kind: WakeKind) -> Result<bool> {
        self.ensure_initialized()?;

        let reserved = self
            .reserved
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |r| {
                ((r as usize) < WAKE_FIFO_LEN).then(|| r + 1)
            });
        if reserved.is_err() {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            debug!("wake FIFO saturated, dropping {:?} post ({} dropped)", kind, dropped);
            return Ok(false);
        }

        let seq = self.fifo_put.fetch_add(1, Ordering::AcqRel);
        let index = seq as usize % WAKE_FIFO_LEN;
        unsafe { self.records[index].get().write(WakeRecord::new(kind)) };
        self.ready[index].store(seq.wrapping_add(1), Ordering::Release);
        self.pending.fetch_add(1, Ordering::AcqRel);

        if unsafe { libc::sem_post(self.sem.get()) } != 0 {
            return Err(HugelinkError::last_os_error("sem_post"));
        }
        trace!("posted {:?}", kind);
        Ok(true)
    }

    /// Block until posted.
    ///
    /// Returns the oldest wake record, or `None` for a spurious wake that
    /// found nothing pending.
    pub fn wait(&self) -> Result<Option<WakeRecord>> {
        self.ensure_initialized()?;

        if self.pending.load(Ordering::Acquire) == 0 {
            loop {
                if unsafe { libc::sem_wait(self.sem.get()) } == 0 {
                    break;
                }
                match Errno::last() {
                    Errno::EINTR => continue,
                    errno => {
                        return Err(HugelinkError::platform(format!("sem_wait: {}", errno)))
                    }
                }
            }
        } else {
            // keep the semaphore count in step with `pending`
            unsafe { libc::sem_trywait(self.sem.get()) };
        }

        Ok(self.take_record())
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`, returning `None`
    pub fn wait_timeout(&self, timeout: Duration) -> Result<Option<WakeRecord>> {
        self.ensure_initialized()?;

        if self.pending.load(Ordering::Acquire) == 0 {
            // sem_timedwait takes an absolute CLOCK_REALTIME deadline
            let deadline = SystemTime::now()
                .checked_add(timeout)
                .unwrap_or_else(SystemTime::now)
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default();
            let abs = libc::timespec {
                tv_sec: deadline.as_secs() as libc::time_t,
                tv_nsec: deadline.subsec_nanos() as libc::c_long,
            };
            loop {
                if unsafe { libc::sem_timedwait(self.sem.get(), &abs) } == 0 {
                    break;
                }
                match Errno::last() {
                    Errno::EINTR => continue,
                    Errno::ETIMEDOUT => return Ok(None),
                    errno => {
                        return Err(HugelinkError::platform(format!(
                            "sem_timedwait: {}",
                            errno
                        )))
                    }
                }
            }
        } else {
            unsafe { libc::sem_trywait(self.sem.get()) };
        }

        Ok(self.take_record())
    }

    fn take_record(&self) -> Option<WakeRecord> {
        self.pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |p| p.checked_sub(1))
            .ok()?;
        let seq = self.fifo_get.fetch_add(1, Ordering::AcqRel);
        let index = seq as usize % WAKE_FIFO_LEN;

        // an earlier poster may still be writing the slot it claimed
        let mut spins = 0;
        while self.ready[index].load(Ordering::Acquire) != seq.wrapping_add(1) {
            if spins == PUBLISH_SPIN_LIMIT {
                warn!("wake record {} was claimed but never written", seq);
                self.reserved.fetch_sub(1, Ordering::AcqRel);
                return None;
            }
            spins += 1;
            std::thread::yield_now();
        }

        let record = unsafe { self.records[index].get().read() };
        self.reserved.fetch_sub(1, Ordering::AcqRel);
        Some(record)
    }

    /// Posts not yet consumed
    pub fn pending(&self) -> u32 {
        self.pending.load(Ordering::Acquire)
    }

    /// Posts dropped because the FIFO was saturated
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Allocate a process-private channel on the heap
    pub fn boxed() -> Result<Box<Self>> {
        let layout = std::alloc::Layout::new::<Self>();
        let channel = unsafe {
            let ptr = std::alloc::alloc_zeroed(layout) as *mut Self;
            if ptr.is_null() {
                std::alloc::handle_alloc_error(layout);
            }
            Box::from_raw(ptr)
        };
        channel.init()?;
        Ok(channel)
    }
}

impl fmt::Debug for WaitChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitChannel")
            .field("initialized", &self.is_initialized())
            .field("pending", &self.pending())
            .field("dropped", &self.dropped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        sync::{atomic::AtomicBool, Arc},
        thread,
        time::Instant,
    };

    #[test]
    fn test_post_then_wait() {
        let channel = WaitChannel::boxed().unwrap();
        assert!(channel.post(WakeKind::Data).unwrap());
        assert_eq!(channel.pending(), 1);

        let record = channel.wait().unwrap().unwrap();
        assert_eq!(record.kind(), Some(WakeKind::Data));
        assert!(record.timestamp_ns > 0);
        assert_eq!(channel.pending(), 0);
    }

    #[test]
    fn test_records_are_fifo() {
        let channel = WaitChannel::boxed().unwrap();
        channel.post(WakeKind::Data).unwrap();
        channel.post(WakeKind::WakeUp).unwrap();
        channel.post(WakeKind::Probe).unwrap();

        let kinds: Vec<_> = (0..3)
            .map(|_| channel.wait().unwrap().unwrap().kind().unwrap())
            .collect();
        assert_eq!(kinds, vec![WakeKind::Data, WakeKind::WakeUp, WakeKind::Probe]);
    }

    #[test]
    fn test_saturation_drops_posts() {
        let channel = WaitChannel::boxed().unwrap();
        for _ in 0..WAKE_FIFO_LEN {
            assert!(channel.post(WakeKind::Data).unwrap());
        }
        assert!(!channel.post(WakeKind::Data).unwrap());
        assert_eq!(channel.dropped(), 1);

        // every accepted post is still delivered exactly once
        for _ in 0..WAKE_FIFO_LEN {
            assert!(channel.wait().unwrap().is_some());
        }
        assert_eq!(channel.pending(), 0);
        assert_eq!(channel.wait_timeout(Duration::from_millis(10)).unwrap(), None);
    }

    #[test]
    fn stress_concurrent_posters_never_lose_records() {
        const POSTERS: usize = 4;
        const POSTS: usize = 5_000;
        let channel: Arc<WaitChannel> = Arc::from(WaitChannel::boxed().unwrap());
        let done = Arc::new(AtomicBool::new(false));

        let consumer = {
            let channel = channel.clone();
            let done = done.clone();
            thread::spawn(move || {
                let mut received = 0usize;
                loop {
                    match channel.wait_timeout(Duration::from_millis(20)).unwrap() {
                        Some(record) => {
                            assert_eq!(record.kind(), Some(WakeKind::Probe));
                            assert!(record.timestamp_ns > 0);
                            received += 1;
                        }
                        None if done.load(Ordering::Acquire) && channel.pending() == 0 => {
                            return received
                        }
                        None => {}
                    }
                }
            })
        };

        let accepted: usize = (0..POSTERS)
            .map(|_| {
                let channel = channel.clone();
                thread::spawn(move || {
                    (0..POSTS)
                        .filter(|_| channel.post(WakeKind::Probe).unwrap())
                        .count()
                })
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .sum();
        done.store(true, Ordering::Release);

        assert_eq!(consumer.join().unwrap(), accepted);
        assert_eq!(accepted as u64 + channel.dropped(), (POSTERS * POSTS) as u64);
    }

    #[test]
    fn test_wait_blocks_until_posted() {
        let channel: Arc<WaitChannel> = Arc::from(WaitChannel::boxed().unwrap());
        let poster = channel.clone();

        let start = Instant::now();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            poster.post(WakeKind::Probe).unwrap();
        });

        let record = channel.wait().unwrap().unwrap();
        assert_eq!(record.kind(), Some(WakeKind::Probe));
        assert!(start.elapsed() >= Duration::from_millis(40));
        handle.join().unwrap();
    }

    #[test]
    fn test_destroyed_channel_rejects_use() {
        let channel = WaitChannel::boxed().unwrap();
        channel.destroy();
        assert!(!channel.is_initialized());
        assert!(matches!(
            channel.post(WakeKind::Data),
            Err(HugelinkError::Protocol { .. })
        ));
        assert!(channel.wait().is_err());
    }
}
