//! Bounded single-producer single-consumer queue that can live in shared memory

use std::{
    alloc::{alloc_zeroed, handle_alloc_error, Layout},
    cell::UnsafeCell,
    fmt,
    ops::Deref,
    sync::atomic::{fence, AtomicU32, Ordering},
};

/// Plain data that may be copied through shared memory by value.
///
/// # Safety
/// Implementors must be `#[repr(C)]` (or primitive), contain no pointers or
/// references, and accept the all-zero bit pattern as a valid value.
pub unsafe trait SharedPod: Copy + Send + 'static {}

unsafe impl SharedPod for u32 {}
unsafe impl SharedPod for u64 {}

/// Pads a value to its own cache line so the two cursors never share one
#[repr(C, align(64))]
#[derive(Debug, Default)]
pub struct CachePadded<T>(T);

impl<T> CachePadded<T> {
    pub const fn new(value: T) -> Self {
        Self(value)
    }
}

impl<T> Deref for CachePadded<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

/// Fixed-capacity ring of `N` slots holding at most `N - 1` items.
///
/// The layout is `#[repr(C)]` so both processes mapping a region see the
/// same cursors and slots. Exactly one thread (or process) may enqueue and
/// exactly one may dequeue at any time; callers serialize their own side.
#[repr(C)]
pub struct RingQueue<T: SharedPod, const N: usize> {
    /// Next slot the producer writes
    put: CachePadded<AtomicU32>,
    /// Next slot the consumer reads
    get: CachePadded<AtomicU32>,
    slots: [UnsafeCell<T>; N],
}

unsafe impl<T: SharedPod, const N: usize> Send for RingQueue<T, N> {}
unsafe impl<T: SharedPod, const N: usize> Sync for RingQueue<T, N> {}

impl<T: SharedPod, const N: usize> RingQueue<T, N> {
    const VALID: () = assert!(N >= 2 && N <= u32::MAX as usize, "ring queue needs 2..=u32::MAX slots");

    /// Usable capacity; one slot always stays empty to tell full from empty
    pub const CAPACITY: usize = N - 1;

    /// Allocate an empty queue on the heap
    pub fn boxed() -> Box<Self> {
        #[allow(clippy::let_unit_value)]
        let () = Self::VALID;
        let layout = Layout::new::<Self>();
        unsafe {
            // Zeroed cursors are a valid empty queue and SharedPod admits zeroed slots
            let ptr = alloc_zeroed(layout) as *mut Self;
            if ptr.is_null() {
                handle_alloc_error(layout);
            }
            Box::from_raw(ptr)
        }
    }

    /// Reset both cursors, emptying the queue.
    ///
    /// Only valid while neither side is using the queue.
    pub fn reset(&self) {
        self.put.store(0, Ordering::Relaxed);
        self.get.store(0, Ordering::Relaxed);
        fence(Ordering::SeqCst);
    }

    #[inline]
    fn next(index: u32) -> u32 {
        let next = index + 1;
        if next as usize == N {
            0
        } else {
            next
        }
    }

    /// Producer side: append an item, returning `false` when full
    pub fn try_enqueue(&self, item: T) -> bool {
        let put = self.put.load(Ordering::Relaxed);
        let Some(slot) = self.slots.get(put as usize) else {
            return false;
        };
        let next = Self::next(put);
        if next == self.get.load(Ordering::Acquire) {
            return false;
        }

        unsafe { slot.get().write(item) };
        // Slot contents must be visible before the peer observes the new cursor
        fence(Ordering::SeqCst);
        self.put.store(next, Ordering::Release);
        true
    }

    /// Consumer side: copy out the oldest item without removing it
    pub fn peek(&self) -> Option<T> {
        let get = self.get.load(Ordering::Relaxed);
        if get == self.put.load(Ordering::Acquire) {
            return None;
        }
        fence(Ordering::SeqCst);
        let slot = self.slots.get(get as usize)?;
        Some(unsafe { slot.get().read() })
    }

    /// Consumer side: drop the oldest item, if any
    pub fn advance(&self) {
        let get = self.get.load(Ordering::Relaxed);
        if get == self.put.load(Ordering::Acquire) || get as usize >= N {
            return;
        }
        self.get.store(Self::next(get), Ordering::Release);
    }

    /// Consumer side: remove and return the oldest item
    pub fn try_dequeue(&self) -> Option<T> {
        let item = self.peek()?;
        self.advance();
        Some(item)
    }

    /// Snapshot of the number of queued items
    pub fn count(&self) -> usize {
        let put = self.put.load(Ordering::Acquire) as usize;
        let get = self.get.load(Ordering::Acquire) as usize;
        if put >= N || get >= N {
            return 0;
        }
        (put + N - get) % N
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    pub fn is_full(&self) -> bool {
        self.count() == Self::CAPACITY
    }

    pub fn capacity(&self) -> usize {
        Self::CAPACITY
    }
}

impl<T: SharedPod, const N: usize> fmt::Debug for RingQueue<T, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingQueue")
            .field("put", &self.put.load(Ordering::Relaxed))
            .field("get", &self.get.load(Ordering::Relaxed))
            .field("count", &self.count())
            .field("capacity", &Self::CAPACITY)
            .finish()
    }
}
