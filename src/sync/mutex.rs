//! Robust process-shared mutex guarding the peer registry

use std::{
    cell::UnsafeCell,
    fmt,
    mem::MaybeUninit,
    sync::atomic::{AtomicU32, Ordering},
};

use log::warn;

use crate::error::{HugelinkError, Result};

/// A `pthread_mutex_t` configured `PTHREAD_PROCESS_SHARED` and
/// `PTHREAD_MUTEX_ROBUST`, stored in the shared region
#[repr(C)]
pub struct SharedMutex {
    raw: UnsafeCell<libc::pthread_mutex_t>,
    initialized: AtomicU32,
}

unsafe impl Send for SharedMutex {}
unsafe impl Sync for SharedMutex {}

fn check(code: i32, context: &str) -> Result<()> {
    if code == 0 {
        Ok(())
    } else {
        Err(HugelinkError::from_code(code, context))
    }
}

impl SharedMutex {
    /// Initialize the mutex in place
    pub fn init(&self) -> Result<()> {
        let mut attr = MaybeUninit::<libc::pthread_mutexattr_t>::uninit();
        unsafe {
            check(
                libc::pthread_mutexattr_init(attr.as_mut_ptr()),
                "pthread_mutexattr_init",
            )?;
            let configured = check(
                libc::pthread_mutexattr_setpshared(attr.as_mut_ptr(), libc::PTHREAD_PROCESS_SHARED),
                "pthread_mutexattr_setpshared",
            )
            .and_then(|_| {
                check(
                    libc::pthread_mutexattr_setrobust(attr.as_mut_ptr(), libc::PTHREAD_MUTEX_ROBUST),
                    "pthread_mutexattr_setrobust",
                )
            })
            .and_then(|_| {
                check(
                    libc::pthread_mutex_init(self.raw.get(), attr.as_ptr()),
                    "pthread_mutex_init",
                )
            });
            libc::pthread_mutexattr_destroy(attr.as_mut_ptr());
            configured?;
        }
        self.initialized.store(1, Ordering::Release);
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire) != 0
    }

    /// Acquire the mutex, recovering it if the previous owner died holding it
    pub fn lock(&self) -> Result<SharedMutexGuard<'_>> {
        if !self.is_initialized() {
            return Err(HugelinkError::protocol("registry mutex is not initialized"));
        }
        match unsafe { libc::pthread_mutex_lock(self.raw.get()) } {
            0 => {}
            libc::EOWNERDEAD => {
                warn!("previous registry lock owner died; marking the mutex consistent");
                check(
                    unsafe { libc::pthread_mutex_consistent(self.raw.get()) },
                    "pthread_mutex_consistent",
                )?;
            }
            code => return Err(HugelinkError::from_code(code, "pthread_mutex_lock")),
        }
        Ok(SharedMutexGuard { mutex: self })
    }

    /// Destroy the mutex; must not be held
    pub fn destroy(&self) -> Result<()> {
        if self.initialized.swap(0, Ordering::AcqRel) != 0 {
            check(
                unsafe { libc::pthread_mutex_destroy(self.raw.get()) },
                "pthread_mutex_destroy",
            )?;
        }
        Ok(())
    }
}

impl fmt::Debug for SharedMutex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedMutex")
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

/// Releases the shared mutex on drop
#[derive(Debug)]
pub struct SharedMutexGuard<'a> {
    mutex: &'a SharedMutex,
}

impl Drop for SharedMutexGuard<'_> {
    fn drop(&mut self) {
        unsafe { libc::pthread_mutex_unlock(self.mutex.raw.get()) };
    }
}
