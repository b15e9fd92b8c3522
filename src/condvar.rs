//! A condition variable bound to at most one mutex, with signal, broadcast
//! (via futex requeue), and plain/timed wait.
//!
//! Binds to whichever mutex first calls `wait`; a `wait`/`wait_timeout` call
//! from any other mutex fails with `SyncError::InvalidArgument`. Waiters hand
//! over a guard and get a fresh one back, mirroring how the rest of this
//! crate's guard type is consumed and reissued across a blocking call.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crate::error::{SyncError, WaitTimeoutResult};
use crate::futex::{futex_requeue, futex_wait, futex_wake};
use crate::mutex::{Mutex, MutexGuard};
use crate::raw_mutex::RawMutex;

/// Sentinel meaning "no mutex bound yet".
const UNBOUND: usize = 0;

pub struct Condvar {
    seq: AtomicU32,
    /// Address of the `RawMutex` the first waiter used, or `UNBOUND`.
    ///
    /// Stored as a raw address rather than a typed pointer so one `Condvar`
    /// is not tied to a particular `Mutex<T>`'s `T`.
    mutex_binding: AtomicUsize,
}

impl Default for Condvar {
    fn default() -> Self {
        Self::new()
    }
}

impl Condvar {
    pub const fn new() -> Self {
        Self {
            seq: AtomicU32::new(0),
            mutex_binding: AtomicUsize::new(UNBOUND),
        }
    }

    /// Wakes one waiter, if any.
    pub fn notify_one(&self) {
        self.seq.fetch_add(1, Ordering::AcqRel);
        futex_wake(&self.seq);
    }

    /// Wakes one waiter directly and requeues the rest onto the bound
    /// mutex's wait queue, avoiding a thundering herd where every waiter
    /// wakes up only to immediately contend on the mutex.
    pub fn notify_all(&self) {
        let bound = self.mutex_binding.load(Ordering::Acquire);
        if bound == UNBOUND {
            // no mutex bound means no waiters have ever called `wait`.
            return;
        }
        let new_seq = self.seq.fetch_add(1, Ordering::AcqRel).wrapping_add(1);
        let raw_mutex = unsafe { &*(bound as *const RawMutex) };
        futex_requeue(&self.seq, new_seq, raw_mutex.status_word().as_atomic_u32());
    }

    /// Binds this condvar to `mutex_ptr` on first use, or confirms it is
    /// already bound to it. Fails with `InvalidArgument` if a different
    /// mutex was used first.
    fn bind(&self, mutex_ptr: usize) -> Result<(), SyncError> {
        match self
            .mutex_binding
            .compare_exchange(UNBOUND, mutex_ptr, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => Ok(()),
            Err(existing) if existing == mutex_ptr => Ok(()),
            Err(_) => Err(SyncError::InvalidArgument),
        }
    }

    /// Blocks until signaled or broadcast. Atomically unlocks `guard`'s
    /// mutex for the duration of the wait and reacquires it before
    /// returning, exactly as `std::sync::Condvar::wait` does.
    pub fn wait<'a, T>(
        &self,
        guard: MutexGuard<'a, T>,
    ) -> Result<MutexGuard<'a, T>, SyncError> {
        let mutex = guard.mutex();
        self.bind(&mutex.inner as *const RawMutex as usize)?;

        let seq = self.seq.load(Ordering::Acquire);
        drop(guard); // releases the mutex via the normal release path

        futex_wait(&self.seq, seq, None);

        mutex.inner.lock_after_wait();
        Ok(unsafe { MutexGuard::new(mutex) })
    }

    /// Like `wait`, but gives up after `timeout` has elapsed. Reports
    /// whether the wait is known to have timed out; the mutex is always
    /// reacquired before returning, timeout or not.
    pub fn wait_timeout<'a, T>(
        &self,
        guard: MutexGuard<'a, T>,
        timeout: Duration,
    ) -> Result<(MutexGuard<'a, T>, WaitTimeoutResult), SyncError> {
        let mutex = guard.mutex();
        self.bind(&mutex.inner as *const RawMutex as usize)?;

        let seq = self.seq.load(Ordering::Acquire);
        drop(guard);

        let deadline = Instant::now() + timeout;
        let timed_out = match deadline.checked_duration_since(Instant::now()) {
            None => true,
            Some(remaining) => {
                futex_wait(&self.seq, seq, Some(remaining));
                Instant::now() >= deadline
            }
        };

        mutex.inner.lock_after_wait();
        Ok((
            unsafe { MutexGuard::new(mutex) },
            WaitTimeoutResult(timed_out),
        ))
    }
}
