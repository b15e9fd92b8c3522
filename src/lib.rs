//! A self-tuning futex-based mutex and condition variable for Linux/x86_64.
//!
//! Each [`Mutex`] periodically inspects its own acquire/release statistics
//! and retrains the number of spin iterations it attempts before falling
//! back to the kernel, so the spin/sleep balance converges to whatever each
//! lock instance's actual contention pattern calls for instead of using one
//! fixed budget for every lock in a process.
//!
//! No fairness guarantee, no priority inheritance, no recursive
//! acquisition, no cross-process locks (every futex wait is
//! process-private), and no reader-writer variant.

cfg_if::cfg_if! {
    if #[cfg(all(target_os = "linux", target_arch = "x86_64"))] {
        // supported target, nothing to gate
    } else {
        compile_error!("adaptive-futex-sync only supports Linux on x86_64");
    }
}

mod condvar;
mod error;
mod futex;
mod mutex;
mod raw_mutex;
mod word;

pub use condvar::Condvar;
pub use error::{SyncError, TryLockError, WaitTimeoutResult};
pub use mutex::{Mutex, MutexGuard};
pub use raw_mutex::RawMutex;
