//! Thin wrappers around the Linux `futex(2)` syscall.
//!
//! Every operation is issued with `FUTEX_PRIVATE_FLAG` set: this crate never
//! shares a lock across a process boundary (see the crate-level Non-goals),
//! and the private variants skip a virtual-to-physical address lookup in the
//! kernel.

use std::sync::atomic::AtomicU32;
use std::time::Duration;

const fn private(op: i32) -> i32 {
    op | libc::FUTEX_PRIVATE_FLAG
}

fn to_timespec(timeout: Duration) -> libc::timespec {
    libc::timespec {
        tv_sec: timeout.as_secs() as libc::time_t,
        tv_nsec: timeout.subsec_nanos() as libc::c_long,
    }
}

/// Blocks the current thread while `futex` still equals `expected`.
///
/// Returns `true` unless the wait is known to have timed out. Any other
/// syscall outcome (woken, value already changed, interrupted) is folded
/// into `true`: callers re-check their own condition in a loop, so a
/// spurious return is indistinguishable from a real one.
pub fn futex_wait(futex: &AtomicU32, expected: u32, timeout: Option<Duration>) -> bool {
    let ts = timeout.map(to_timespec);
    let ts_ptr = ts
        .as_ref()
        .map_or(std::ptr::null(), |ts| ts as *const libc::timespec);

    let rv = unsafe {
        libc::syscall(
            libc::SYS_futex,
            futex.as_ptr(),
            private(libc::FUTEX_WAIT),
            expected,
            ts_ptr,
            std::ptr::null_mut::<u32>(),
            0,
        )
    };

    if rv == 0 {
        return true;
    }
    match unsafe { *libc::__errno_location() } {
        // the futex did not have the expected value anymore: not an error,
        // just means we should re-check the lock word ourselves.
        libc::EAGAIN => true,
        // interrupted by a signal: treated as a spurious wakeup.
        libc::EINTR => true,
        libc::ETIMEDOUT => false,
        errno => panic!("futex_wait: unexpected errno {errno}"),
    }
}

/// Wakes up to one waiter blocked on `futex`.
pub fn futex_wake(futex: &AtomicU32) {
    let rv = unsafe {
        libc::syscall(
            libc::SYS_futex,
            futex.as_ptr(),
            private(libc::FUTEX_WAKE),
            1,
        )
    };
    assert!(rv >= 0, "futex_wake failed: errno {}", unsafe {
        *libc::__errno_location()
    });
}

/// Wakes exactly one waiter blocked on `wake_futex`, and moves the rest of
/// the waiters blocked there onto `requeue_futex`'s wait queue without
/// waking them.
///
/// Uses `FUTEX_CMP_REQUEUE` rather than plain `FUTEX_REQUEUE` so the kernel
/// re-validates `*wake_futex == expected` atomically with the requeue. That
/// check can legitimately fail: if another `notify_one`/`notify_all` races
/// ahead of this one and moves the value past `expected` before the syscall
/// runs, the kernel reports `EAGAIN` and requeues nothing. That's a benign
/// no-op from this call's point of view, not an error.
pub fn futex_requeue(wake_futex: &AtomicU32, expected: u32, requeue_futex: &AtomicU32) {
    let rv = unsafe {
        libc::syscall(
            libc::SYS_futex,
            wake_futex.as_ptr(),
            private(libc::FUTEX_CMP_REQUEUE),
            1i32,
            // the "requeue all remaining waiters" sentinel; FUTEX_CMP_REQUEUE
            // reads this argument through the timeout slot as a plain count.
            i32::MAX,
            requeue_futex.as_ptr(),
            expected,
        )
    };
    if rv >= 0 {
        return;
    }
    match unsafe { *libc::__errno_location() } {
        // `*wake_futex` no longer equals `expected`: a concurrent notify
        // already moved past us, so there is nothing left for us to requeue.
        libc::EAGAIN => {}
        errno => panic!("futex_requeue failed: errno {errno}"),
    }
}
