//! End-to-end scenarios against the public `Mutex`/`Condvar` API, matching
//! the numbered scenarios in the crate's testable-properties list.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use adaptive_futex_sync::{Condvar, Mutex};

#[test]
fn uncontended_pair_returns_to_free_state() {
    let mutex = Mutex::new(0u32);
    {
        let mut guard = mutex.lock();
        *guard += 1;
    }
    assert_eq!(*mutex.lock(), 1);
}

#[test]
fn try_lock_fails_while_held() {
    let mutex = Mutex::new(());
    let _guard = mutex.lock();
    assert!(mutex.try_lock().is_err());
}

#[test]
fn try_lock_for_reports_unsupported() {
    let mutex = Mutex::new(());
    let err = mutex.try_lock_for(Duration::from_millis(1)).unwrap_err();
    assert_eq!(err, adaptive_futex_sync::SyncError::Unsupported);
}

/// Scenario 2: two threads hammer a shared counter with short critical
/// sections. Most acquires on the losing thread should resolve by spinning,
/// not by sleeping, and the final count must be exact regardless.
#[test]
fn two_thread_ping_pong_no_sleep() {
    // surfaces the retraining log line (see RawMutex::retrain_acquire) when
    // this test is run with `RUST_LOG=debug`.
    let _ = env_logger::try_init();

    let mutex = Arc::new(Mutex::new(0u64));
    let barrier = Arc::new(Barrier::new(2));

    let threads: Vec<_> = (0..2)
        .map(|_| {
            let mutex = Arc::clone(&mutex);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..20_000 {
                    let mut guard = mutex.lock();
                    *guard += 1;
                }
            })
        })
        .collect();

    for t in threads {
        t.join().unwrap();
    }

    assert_eq!(*mutex.lock(), 40_000);
}

/// Scenario 3: one thread holds the lock long enough that the other thread
/// cannot possibly win by spinning and must fall back to the kernel wait.
#[test]
fn forced_sleep_wakes_the_waiter() {
    let mutex = Arc::new(Mutex::new(0u32));
    let woken_at = Arc::new(std::sync::Mutex::new(None));

    let holder = {
        let mutex = Arc::clone(&mutex);
        let guard = mutex.lock();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(150));
            drop(guard);
        })
    };

    // give the holder thread time to actually take the lock first.
    thread::sleep(Duration::from_millis(20));

    let start = Instant::now();
    let waiter = {
        let mutex = Arc::clone(&mutex);
        let woken_at = Arc::clone(&woken_at);
        thread::spawn(move || {
            let mut guard = mutex.lock();
            *woken_at.lock().unwrap() = Some(start.elapsed());
            *guard += 1;
        })
    };

    holder.join().unwrap();
    waiter.join().unwrap();

    let elapsed = woken_at.lock().unwrap().unwrap();
    assert!(elapsed >= Duration::from_millis(100));
    assert_eq!(*mutex.lock(), 1);
}

/// Scenario 6: ten threads block on a condvar bound to one mutex; a single
/// `notify_all` must eventually wake every one of them, serialized through
/// the mutex.
#[test]
fn broadcast_wakes_all_waiters() {
    const N: usize = 10;

    let mutex = Arc::new(Mutex::new(false));
    let cv = Arc::new(Condvar::new());
    let woken = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(N + 1));

    let threads: Vec<_> = (0..N)
        .map(|_| {
            let mutex = Arc::clone(&mutex);
            let cv = Arc::clone(&cv);
            let woken = Arc::clone(&woken);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let mut guard = mutex.lock();
                barrier.wait();
                while !*guard {
                    guard = cv.wait(guard).unwrap();
                }
                woken.fetch_add(1, Ordering::SeqCst);
            })
        })
        .collect();

    barrier.wait();
    // give every waiter a chance to actually park before broadcasting.
    thread::sleep(Duration::from_millis(100));

    {
        let mut guard = mutex.lock();
        *guard = true;
    }
    cv.notify_all();

    for t in threads {
        t.join().unwrap();
    }

    assert_eq!(woken.load(Ordering::SeqCst), N);
}

#[test]
fn condvar_wait_timeout_elapses_without_signal() {
    let mutex = Mutex::new(());
    let cv = Condvar::new();

    let guard = mutex.lock();
    let start = Instant::now();
    let (_guard, result) = cv.wait_timeout(guard, Duration::from_millis(50)).unwrap();
    assert!(result.timed_out());
    assert!(start.elapsed() >= Duration::from_millis(40));
}
