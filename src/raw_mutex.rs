//! The acquire/release state machine and the adaptation controller that
//! retrains each lock's spin budgets from its own observed contention.
//!
//! `lock`/`unlock` each run in one of two modes: "training" (forced to a
//! fixed maximum spin budget while statistics accumulate) or "steady"
//! (budget fixed at whatever the last retraining installed). A lock starts
//! in training on the acquire side and transitions to steady permanently
//! once one retraining round completes; the release side starts steady at
//! a fixed initial budget and only enters its own training mode once the
//! acquire retrainer decides release contention is worth tuning.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use log::debug;

use crate::futex::{futex_wait, futex_wake};
use crate::word::{StatusWord, LOCKED_AND_CONTENDED};

/// Training sentinel and upper bound for `spin_budget_acquire`.
const ACQUIRE_TRAIN_SPIN_MAX: u32 = 512;
/// Training sentinel and upper bound for `spin_budget_release`.
const RELEASE_TRAIN_SPIN_MAX: u32 = 128;
/// Initial, non-sentinel budget for the release path before the acquire
/// retrainer arms release training for the first time.
const RELEASE_SPIN_INIT: u32 = 32;

const ACQUIRE_SPIN_MIN: u32 = 8;
const RELEASE_SPIN_MIN: u32 = 8;

const SUCCESS_RATIO_MIN: f64 = 0.5;

#[cfg(not(feature = "fast_retrain"))]
const SLOWDOWN_FACTOR: u32 = 11;
#[cfg(feature = "fast_retrain")]
const SLOWDOWN_FACTOR: u32 = 20;

/// `n_acquire & ACQUIRE_RETRAIN_MASK == 0` marks an acquire retraining
/// boundary; stride is `ACQUIRE_RETRAIN_MASK + 1` acquires.
const ACQUIRE_RETRAIN_MASK: u64 = (2u64 << (24 - SLOWDOWN_FACTOR as u64)) - 1;
/// Same, for `n_slow_release`.
const RELEASE_RETRAIN_MASK: u64 = (2u64 << (23 - SLOWDOWN_FACTOR as u64)) - 1;

/// A futex-backed mutex word plus the counters its adaptation controller
/// needs, without the `UnsafeCell<T>` payload. Cache-line aligned so the
/// frequently-CAS'd `status` word doesn't false-share with a neighboring
/// lock.
#[repr(align(64))]
pub struct RawMutex {
    status: StatusWord,

    spin_budget_acquire: AtomicU32,
    spin_budget_release: AtomicU32,

    n_acquire: AtomicU64,
    n_slow_release: AtomicU64,

    n_spin_acquire: AtomicU64,
    sum_spins_acquire: AtomicU64,

    n_spin_release: AtomicU64,
    sum_spins_release: AtomicU64,
}

impl Default for RawMutex {
    fn default() -> Self {
        Self::new()
    }
}

impl RawMutex {
    pub const fn new() -> Self {
        Self {
            status: StatusWord::new(0),
            spin_budget_acquire: AtomicU32::new(ACQUIRE_TRAIN_SPIN_MAX),
            spin_budget_release: AtomicU32::new(RELEASE_SPIN_INIT),
            n_acquire: AtomicU64::new(0),
            n_slow_release: AtomicU64::new(0),
            n_spin_acquire: AtomicU64::new(0),
            sum_spins_acquire: AtomicU64::new(0),
            n_spin_release: AtomicU64::new(0),
            sum_spins_release: AtomicU64::new(0),
        }
    }

    #[inline]
    fn is_training_acquire(&self) -> bool {
        self.spin_budget_acquire.load(Ordering::Relaxed) == ACQUIRE_TRAIN_SPIN_MAX
    }

    #[inline]
    fn is_training_release(&self) -> bool {
        self.spin_budget_release.load(Ordering::Relaxed) == RELEASE_TRAIN_SPIN_MAX
    }

    /// Non-blocking acquire; never spins, never trains.
    #[inline]
    pub fn try_lock(&self) -> bool {
        self.status.xchg_locked_byte(1, Ordering::Acquire) == 0
    }

    pub fn lock(&self) {
        if self.is_training_acquire() {
            self.lock_training();
        } else {
            self.lock_steady();
        }
    }

    /// Spin for up to `budget` iterations trying to grab `locked` while it
    /// reads zero. Returns the 1-based iteration number on success.
    #[inline]
    fn spin_for_lock(&self, budget: u32) -> Option<u32> {
        for i in 1..=budget {
            if self.status.load_locked_byte(Ordering::Relaxed) == 0
                && self.status.xchg_locked_byte(1, Ordering::Acquire) == 0
            {
                return Some(i);
            }
            crate::word::pause();
        }
        None
    }

    /// Sleep phase shared by steady-state and training acquire: mark the
    /// lock contended and block until we're the one flipping `locked` from
    /// 0 to 1.
    #[cold]
    fn sleep_until_locked(&self) {
        loop {
            let prev = self.status.swap(LOCKED_AND_CONTENDED, Ordering::Acquire);
            if prev & 1 == 0 {
                // we wrote locked=1 over locked=0: we now own the lock.
                return;
            }
            futex_wait(self.status.as_atomic_u32(), LOCKED_AND_CONTENDED, None);
        }
    }

    fn lock_steady(&self) {
        if self.spin_for_lock(self.spin_budget_acquire.load(Ordering::Relaxed)).is_some() {
            return;
        }
        self.sleep_until_locked();
    }

    #[cold]
    fn lock_training(&self) {
        if let Some(i) = self.spin_for_lock(ACQUIRE_TRAIN_SPIN_MAX) {
            self.n_spin_acquire.fetch_add(1, Ordering::Relaxed);
            self.sum_spins_acquire.fetch_add(i as u64, Ordering::Relaxed);
        } else {
            self.sleep_until_locked();
        }

        let n_acquire = self.n_acquire.fetch_add(1, Ordering::Relaxed) + 1;
        if n_acquire & ACQUIRE_RETRAIN_MASK == 0 {
            self.retrain_acquire(n_acquire);
        }
    }

    #[cold]
    fn retrain_acquire(&self, n_acquire: u64) {
        let n_spin_acquire = self.n_spin_acquire.load(Ordering::Relaxed);
        let success_ratio = n_spin_acquire as f64 / n_acquire as f64;
        let avg_spins = if n_spin_acquire == 0 {
            0
        } else {
            self.sum_spins_acquire.load(Ordering::Relaxed) / n_spin_acquire
        };

        let new_budget = if success_ratio >= SUCCESS_RATIO_MIN {
            256u32 << (10.0 * success_ratio).floor() as u32
        } else {
            ACQUIRE_SPIN_MIN
        };

        // Single aligned store: readers without the lock may observe the
        // old or the new budget, never a torn mix of the two.
        self.spin_budget_acquire.store(new_budget, Ordering::Release);
        // Re-arm release training so the two sides rebalance together.
        self.spin_budget_release
            .store(RELEASE_TRAIN_SPIN_MAX, Ordering::Release);

        debug!(
            "[lock train] avg spin={avg_spins} succ_ratio={success_ratio:.4} => budget={new_budget} lock={:p}",
            self
        );
    }

    /// Blocking acquire, for use by the condition variable's reacquire
    /// path: identical sleep-phase handshake as `lock`, but bypasses the
    /// spin phase and the adaptation controller entirely.
    pub(crate) fn lock_after_wait(&self) {
        self.sleep_until_locked();
    }

    pub fn unlock(&self) {
        if self.is_training_release() {
            self.unlock_training();
        } else {
            self.unlock_steady();
        }
    }

    fn unlock_steady(&self) {
        if self.status.compare_exchange(1, 0).is_ok() {
            return;
        }
        self.unlock_slow_path(self.spin_budget_release.load(Ordering::Relaxed));
    }

    #[cold]
    fn unlock_training(&self) {
        if self.status.compare_exchange(1, 0).is_ok() {
            return;
        }
        self.n_slow_release.fetch_add(1, Ordering::Relaxed);

        if let Some(i) = self.unlock_slow_path(RELEASE_TRAIN_SPIN_MAX) {
            self.n_spin_release.fetch_add(1, Ordering::Relaxed);
            self.sum_spins_release.fetch_add(i as u64, Ordering::Relaxed);
        }

        let n_slow_release = self.n_slow_release.load(Ordering::Relaxed);
        if n_slow_release & RELEASE_RETRAIN_MASK == 0 {
            self.retrain_release(n_slow_release);
        }
    }

    /// Clears `locked`, then spins for up to `budget` iterations hoping a
    /// spinning acquirer takes the lock before we have to wake anyone.
    /// Returns the 1-based iteration a new owner was observed at, if any.
    #[inline]
    fn unlock_slow_path(&self, budget: u32) -> Option<u32> {
        self.status.xchg_locked_byte(0, Ordering::Release);

        for i in 1..=budget {
            if self.status.load_locked_byte(Ordering::Relaxed) != 0 {
                return Some(i);
            }
            crate::word::pause();
        }

        self.status.clear_contended_byte(Ordering::Release);
        futex_wake(self.status.as_atomic_u32());
        None
    }

    #[cold]
    fn retrain_release(&self, n_slow_release: u64) {
        let n_spin_release = self.n_spin_release.load(Ordering::Relaxed);
        // Zero-division guard: every slow release in this window went
        // straight to a kernel wake, so treat it as a 0% success ratio
        // instead of dividing by zero.
        let success_ratio = if n_spin_release == 0 {
            0.0
        } else {
            n_spin_release as f64 / n_slow_release as f64
        };
        let avg_spins = if n_spin_release == 0 {
            0
        } else {
            self.sum_spins_release.load(Ordering::Relaxed) / n_spin_release
        };

        let new_budget = if success_ratio >= SUCCESS_RATIO_MIN {
            2u32 << (10.0 * success_ratio).floor() as u32
        } else {
            RELEASE_SPIN_MIN
        };

        self.spin_budget_release.store(new_budget, Ordering::Release);

        debug!(
            "[unlock train] avg spin={avg_spins} succ_ratio={success_ratio:.4} => budget={new_budget} lock={:p}",
            self
        );
    }

    /// Snapshot counters for tests and diagnostics; not part of the hot
    /// path, so `Relaxed` loads are fine even though they're not serialized
    /// against an in-flight critical section.
    #[cfg(test)]
    pub(crate) fn stats(&self) -> RawMutexStats {
        RawMutexStats {
            n_acquire: self.n_acquire.load(Ordering::Relaxed),
            n_slow_release: self.n_slow_release.load(Ordering::Relaxed),
            n_spin_acquire: self.n_spin_acquire.load(Ordering::Relaxed),
            n_spin_release: self.n_spin_release.load(Ordering::Relaxed),
            spin_budget_acquire: self.spin_budget_acquire.load(Ordering::Relaxed),
            spin_budget_release: self.spin_budget_release.load(Ordering::Relaxed),
            status: self.status.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn status_word(&self) -> &StatusWord {
        &self.status
    }
}

unsafe impl Send for RawMutex {}
unsafe impl Sync for RawMutex {}

#[cfg(test)]
#[derive(Debug)]
pub(crate) struct RawMutexStats {
    pub n_acquire: u64,
    pub n_slow_release: u64,
    pub n_spin_acquire: u64,
    pub n_spin_release: u64,
    pub spin_budget_acquire: u32,
    pub spin_budget_release: u32,
    pub status: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uncontended_pair() {
        let m = RawMutex::new();
        m.lock();
        m.unlock();
        assert_eq!(m.stats().status, 0);
        assert_eq!(m.stats().n_acquire, 1);
        assert_eq!(m.stats().n_slow_release, 0);
    }

    #[test]
    fn try_lock_reports_busy() {
        let m = RawMutex::new();
        assert!(m.try_lock());
        assert!(!m.try_lock());
        m.unlock();
    }

    #[test]
    fn initial_budgets_match_documented_defaults() {
        let m = RawMutex::new();
        assert_eq!(m.stats().spin_budget_acquire, ACQUIRE_TRAIN_SPIN_MAX);
        assert_eq!(m.stats().spin_budget_release, RELEASE_SPIN_INIT);
        assert!(m.is_training_acquire());
        assert!(!m.is_training_release());
    }

    #[test]
    fn retrain_promotion_installs_aggressive_budget_and_rearms_release() {
        let m = RawMutex::new();
        // Every acquire in this window spun and won immediately.
        m.n_acquire.store(16384, Ordering::Relaxed);
        m.n_spin_acquire.store(16384, Ordering::Relaxed);
        m.sum_spins_acquire.store(16384, Ordering::Relaxed);

        m.retrain_acquire(16384);

        let stats = m.stats();
        // success_ratio == 1.0 => 256 << 10
        assert_eq!(stats.spin_budget_acquire, 256 << 10);
        assert!(stats.spin_budget_acquire > ACQUIRE_SPIN_MIN);
        assert_eq!(stats.spin_budget_release, RELEASE_TRAIN_SPIN_MAX);
        assert!(m.is_training_release());
    }

    #[test]
    fn retrain_demotion_falls_back_to_minimum_budget() {
        let m = RawMutex::new();
        // Almost every acquire in this window had to sleep.
        m.n_acquire.store(16384, Ordering::Relaxed);
        m.n_spin_acquire.store(10, Ordering::Relaxed);
        m.sum_spins_acquire.store(40, Ordering::Relaxed);

        m.retrain_acquire(16384);

        assert_eq!(m.stats().spin_budget_acquire, ACQUIRE_SPIN_MIN);
    }

    #[test]
    fn release_retrain_zero_division_guard() {
        let m = RawMutex::new();
        m.n_slow_release.store(8192, Ordering::Relaxed);
        m.n_spin_release.store(0, Ordering::Relaxed);
        m.sum_spins_release.store(0, Ordering::Relaxed);

        // Must not panic (and not divide by zero).
        m.retrain_release(8192);

        assert_eq!(m.stats().spin_budget_release, RELEASE_SPIN_MIN);
    }

    #[test]
    fn retrain_budgets_stay_within_bounds() {
        for spin in 0..=20u64 {
            let m = RawMutex::new();
            let total = 20u64;
            m.n_acquire.store(total, Ordering::Relaxed);
            m.n_spin_acquire.store(spin.min(total), Ordering::Relaxed);
            m.sum_spins_acquire.store(spin.min(total), Ordering::Relaxed);
            m.retrain_acquire(total);
            let budget = m.stats().spin_budget_acquire;
            assert!(budget == ACQUIRE_SPIN_MIN || (256..=(256 << 10)).contains(&budget));
        }
    }

    #[cfg(feature = "fast_retrain")]
    #[test]
    fn single_threaded_contention_free_loop_promotes_budget() {
        let m = RawMutex::new();
        // Uncontended, so every acquire spins and wins on the first try:
        // drive the acquire counter past one retraining boundary.
        for _ in 0..(ACQUIRE_RETRAIN_MASK + 1) {
            m.lock();
            m.unlock();
        }
        assert!(!m.is_training_acquire());
        assert!(m.stats().spin_budget_acquire > ACQUIRE_SPIN_MIN);
    }
}
