//! Error types returned by the lock and condition-variable APIs.
//!
//! A small set of typed errors rather than raw errno values.

use core::fmt;

/// Errors that can be returned by the condition-variable and timed-lock
/// operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum SyncError {
    /// A condition variable wait presented a mutex different from the one
    /// it is already bound to.
    InvalidArgument,
    /// The operation is not supported by this implementation.
    ///
    /// Returned by the timed-lock entry point, which has no timed-acquire
    /// path (see `Mutex::try_lock_for`).
    Unsupported,
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncError::InvalidArgument => {
                f.write_str("condition variable is already bound to a different mutex")
            }
            SyncError::Unsupported => f.write_str("operation is not supported"),
        }
    }
}

impl std::error::Error for SyncError {}

/// The lock could not be acquired at this time because it was already
/// locked, mirroring `std::sync::TryLockError` for the non-poisoning case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TryLockError;

impl fmt::Display for TryLockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("try_lock failed because the operation would block")
    }
}

impl std::error::Error for TryLockError {}

/// Whether a timed condition-variable wait returned because of a timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitTimeoutResult(pub(crate) bool);

impl WaitTimeoutResult {
    /// Returns `true` if the wait was known to have timed out.
    pub fn timed_out(&self) -> bool {
        self.0
    }
}
