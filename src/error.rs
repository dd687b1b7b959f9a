//! Error kinds surfaced by the scheduler core.
//!
//! Ownership, invalid-resume and continuation-barrier violations are
//! programmer errors: they are fatal to the calling operation and the
//! caller is expected to treat them as such rather than retry. Backend
//! failures terminate the owning scheduler with the original error.
//! Unknown-fd events are never raised as an `Error` — they are logged at
//! `warn` and dropped, to tolerate races with fd close (see
//! [`crate::wait_source`]).

use std::io;
use std::os::unix::io::RawFd;
use thiserror::Error;

/// Errors raised by the scheduler core.
#[derive(Debug, Error)]
pub enum Error {
    /// A scheduler was asked to run on a kernel thread while already
    /// owned by another.
    #[error("scheduler is already owned by another kernel thread")]
    OwnershipViolation,

    /// `resume_fiber` was called on a fiber whose continuation slot was
    /// empty (not suspended, or already resumed once).
    #[error("resume_fiber called on a fiber that is not suspended")]
    InvalidResume,

    /// Readiness was reported for an fd with no wait-source entry. Not
    /// raised internally (see module docs); kept for backends that want
    /// to surface the same condition through the public error type.
    #[error("readiness reported for fd {0} with no wait-source entry")]
    UnknownFd(RawFd),

    /// `suspend_current_fiber` was invoked outside the dynamic extent
    /// delimited by the fiber's owning scheduler's prompt.
    #[error("suspend_current_fiber called outside its scheduler's continuation boundary")]
    ContinuationBarrier,

    /// The readiness backend returned an unrecoverable error; the
    /// scheduler loop that observed it terminates with this error.
    #[error("readiness backend failed: {0}")]
    BackendFailure(#[source] io::Error),

    /// An internal mutex guarding scheduler state was poisoned by a
    /// panic on another thread.
    #[error("scheduler internal state mutex was poisoned")]
    PoisonedState,
}

pub type Result<T> = std::result::Result<T, Error>;
