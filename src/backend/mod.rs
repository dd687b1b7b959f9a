//! Abstract readiness backend contract (spec §4.2).
//!
//! The scheduler depends only on this trait; it never reaches for a
//! concrete epoll/kqueue/IOCP type itself. Two bindings ship:
//! [`polling::PollingBackend`] (default) and [`mio::MioBackend`].

pub mod mio;
pub mod polling;

use crate::error::Error;
use bitflags::bitflags;
use std::os::unix::io::RawFd;
use std::time::Duration;

bitflags! {
    /// Interest / reported-event bitfield. `REMOTE_CLOSE` is the peer
    /// half-close / HUP condition; `ERROR` is always implicitly
    /// delivered by the kernel regardless of requested interest.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EventMask: u8 {
        const READABLE     = 0b0001;
        const WRITABLE     = 0b0010;
        const REMOTE_CLOSE = 0b0100;
        const ERROR        = 0b1000;
    }
}

/// An fd reported ready, with the subset of `EventMask` the kernel
/// actually observed.
#[derive(Debug, Clone, Copy)]
pub struct ReadinessEvent {
    pub fd: RawFd,
    pub events: EventMask,
}

/// How long `ReadinessBackend::poll` should block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollTimeout {
    /// Do not block; return whatever is already ready.
    Zero,
    /// Block for at most the given duration.
    Bounded(Duration),
    /// Block until woken by a readiness event or `wake`.
    Indefinite,
}

/// Abstract kernel readiness interface (spec §4.2).
///
/// Implementations must honour *oneshot* semantics: after one readiness
/// notification for an fd, that fd is implicitly disarmed until
/// `register`/`modify` is called again. The scheduler is the sole
/// re-arming authority; callers of this trait never need to re-arm on
/// their own initiative.
pub trait ReadinessBackend: Send + Sync {
    /// Arm `fd` with oneshot semantics for `interest`.
    fn register(&self, fd: RawFd, interest: EventMask) -> Result<(), Error>;

    /// Re-arm an already-registered `fd` with a new interest mask.
    fn modify(&self, fd: RawFd, interest: EventMask) -> Result<(), Error>;

    /// Stop watching `fd`.
    fn remove(&self, fd: RawFd) -> Result<(), Error>;

    /// Block up to `timeout`, draining whatever readiness events are
    /// available. A spurious empty result (e.g. from `wake`) is valid.
    fn poll(&self, timeout: PollTimeout) -> Result<Vec<ReadinessEvent>, Error>;

    /// Callable from any thread; causes a concurrent or subsequent
    /// `poll` on this handle to return promptly.
    fn wake(&self) -> Result<(), Error>;
}
