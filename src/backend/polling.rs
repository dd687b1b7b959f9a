//! Default readiness backend, built on the `polling` crate — the same
//! reactor underneath `async-io`/`smol`. Unlike `mio`, `polling` exposes
//! native per-platform oneshot arming, so `register`/`modify` translate
//! directly onto it without any emulation.
//!
//! `polling::Event` only exposes `readable`/`writable` bits — HUP, error
//! and priority conditions are folded into both being set rather than
//! reported as distinct flags, so `from_event` below treats that
//! combination as a close-or-error signal. See DESIGN.md for the tradeoff
//! against `MioBackend`, which reports these natively.

use super::{EventMask, PollTimeout, ReadinessBackend, ReadinessEvent};
use crate::error::Error;
use polling::{Event, Events, PollMode, Poller};
use std::io;
use std::os::unix::io::{BorrowedFd, RawFd};
use std::sync::Mutex;

/// Sentinel key used for the cross-thread wake notification; filtered
/// out of every `poll` result.
const WAKE_KEY: usize = usize::MAX;

pub struct PollingBackend {
    poller: Poller,
    events: Mutex<Events>,
}

impl PollingBackend {
    /// `max_events_per_poll` sizes the `Events` buffer `poll` drains into
    /// each turn, bounding how many readiness events a single `poll` call
    /// can return (`SchedulerConfig::max_events_per_poll`).
    pub fn new(max_events_per_poll: usize) -> Result<Self, Error> {
        let poller = Poller::new().map_err(Error::BackendFailure)?;
        Ok(Self {
            poller,
            events: Mutex::new(Events::with_capacity(max_events_per_poll)),
        })
    }
}

fn to_event(fd: RawFd, interest: EventMask) -> Event {
    let mut event = Event::none(fd as usize);
    event.readable = interest.contains(EventMask::READABLE) || interest.contains(EventMask::REMOTE_CLOSE);
    event.writable = interest.contains(EventMask::WRITABLE);
    event
}

fn from_event(event: &polling::Event) -> ReadinessEvent {
    let mut mask = EventMask::empty();
    if event.readable {
        mask |= EventMask::READABLE;
    }
    if event.writable {
        mask |= EventMask::WRITABLE;
    }
    // `polling::Event` has only `readable`/`writable` bits; HUP, error and
    // priority conditions are folded into both being reported together
    // rather than surfaced as their own flags. We can't tell which of the
    // three actually happened, so treat "both set" as signalling a
    // close-or-error condition on top of the readable/writable bits,
    // matching what `MioBackend` reports natively via `is_read_closed` /
    // `is_write_closed` / `is_error`.
    if event.readable && event.writable {
        mask |= EventMask::REMOTE_CLOSE | EventMask::ERROR;
    }
    ReadinessEvent {
        fd: event.key as RawFd,
        events: mask,
    }
}

fn io_err(err: io::Error) -> Error {
    Error::BackendFailure(err)
}

impl ReadinessBackend for PollingBackend {
    fn register(&self, fd: RawFd, interest: EventMask) -> Result<(), Error> {
        let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
        unsafe {
            self.poller
                .add_with_mode(&borrowed, to_event(fd, interest), PollMode::Oneshot)
                .map_err(io_err)
        }
    }

    fn modify(&self, fd: RawFd, interest: EventMask) -> Result<(), Error> {
        let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
        self.poller
            .modify_with_mode(&borrowed, to_event(fd, interest), PollMode::Oneshot)
            .map_err(io_err)
    }

    fn remove(&self, fd: RawFd) -> Result<(), Error> {
        let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
        self.poller.delete(&borrowed).map_err(io_err)
    }

    fn poll(&self, timeout: PollTimeout) -> Result<Vec<ReadinessEvent>, Error> {
        let mut events = self.events.lock().map_err(|_| Error::PoisonedState)?;
        events.clear();
        let timeout = match timeout {
            PollTimeout::Zero => Some(std::time::Duration::ZERO),
            PollTimeout::Bounded(d) => Some(d),
            PollTimeout::Indefinite => None,
        };
        self.poller.wait(&mut events, timeout).map_err(io_err)?;
        Ok(events
            .iter()
            .filter(|e| e.key != WAKE_KEY)
            .map(|e| from_event(&e))
            .collect())
    }

    fn wake(&self) -> Result<(), Error> {
        self.poller.notify().map_err(io_err)
    }
}
