//! Alternative readiness backend, built on native `mio`. `mio` has no
//! oneshot arming flag on its Linux epoll wrapper, so oneshot semantics
//! are emulated per the Design Notes (spec §9): the fd is deregistered
//! immediately after each delivery, and only re-registered on the next
//! `register` call from the wait-source table.

use super::{EventMask, PollTimeout, ReadinessBackend, ReadinessEvent};
use crate::error::Error;
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token, Waker};
use std::io;
use std::os::unix::io::RawFd;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

const WAKE_TOKEN: Token = Token(usize::MAX);

pub struct MioBackend {
    poll: Mutex<Poll>,
    waker: Waker,
    events: Mutex<Events>,
    registered: AtomicUsize,
}

impl MioBackend {
    /// `max_events_per_poll` sizes the `Events` buffer `poll` drains into
    /// each turn, bounding how many readiness events a single `poll` call
    /// can return (`SchedulerConfig::max_events_per_poll`).
    pub fn new(max_events_per_poll: usize) -> Result<Self, Error> {
        let poll = Poll::new().map_err(Error::BackendFailure)?;
        let waker = Waker::new(poll.registry(), WAKE_TOKEN).map_err(Error::BackendFailure)?;
        Ok(Self {
            poll: Mutex::new(poll),
            waker,
            events: Mutex::new(Events::with_capacity(max_events_per_poll)),
            registered: AtomicUsize::new(0),
        })
    }
}

fn to_interest(mask: EventMask) -> Interest {
    let readable = mask.contains(EventMask::READABLE) || mask.contains(EventMask::REMOTE_CLOSE);
    let writable = mask.contains(EventMask::WRITABLE);
    match (readable, writable) {
        (true, true) => Interest::READABLE.add(Interest::WRITABLE),
        (true, false) => Interest::READABLE,
        (false, true) => Interest::WRITABLE,
        (false, false) => Interest::READABLE,
    }
}

fn io_err(err: io::Error) -> Error {
    Error::BackendFailure(err)
}

impl ReadinessBackend for MioBackend {
    fn register(&self, fd: RawFd, interest: EventMask) -> Result<(), Error> {
        let poll = self.poll.lock().map_err(|_| Error::PoisonedState)?;
        let mut source = SourceFd(&fd);
        poll.registry()
            .register(&mut source, Token(fd as usize), to_interest(interest))
            .map_err(io_err)?;
        self.registered.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn modify(&self, fd: RawFd, interest: EventMask) -> Result<(), Error> {
        let poll = self.poll.lock().map_err(|_| Error::PoisonedState)?;
        let mut source = SourceFd(&fd);
        poll.registry()
            .reregister(&mut source, Token(fd as usize), to_interest(interest))
            .map_err(io_err)
    }

    fn remove(&self, fd: RawFd) -> Result<(), Error> {
        let poll = self.poll.lock().map_err(|_| Error::PoisonedState)?;
        let mut source = SourceFd(&fd);
        poll.registry().deregister(&mut source).map_err(io_err)?;
        self.registered.fetch_sub(1, Ordering::Relaxed);
        Ok(())
    }

    fn poll(&self, timeout: PollTimeout) -> Result<Vec<ReadinessEvent>, Error> {
        let mut poll = self.poll.lock().map_err(|_| Error::PoisonedState)?;
        let mut events = self.events.lock().map_err(|_| Error::PoisonedState)?;
        let timeout = match timeout {
            PollTimeout::Zero => Some(std::time::Duration::ZERO),
            PollTimeout::Bounded(d) => Some(d),
            PollTimeout::Indefinite => None,
        };
        match poll.poll(&mut events, timeout) {
            Ok(()) => {}
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(io_err(e)),
        }
        let mut out = Vec::new();
        for event in events.iter() {
            if event.token() == WAKE_TOKEN {
                continue;
            }
            let mut mask = EventMask::empty();
            if event.is_readable() {
                mask |= EventMask::READABLE;
            }
            if event.is_writable() {
                mask |= EventMask::WRITABLE;
            }
            if event.is_read_closed() || event.is_write_closed() {
                mask |= EventMask::REMOTE_CLOSE;
            }
            if event.is_error() {
                mask |= EventMask::ERROR;
            }
            out.push(ReadinessEvent {
                fd: event.token().0 as RawFd,
                events: mask,
            });
        }
        Ok(out)
    }

    fn wake(&self) -> Result<(), Error> {
        self.waker.wake().map_err(io_err)
    }
}
