//! Wait-source table (spec §4.4): `fd -> (aggregate_mask, [source_record..])`.
//!
//! Only the owning scheduler's thread mutates this table (spec §5), so
//! it is a plain `HashMap`, not a concurrent map.

use crate::backend::EventMask;
use crate::error::Error;
use crate::fiber::{Fiber, resume_fiber};
use crate::scheduler::Scheduler;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::os::unix::io::RawFd;
use std::sync::Arc;

struct SourceRecord {
    mask: EventMask,
    fiber: Arc<Fiber>,
}

struct WaitEntry {
    /// `None` means "fully drained since last delivery" (spec §3).
    aggregate: Option<EventMask>,
    sources: Vec<SourceRecord>,
}

#[derive(Default)]
pub struct WaitSourceTable {
    entries: HashMap<RawFd, WaitEntry>,
}

impl WaitSourceTable {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity),
        }
    }

    pub fn contains(&self, fd: RawFd) -> bool {
        self.entries.contains_key(&fd)
    }

    pub fn active_entry_count(&self) -> usize {
        self.entries.values().filter(|e| e.aggregate.is_some()).count()
    }
}

/// Register `fiber` to resume when any of `mask`'s events fire on `fd`
/// (spec §4.4). Implements the full entry-creation / merge algorithm,
/// including re-arming the backend only when the requested events are
/// not already a subset of the current aggregate mask.
pub fn resume_on_fd_events(
    sched: &Arc<Scheduler>,
    fd: RawFd,
    mask: EventMask,
    fiber: &Arc<Fiber>,
) -> Result<(), Error> {
    let mut table = sched.wait_sources().lock().map_err(|_| Error::PoisonedState)?;
    tracing::trace!(fd, ?mask, fiber = %fiber.id(), "registering fd wait");
    match table.entries.entry(fd) {
        Entry::Vacant(vacant) => {
            vacant.insert(WaitEntry {
                aggregate: Some(mask),
                sources: vec![SourceRecord {
                    mask,
                    fiber: fiber.clone(),
                }],
            });
            sched.active_fds().increment();
            drop(table);
            sched.backend().register(fd, mask)
        }
        Entry::Occupied(mut occupied) => {
            let entry = occupied.get_mut();
            let was_drained = entry.aggregate.is_none();
            entry.sources.push(SourceRecord {
                mask,
                fiber: fiber.clone(),
            });
            if was_drained {
                entry.aggregate = Some(mask);
                sched.active_fds().increment();
                drop(table);
                // The entry already exists, so the backend already has `fd`
                // tracked (a drained aggregate only ever follows an error
                // delivery, which keeps the fd registered — see
                // `dispatch_ready`'s error branch). `register` would be a
                // duplicate registration; re-arm with `modify` instead.
                sched.backend().modify(fd, mask)
            } else {
                let current = entry.aggregate.expect("checked non-drained above");
                if !current.contains(mask) {
                    let union = current | mask;
                    entry.aggregate = Some(union);
                    drop(table);
                    sched.backend().modify(fd, union)
                } else {
                    Ok(())
                }
            }
        }
    }
}

/// Dispatch a readiness notification for `fd` with reported events `R`
/// (spec §4.4). Every source record whose requested mask overlaps
/// `R | ERROR` is resumed with `R`. On a clean (non-error) delivery the
/// whole entry is removed and the fd dropped from the backend — oneshot
/// plus full dispatch means one readiness notification is one broadcast;
/// waiters that want more must re-register. On an error delivery the
/// entry is kept but drained, forcing fresh registration next wait.
pub fn dispatch_ready(sched: &Arc<Scheduler>, fd: RawFd, reported: EventMask) {
    let mut table = match sched.wait_sources().lock() {
        Ok(table) => table,
        Err(_) => return,
    };

    let had_error = {
        let Some(entry) = table.entries.get_mut(&fd) else {
            tracing::warn!(fd, ?reported, "readiness reported for unknown fd; dropped");
            return;
        };
        sched.active_fds().decrement();
        tracing::trace!(fd, ?reported, waiters = entry.sources.len(), "dispatching fd readiness");

        let check_mask = reported | EventMask::ERROR;
        for record in entry.sources.iter() {
            if record.mask.intersects(check_mask) {
                let fiber = record.fiber.clone();
                let delivered = reported;
                if let Err(err) = resume_fiber(&fiber, move || delivered) {
                    tracing::warn!(fiber = %fiber.id(), error = %err, "failed to resume fd waiter");
                }
            }
        }

        let had_error = reported.contains(EventMask::ERROR);
        if had_error {
            entry.sources.clear();
            entry.aggregate = None;
        }
        had_error
    };

    if !had_error {
        table.entries.remove(&fd);
        drop(table);
        let _ = sched.backend().remove(fd);
    }
}

/// Called by the owning I/O layer when it closes `fd` out from under any
/// waiters. Removes the wait-source entry and decrements the active-fd
/// counter exactly once, even if several fibers were waiting on it.
pub fn notify_fd_closed(sched: &Arc<Scheduler>, fd: RawFd) {
    let Ok(mut table) = sched.wait_sources().lock() else {
        return;
    };
    if let Some(entry) = table.entries.remove(&fd) {
        if entry.aggregate.is_some() {
            sched.active_fds().decrement();
        }
    }
}

/// Arms a oneshot readable (plus remote-close) wait on `fd` for `fiber`
/// (spec §6).
pub fn resume_on_readable_fd(sched: &Arc<Scheduler>, fd: RawFd, fiber: &Arc<Fiber>) -> Result<(), Error> {
    resume_on_fd_events(sched, fd, EventMask::READABLE | EventMask::REMOTE_CLOSE, fiber)
}

/// Arms a oneshot writable wait on `fd` for `fiber` (spec §6).
pub fn resume_on_writable_fd(sched: &Arc<Scheduler>, fd: RawFd, fiber: &Arc<Fiber>) -> Result<(), Error> {
    resume_on_fd_events(sched, fd, EventMask::WRITABLE, fiber)
}
