//! Timer queue (spec §4.5): an ordered multiset of `(deadline, callback)`
//! with O(log n) insert and min-extract, backed by a `BinaryHeap`.
//!
//! Timer callbacks must never block; they either enqueue a fiber (via
//! [`crate::fiber::resume_fiber`]) or do nothing. Ties in deadline are
//! broken by insertion order, matching spec §3's Timer entry.

use crate::error::Error;
use crate::fiber::{Fiber, resume_fiber};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::Instant;

type Callback = Box<dyn FnOnce() + Send>;

struct TimerEntry {
    deadline: Instant,
    seq: u64,
    callback: Callback,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}
impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so `BinaryHeap` (a max-heap) behaves as a min-heap on
        // (deadline, seq).
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Priority queue of pending timer callbacks ordered by deadline.
#[derive(Default)]
pub struct TimerQueue {
    heap: BinaryHeap<TimerEntry>,
    next_seq: u64,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a callback to run at `deadline`. O(log n).
    pub fn insert(&mut self, deadline: Instant, callback: impl FnOnce() + Send + 'static) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(TimerEntry {
            deadline,
            seq,
            callback: Box::new(callback),
        });
    }

    /// Deadline of the next timer to fire, if any.
    pub fn peek_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|e| e.deadline)
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Remove and return every callback whose deadline is `<= now`, in
    /// non-decreasing deadline order (ties by insertion order).
    pub fn drain_due(&mut self, now: Instant) -> Vec<Callback> {
        let mut due = Vec::new();
        while let Some(top) = self.heap.peek() {
            if top.deadline > now {
                break;
            }
            let entry = self.heap.pop().expect("peeked entry must pop");
            due.push(entry.callback);
        }
        due
    }
}

/// Resume `fiber` at `deadline` (spec §4.5). `get_thunk` is the claim
/// idiom: it runs when the timer fires and either returns `Some(thunk)`
/// (this operation won the race to resume the fiber) or `None` (some
/// other resumption already claimed it, or it was cancelled). Several
/// timer entries can race for the same fiber by sharing a claim cell
/// that `get_thunk` consults; at most one of them will ever see
/// `Some`.
pub fn resume_on_timer<T, G>(fiber: &Arc<Fiber>, deadline: Instant, get_thunk: G) -> Result<(), Error>
where
    T: Send + 'static,
    G: FnOnce() -> Option<Box<dyn FnOnce() -> T + Send>> + Send + 'static,
{
    let sched = fiber.scheduler().ok_or(Error::InvalidResume)?;
    let fiber = fiber.clone();
    sched.timers().lock().map_err(|_| Error::PoisonedState)?.insert(deadline, move || {
        if let Some(thunk) = get_thunk() {
            let _ = resume_fiber(&fiber, move || thunk());
        }
    });
    Ok(())
}
