//! FIFO run queue (spec §4.3): `enqueue` and `drain_all`, safe against
//! concurrent `enqueue` from remote threads. Backed by
//! `crossbeam_queue::SegQueue`, the lock-free Michael–Scott-style queue
//! spec §4.3 names directly as satisfying the contract.

use crate::fiber::Fiber;
use crossbeam_queue::SegQueue;
use std::sync::Arc;

#[derive(Default)]
pub struct RunQueue {
    queue: SegQueue<Arc<Fiber>>,
}

impl RunQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, fiber: Arc<Fiber>) {
        self.queue.push(fiber);
    }

    /// Atomically (from the consumer's point of view) take everything
    /// currently in the queue as a local batch, leaving the queue empty
    /// for fibers woken during this turn's execution.
    ///
    /// `SegQueue` has no single "swap the whole structure" primitive, but
    /// repeated `pop` until empty is linearizable against concurrent
    /// `push`: anything pushed after the last successful pop here simply
    /// stays queued for the next turn, which is exactly the semantics
    /// the turn loop needs.
    pub fn drain_all(&self) -> Vec<Arc<Fiber>> {
        let mut batch = Vec::new();
        while let Some(fiber) = self.queue.pop() {
            batch.push(fiber);
        }
        batch
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
