//! The scheduler (spec §3, §4.1, §4.6, §5): owns one kernel thread's run
//! queue, wait-source table, timer queue, active-fd counter and
//! readiness-backend handle.
//!
//! A scheduler's internal state — timers, wait-sources, active-fd
//! count — is mutated only by its owning thread (the one currently
//! running [`run_scheduler`]); the run queue and the backend's `wake`
//! are the sole shared-write surface (spec §5).

use crate::backend::mio::MioBackend;
use crate::backend::polling::PollingBackend;
use crate::backend::{EventMask, PollTimeout, ReadinessBackend};
use crate::config::{BackendKind, SchedulerConfig};
use crate::error::Error;
use crate::fiber::{Fiber, FiberId, FiberState};
use crate::run_queue::RunQueue;
use crate::timer::TimerQueue;
use crate::wait_source::{self, WaitSourceTable};
use std::cell::RefCell;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

static NEXT_SCHEDULER_ID: AtomicU64 = AtomicU64::new(0);

/// Identity used both as the scheduler's equality key and, conceptually,
/// as the "prompt" the continuation-barrier check compares against
/// (spec §3, §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SchedulerId(u64);

#[derive(Default)]
pub(crate) struct ActiveFdCounter(AtomicUsize);

impl ActiveFdCounter {
    pub(crate) fn increment(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
    pub(crate) fn decrement(&self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
    pub(crate) fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct Scheduler {
    id: SchedulerId,
    config: SchedulerConfig,
    run_queue: RunQueue,
    wait_sources: Mutex<WaitSourceTable>,
    timers: Mutex<TimerQueue>,
    active_fds: ActiveFdCounter,
    backend: Box<dyn ReadinessBackend>,
    owner: Mutex<Option<ThreadId>>,
    next_fiber_id: AtomicU64,
    name: Mutex<Option<Arc<str>>>,
}

thread_local! {
    static CURRENT_SCHEDULER: RefCell<Option<Arc<Scheduler>>> = const { RefCell::new(None) };
    static CURRENT_FIBER: RefCell<Option<Arc<Fiber>>> = const { RefCell::new(None) };
}

impl Scheduler {
    pub(crate) fn run_queue(&self) -> &RunQueue {
        &self.run_queue
    }

    pub(crate) fn wait_sources(&self) -> &Mutex<WaitSourceTable> {
        &self.wait_sources
    }

    pub(crate) fn active_fds(&self) -> &ActiveFdCounter {
        &self.active_fds
    }

    pub(crate) fn backend(&self) -> &dyn ReadinessBackend {
        self.backend.as_ref()
    }

    pub(crate) fn timers(&self) -> &Mutex<TimerQueue> {
        &self.timers
    }

    pub(crate) fn next_fiber_id(&self) -> FiberId {
        FiberId::from_raw(self.next_fiber_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn id(&self) -> SchedulerId {
        self.id
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn name(&self) -> Option<Arc<str>> {
        self.name.lock().unwrap().clone()
    }

    pub(crate) fn set_name(&self, name: Arc<str>) {
        *self.name.lock().unwrap() = Some(name);
    }

    /// Number of fds in the wait-source table whose aggregate mask is
    /// non-nil (spec §8 invariant 3).
    pub fn active_fd_count(&self) -> usize {
        self.active_fds.get()
    }

    /// Which kernel thread currently owns this scheduler, if any (spec
    /// §6).
    pub fn kernel_thread(&self) -> Option<ThreadId> {
        *self.owner.lock().unwrap()
    }
}

/// Build a scheduler from `config` (spec §6: `make_scheduler`).
pub fn make_scheduler(config: SchedulerConfig) -> Result<Arc<Scheduler>, Error> {
    let backend: Box<dyn ReadinessBackend> = match config.backend {
        BackendKind::Polling => Box::new(PollingBackend::new(config.max_events_per_poll)?),
        BackendKind::Mio => Box::new(MioBackend::new(config.max_events_per_poll)?),
    };
    let id = SchedulerId(NEXT_SCHEDULER_ID.fetch_add(1, Ordering::Relaxed));
    let wait_source_capacity = config.wait_source_capacity;
    Ok(Arc::new(Scheduler {
        id,
        config,
        run_queue: RunQueue::new(),
        wait_sources: Mutex::new(WaitSourceTable::with_capacity(wait_source_capacity)),
        timers: Mutex::new(TimerQueue::new()),
        active_fds: ActiveFdCounter::default(),
        backend,
        owner: Mutex::new(None),
        next_fiber_id: AtomicU64::new(0),
        name: Mutex::new(None),
    }))
}

/// Release a scheduler's resources. Equivalent to dropping the last
/// `Arc` — undelivered timers and wait-sources are simply dropped along
/// with it, and the readiness-backend handle is released by `Drop`'d
/// boxed backend implementations as usual.
pub fn destroy_scheduler(sched: Arc<Scheduler>) {
    drop(sched);
}

/// Scoped binding of the current scheduler (spec §5, §6):
/// `with_scheduler(sched, body)` installs `sched` as current on entry
/// and clears the binding on every exit path, including unwinding.
pub fn with_scheduler<R>(sched: &Arc<Scheduler>, body: impl FnOnce() -> R) -> R {
    struct Guard {
        previous: Option<Arc<Scheduler>>,
    }
    impl Drop for Guard {
        fn drop(&mut self) {
            CURRENT_SCHEDULER.with(|c| *c.borrow_mut() = self.previous.take());
        }
    }

    let previous = CURRENT_SCHEDULER.with(|c| c.borrow_mut().replace(sched.clone()));
    let _guard = Guard { previous };
    body()
}

/// Currently bound scheduler on this thread, if any (spec §6).
pub fn current_scheduler() -> Option<Arc<Scheduler>> {
    CURRENT_SCHEDULER.with(|c| c.borrow().clone())
}

/// Which kernel thread owns `sched`, if any (spec §6).
pub fn scheduler_kernel_thread(sched: &Scheduler) -> Option<ThreadId> {
    sched.kernel_thread()
}

pub(crate) fn current_fiber() -> Option<Arc<Fiber>> {
    CURRENT_FIBER.with(|c| c.borrow().clone())
}

fn claim_ownership(sched: &Arc<Scheduler>) -> Result<(), Error> {
    let mut owner = sched.owner.lock().map_err(|_| Error::PoisonedState)?;
    let current = thread::current().id();
    match *owner {
        Some(existing) if existing != current => Err(Error::OwnershipViolation),
        _ => {
            *owner = Some(current);
            Ok(())
        }
    }
}

fn release_ownership(sched: &Arc<Scheduler>) {
    if let Ok(mut owner) = sched.owner.lock() {
        *owner = None;
    }
}

/// Poll timeout computation (spec §4.1): zero if there is runnable work,
/// zero if the scheduler is about to terminate (no timers, no active
/// fds), indefinite if there are active fds but no timers, otherwise the
/// time remaining until the earliest timer deadline.
fn compute_poll_timeout(sched: &Scheduler, now: Instant) -> PollTimeout {
    if !sched.run_queue.is_empty() {
        return PollTimeout::Zero;
    }
    let timers = sched.timers.lock().unwrap();
    match timers.peek_deadline() {
        None => {
            if sched.active_fds.get() == 0 {
                PollTimeout::Zero
            } else {
                PollTimeout::Indefinite
            }
        }
        Some(deadline) => {
            let remaining = deadline.saturating_duration_since(now);
            PollTimeout::Bounded(remaining.max(Duration::ZERO))
        }
    }
}

fn run_due_timers(sched: &Scheduler, now: Instant) {
    let due = sched.timers.lock().unwrap().drain_due(now);
    for callback in due {
        callback();
    }
}

/// Execute `fiber` to its next suspension point (spec §4.7): takes the
/// continuation out of the slot (fiber is now "running"), polls it once,
/// and either marks it terminated (body returned) or puts the
/// continuation back (body suspended, which already recorded the
/// fiber's new wait state via [`crate::suspend::suspend_current_fiber`]'s
/// `after_suspend` callback).
fn run_fiber(sched: &Arc<Scheduler>, fiber: Arc<Fiber>) {
    let Some(mut future) = fiber.take_slot() else {
        // Already running or terminated; a stale run-queue entry can
        // happen if a fiber was enqueued twice. Drop it silently.
        return;
    };
    fiber.set_state(FiberState::Running);

    let waker = Waker::noop();
    let mut cx = Context::from_waker(waker);

    let poll_result = CURRENT_FIBER.with(|cf| {
        *cf.borrow_mut() = Some(fiber.clone());
        let result = future.as_mut().poll(&mut cx);
        *cf.borrow_mut() = None;
        result
    });

    match poll_result {
        Poll::Ready(()) => {
            tracing::debug!(fiber = %fiber.id(), "fiber completed");
            fiber.set_state(FiberState::Terminated);
            fiber.on_terminated();
        }
        Poll::Pending => {
            fiber.put_slot(future);
        }
    }
}

/// Drive `sched` to quiescence (spec §4.1, §6): the run queue, timer
/// queue and active-fd count are all empty.
pub fn run_scheduler(sched: &Arc<Scheduler>) -> Result<(), Error> {
    claim_ownership(sched)?;
    let result = with_scheduler(sched, || run_loop(sched));
    release_ownership(sched);
    result
}

fn run_loop(sched: &Arc<Scheduler>) -> Result<(), Error> {
    loop {
        let now = Instant::now();
        let timeout = compute_poll_timeout(sched, now);
        tracing::trace!(?timeout, "turn start");
        let events = sched.backend.poll(timeout).inspect_err(|err| {
            tracing::warn!(scheduler = ?sched.id, error = %err, "readiness backend failed; scheduler terminating");
        })?;
        for event in events {
            dispatch_readiness(sched, event.fd, event.events);
        }

        run_due_timers(sched, Instant::now());

        let batch = sched.run_queue.drain_all();
        let batch_was_empty = batch.is_empty();
        for fiber in batch {
            run_fiber(sched, fiber);
        }

        if batch_was_empty && sched.active_fds.get() == 0 && sched.timers.lock().unwrap().is_empty()
        {
            tracing::debug!(scheduler = ?sched.id, "scheduler reached quiescence");
            return Ok(());
        }
    }
}

fn dispatch_readiness(sched: &Arc<Scheduler>, fd: RawFd, events: EventMask) {
    wait_source::dispatch_ready(sched, fd, events);
}
