//! Fiber: a suspended continuation plus its owning scheduler (spec §3).
//!
//! A fiber alternates between `Runnable` (continuation slot non-empty,
//! present in its scheduler's run queue), `Running` (continuation slot
//! empty, currently being polled) and `Waiting` (continuation slot
//! non-empty, reachable only through a wait-source or timer callback
//! that will re-enqueue it). It is present in at most one run queue at
//! a time.
//!
//! Rust has no first-class delimited continuations, so the continuation
//! slot is realized as a boxed `Future<Output = ()>` (spec §9: "a
//! cooperative task abstraction where suspension points are explicit
//! yield operations returning a next-step closure").

use crate::error::Error;
use crate::scheduler::Scheduler;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, Weak};

/// Unique identifier for a fiber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FiberId(u64);

impl FiberId {
    pub(crate) fn from_raw(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for FiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fiber#{}", self.0)
    }
}

/// Observable state of a fiber, for introspection only — the scheduler
/// loop does not branch on this enum, only on continuation-slot
/// presence and run-queue membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FiberState {
    Runnable,
    Running,
    Waiting,
    Terminated,
}

pub(crate) type BoxedFiberFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Cell a pending [`crate::suspend::Suspend`] future parks its resume
/// value in. Exactly one is active per fiber at a time, since a fiber
/// only ever has one outstanding suspension point.
pub(crate) struct ResumeCell {
    pub(crate) value: Mutex<Option<Box<dyn Any + Send>>>,
}

impl ResumeCell {
    pub(crate) fn new() -> Self {
        Self {
            value: Mutex::new(None),
        }
    }
}

pub struct Fiber {
    id: FiberId,
    scheduler: Weak<Scheduler>,
    parent: Mutex<Option<Weak<Fiber>>>,
    children: Mutex<HashMap<FiberId, Weak<Fiber>>>,
    state: Mutex<FiberState>,
    slot: Mutex<Option<BoxedFiberFuture>>,
    pub(crate) pending: Mutex<Option<Arc<ResumeCell>>>,
    name: Mutex<Option<Arc<str>>>,
}

impl fmt::Debug for Fiber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fiber")
            .field("id", &self.id)
            .field("state", &*self.state.lock().unwrap())
            .field("parent", &self.parent())
            .finish()
    }
}

impl Fiber {
    pub fn id(&self) -> FiberId {
        self.id
    }

    /// The fiber that spawned this one via [`spawn_child`], if any and
    /// still alive. `None` both for top-level fibers and for children
    /// whose parent has since terminated (orphaned on parent completion,
    /// see [`Fiber::on_terminated`]).
    pub fn parent(&self) -> Option<FiberId> {
        self.parent
            .lock()
            .unwrap()
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|p| p.id())
    }

    /// Ids of fibers currently spawned as children of this one via
    /// [`spawn_child`] and not yet terminated.
    pub fn children(&self) -> Vec<FiberId> {
        self.children.lock().unwrap().keys().copied().collect()
    }

    pub(crate) fn add_child(&self, child: &Arc<Fiber>) {
        self.children.lock().unwrap().insert(child.id(), Arc::downgrade(child));
    }

    pub(crate) fn remove_child(&self, child_id: FiberId) {
        self.children.lock().unwrap().remove(&child_id);
    }

    /// Cleans up parent/child bookkeeping on fiber termination: removes
    /// this fiber from its parent's children set, and orphans its own
    /// children (their `parent()` becomes `None`), mirroring
    /// `MatrixMike-twine`'s `cleanup_fiber`.
    pub(crate) fn on_terminated(&self) {
        if let Some(parent) = self.parent.lock().unwrap().take().and_then(|p| p.upgrade()) {
            parent.remove_child(self.id);
        }
        let children = std::mem::take(&mut *self.children.lock().unwrap());
        for (_, child) in children {
            if let Some(child) = child.upgrade() {
                *child.parent.lock().unwrap() = None;
            }
        }
    }

    pub fn state(&self) -> FiberState {
        *self.state.lock().unwrap()
    }

    pub fn name(&self) -> Option<Arc<str>> {
        self.name.lock().unwrap().clone()
    }

    pub(crate) fn set_name(&self, name: Arc<str>) {
        *self.name.lock().unwrap() = Some(name);
    }

    pub(crate) fn set_state(&self, state: FiberState) {
        *self.state.lock().unwrap() = state;
    }

    /// The scheduler this fiber is pinned to; `None` once the scheduler
    /// has been dropped.
    pub fn scheduler(&self) -> Option<Arc<Scheduler>> {
        self.scheduler.upgrade()
    }

    pub(crate) fn scheduler_weak(&self) -> &Weak<Scheduler> {
        &self.scheduler
    }

    pub(crate) fn take_slot(&self) -> Option<BoxedFiberFuture> {
        self.slot.lock().unwrap().take()
    }

    pub(crate) fn put_slot(&self, fut: BoxedFiberFuture) {
        *self.slot.lock().unwrap() = Some(fut);
    }

    /// Test/internal constructor for a fiber with no body — used by the
    /// run queue's own unit tests, which only exercise FIFO ordering.
    #[doc(hidden)]
    pub fn new_detached(id: FiberId, scheduler: Weak<Scheduler>) -> Arc<Self> {
        Arc::new(Self {
            id,
            scheduler,
            parent: Mutex::new(None),
            children: Mutex::new(HashMap::new()),
            state: Mutex::new(FiberState::Runnable),
            slot: Mutex::new(Some(Box::pin(async {}))),
            pending: Mutex::new(None),
            name: Mutex::new(None),
        })
    }
}

/// Create a fiber on `sched` running `initial_thunk`, and make it
/// runnable immediately (spec §3: "a fiber is created runnable with an
/// initial closure").
pub fn create_fiber<F, Fut>(sched: &Arc<Scheduler>, initial_thunk: F) -> Arc<Fiber>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    create_fiber_with_parent(sched, None, initial_thunk)
}

/// Create a fiber on `parent`'s scheduler running `initial_thunk`, recorded
/// as one of `parent`'s children until it terminates (or `parent` does).
/// Mirrors `MatrixMike-twine`'s `spawn_fiber(future, parent)`.
pub fn spawn_child<F, Fut>(parent: &Arc<Fiber>, initial_thunk: F) -> Arc<Fiber>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let sched = parent
        .scheduler()
        .expect("a fiber's scheduler outlives the fiber for as long as it can still run");
    create_fiber_with_parent(&sched, Some(parent.clone()), initial_thunk)
}

pub(crate) fn create_fiber_with_parent<F, Fut>(
    sched: &Arc<Scheduler>,
    parent: Option<Arc<Fiber>>,
    initial_thunk: F,
) -> Arc<Fiber>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let id = sched.next_fiber_id();
    let parent_id = parent.as_ref().map(|p| p.id());
    let fiber = Arc::new(Fiber {
        id,
        scheduler: Arc::downgrade(sched),
        parent: Mutex::new(parent.as_ref().map(Arc::downgrade)),
        children: Mutex::new(HashMap::new()),
        state: Mutex::new(FiberState::Runnable),
        slot: Mutex::new(None),
        pending: Mutex::new(None),
        name: Mutex::new(None),
    });
    if let Some(parent) = &parent {
        parent.add_child(&fiber);
    }
    let body: BoxedFiberFuture = Box::pin(async move {
        initial_thunk().await;
    });
    fiber.put_slot(body);
    sched.run_queue().enqueue(fiber.clone());
    tracing::debug!(fiber = %id, parent = ?parent_id, "fiber created");
    fiber
}

/// Currently-executing fiber on this thread, if any (spec §6).
pub fn current_fiber() -> Option<Arc<Fiber>> {
    crate::scheduler::current_fiber()
}

/// The scheduler that owns `fiber` (spec §6).
pub fn fiber_scheduler(fiber: &Fiber) -> Option<Arc<Scheduler>> {
    fiber.scheduler()
}

/// The only cross-thread operation on a fiber (spec §4.6): sets the
/// fiber's continuation slot via its pending resume cell, enqueues it on
/// its owning scheduler's run queue, then wakes that scheduler if the
/// caller is not already running on it.
///
/// `thunk` is invoked eagerly, here, on the calling thread; its result is
/// what the matching [`crate::suspend::suspend_current_fiber`] call
/// returns once the fiber is re-polled. Fails with
/// [`Error::InvalidResume`] if `fiber` is not currently suspended.
pub fn resume_fiber<V>(
    fiber: &Arc<Fiber>,
    thunk: impl FnOnce() -> V + Send + 'static,
) -> Result<(), Error>
where
    V: Send + 'static,
{
    let cell = fiber
        .pending
        .lock()
        .unwrap()
        .take()
        .ok_or(Error::InvalidResume)?;

    let value: Box<dyn Any + Send> = Box::new(thunk());
    *cell.value.lock().unwrap() = Some(value);

    fiber.set_state(FiberState::Runnable);

    let sched = fiber.scheduler().ok_or(Error::InvalidResume)?;
    sched.run_queue().enqueue(fiber.clone());

    let is_current = crate::scheduler::current_scheduler()
        .map(|current| Arc::ptr_eq(&current, &sched))
        .unwrap_or(false);
    if !is_current {
        sched.backend().wake()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedulerConfig;
    use crate::scheduler::{make_scheduler, run_scheduler};
    use crate::suspend::suspend_current_fiber;
    use std::sync::Mutex as StdMutex;

    #[test]
    fn child_unregisters_itself_from_parent_on_completion() {
        let sched = make_scheduler(SchedulerConfig::default()).unwrap();
        let snapshot = Arc::new(StdMutex::new(None));
        let snapshot_clone = snapshot.clone();

        create_fiber(&sched, move || async move {
            let parent = current_fiber().unwrap();
            let child = spawn_child(&parent, || async {});
            assert_eq!(child.parent(), Some(parent.id()));
            assert_eq!(parent.children(), vec![child.id()]);

            // Suspend on a timer due immediately: the freshly spawned child
            // (already on the run queue) gets a turn to run to completion
            // before this fiber is resumed and re-checks its children.
            suspend_current_fiber::<(), _>(move |fiber| {
                crate::timer::resume_on_timer(&fiber, std::time::Instant::now(), || {
                    Some(Box::new(|| ()) as Box<dyn FnOnce() + Send>)
                })
                .unwrap();
            })
            .await
            .unwrap();

            snapshot_clone.lock().unwrap().replace(parent.children());
        });

        run_scheduler(&sched).unwrap();

        let children_after_child_ran = snapshot.lock().unwrap().take().unwrap();
        assert!(children_after_child_ran.is_empty());
    }

    #[test]
    fn on_terminated_orphans_surviving_children() {
        let sched = make_scheduler(SchedulerConfig::default()).unwrap();
        let child_handle = Arc::new(StdMutex::new(None));
        let child_handle_clone = child_handle.clone();

        create_fiber(&sched, move || async move {
            let parent = current_fiber().unwrap();
            // A child that never completes on its own within this turn batch
            // (it suspends and is never resumed) outlives its parent.
            let child = spawn_child(&parent, move || async move {
                suspend_current_fiber::<(), _>(|_fiber| {}).await.ok();
            });
            *child_handle_clone.lock().unwrap() = Some(child);
        });

        run_scheduler(&sched).unwrap();

        let child = child_handle.lock().unwrap().take().unwrap();
        assert_eq!(child.parent(), None, "parent's completion should orphan its still-waiting child");
    }
}
