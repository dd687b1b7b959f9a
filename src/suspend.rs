//! Suspend/resume boundary (spec §4.7).
//!
//! `suspend_current_fiber` returns a future whose first poll captures
//! the calling fiber's continuation at the point of the `.await`,
//! records it as waiting, and invokes `after_suspend` with the fiber so
//! the caller can register it with a wait source, a timer, or a plain
//! cross-thread handoff. Re-polling after [`crate::fiber::resume_fiber`]
//! has run yields the value `resume_fiber`'s thunk produced.
//!
//! The continuation-barrier check (spec §4.7) happens on that first
//! poll: a `Suspend` future is only valid to poll from inside its
//! fiber's own scheduler's turn loop. Anything else — the future leaking
//! into a foreign executor, or being polled with no current fiber at all
//! — is a [`Error::ContinuationBarrier`].

use crate::error::Error;
use crate::fiber::{Fiber, FiberState, ResumeCell};
use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

enum State<T> {
    Init(Option<Box<dyn FnOnce(Arc<Fiber>) + Send>>),
    Waiting(Arc<ResumeCell>, std::marker::PhantomData<T>),
    Done,
}

/// Future returned by [`suspend_current_fiber`]. See module docs.
pub struct Suspend<T> {
    state: State<T>,
}

impl<T: Send + 'static> Future for Suspend<T> {
    type Output = Result<T, Error>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        loop {
            match std::mem::replace(&mut this.state, State::Done) {
                State::Init(after_suspend) => {
                    let Some(fiber) = crate::scheduler::current_fiber() else {
                        return Poll::Ready(Err(Error::ContinuationBarrier));
                    };
                    let Some(current_sched) = crate::scheduler::current_scheduler() else {
                        return Poll::Ready(Err(Error::ContinuationBarrier));
                    };
                    let owner_matches = fiber
                        .scheduler()
                        .map(|owner| Arc::ptr_eq(&owner, &current_sched))
                        .unwrap_or(false);
                    if !owner_matches {
                        return Poll::Ready(Err(Error::ContinuationBarrier));
                    }

                    let cell = Arc::new(ResumeCell::new());
                    *fiber.pending.lock().unwrap() = Some(cell.clone());
                    fiber.set_state(FiberState::Waiting);

                    let callback = after_suspend.expect("Init state always carries a callback");
                    callback(fiber);

                    this.state = State::Waiting(cell, std::marker::PhantomData);
                    return Poll::Pending;
                }
                State::Waiting(cell, _marker) => {
                    let maybe_value = cell.value.lock().unwrap().take();
                    match maybe_value {
                        Some(boxed) => {
                            let value = downcast::<T>(boxed);
                            return Poll::Ready(Ok(value));
                        }
                        None => {
                            this.state = State::Waiting(cell, std::marker::PhantomData);
                            return Poll::Pending;
                        }
                    }
                }
                State::Done => panic!("Suspend polled after completion"),
            }
        }
    }
}

fn downcast<T: 'static>(boxed: Box<dyn Any + Send>) -> T {
    *boxed
        .downcast::<T>()
        .unwrap_or_else(|_| panic!("resume value type did not match the suspended type"))
}

/// Yield the current fiber (spec §6). `after_suspend(fiber)` runs in the
/// scheduler's dynamic extent right after the continuation is captured;
/// it is expected to register `fiber` with a wait source (§4.4), a timer
/// (§4.5), or hand it to a higher-level synchronization primitive. The
/// returned future resolves to whatever value the matching
/// `resume_fiber` call's thunk produced.
pub fn suspend_current_fiber<T, F>(after_suspend: F) -> Suspend<T>
where
    T: Send + 'static,
    F: FnOnce(Arc<Fiber>) + Send + 'static,
{
    Suspend {
        state: State::Init(Some(Box::new(after_suspend))),
    }
}
