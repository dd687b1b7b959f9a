//! twine-fibers: the core of a cooperative, event-driven user-space
//! threading library.
//!
//! A fiber is a lightweight thread of control whose execution is
//! suspended and resumed by a [`Scheduler`] in response to three kinds
//! of events: file descriptor readiness, timer expiry, and explicit
//! wake-ups from other fibers (possibly on other kernel threads).
//!
//! This crate is deliberately narrow. It ships the scheduler loop, the
//! run queue, the timer queue, the wait-source table, and the
//! suspend/resume boundary — the pieces spec'd as the hard part.
//! Higher-level synchronization (channels, select), I/O convenience
//! wrappers, and a spawn-level public API are external collaborators
//! built on top of the contracts here, not part of this crate.
//!
//! ```no_run
//! use twine_fibers::{config::SchedulerConfig, scheduler, fiber, suspend};
//!
//! let sched = scheduler::make_scheduler(SchedulerConfig::default()).unwrap();
//! fiber::create_fiber(&sched, || async {
//!     println!("hello from a fiber");
//! });
//! scheduler::run_scheduler(&sched).unwrap();
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod fiber;
pub mod registry;
pub mod run_queue;
pub mod scheduler;
pub mod suspend;
pub mod timer;
pub mod wait_source;

pub use backend::{EventMask, PollTimeout, ReadinessBackend, ReadinessEvent};
pub use config::{BackendKind, SchedulerConfig};
pub use error::{Error, Result};
pub use fiber::{
    Fiber, FiberId, FiberState, create_fiber, current_fiber, fiber_scheduler, resume_fiber, spawn_child,
};
pub use scheduler::{
    Scheduler, SchedulerId, current_scheduler, destroy_scheduler, make_scheduler, run_scheduler,
    scheduler_kernel_thread, with_scheduler,
};
pub use suspend::{Suspend, suspend_current_fiber};
pub use timer::resume_on_timer;
pub use wait_source::{resume_on_readable_fd, resume_on_writable_fd};
