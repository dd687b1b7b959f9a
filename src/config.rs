//! Scheduler configuration.
//!
//! A `Scheduler` is an embeddable library object, not a service, so there
//! is no external config file format: `SchedulerConfig` is a plain struct
//! passed to [`crate::make_scheduler`], builder-style.

/// Which concrete [`crate::backend::ReadinessBackend`] a scheduler should
/// construct for itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// The `polling` crate — the reactor underneath `async-io`/`smol`.
    /// Has native per-platform oneshot semantics, making it the more
    /// direct translation of the abstract contract; the default.
    Polling,
    /// Native `mio`. Oneshot is emulated by deregistering after each
    /// delivery (mio exposes no oneshot flag on its epoll backend).
    Mio,
}

impl Default for BackendKind {
    fn default() -> Self {
        BackendKind::Polling
    }
}

/// Construction-time configuration for a [`crate::Scheduler`].
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Prefix used when naming the kernel thread a scheduler is pinned to
    /// (for diagnostics; the scheduler does not spawn the thread itself).
    pub thread_name_prefix: String,
    /// Initial capacity reserved in the wait-source table.
    pub wait_source_capacity: usize,
    /// Which readiness backend to construct.
    pub backend: BackendKind,
    /// Upper bound on events drained from the backend in a single turn.
    pub max_events_per_poll: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            thread_name_prefix: "twine-fiber".to_string(),
            wait_source_capacity: 64,
            backend: BackendKind::default(),
            max_events_per_poll: 256,
        }
    }
}

impl SchedulerConfig {
    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    pub fn with_wait_source_capacity(mut self, capacity: usize) -> Self {
        self.wait_source_capacity = capacity;
        self
    }

    pub fn with_max_events_per_poll(mut self, max: usize) -> Self {
        self.max_events_per_poll = max;
        self
    }
}
