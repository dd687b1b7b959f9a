//! Process-wide name registries for schedulers and fibers (spec §9):
//! "Implement as a process-wide registry with init/teardown rules tied
//! to scheduler/fiber lifetime; use weak references so names do not keep
//! fibers alive."
//!
//! Dead entries are swept lazily whenever the registry is iterated; a
//! name is never removed explicitly, since the whole point is that it
//! doesn't keep anything alive.

use crate::fiber::Fiber;
use crate::scheduler::Scheduler;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, Weak};

fn schedulers() -> &'static Mutex<HashMap<Arc<str>, Weak<Scheduler>>> {
    static MAP: OnceLock<Mutex<HashMap<Arc<str>, Weak<Scheduler>>>> = OnceLock::new();
    MAP.get_or_init(Default::default)
}

fn fibers() -> &'static Mutex<HashMap<Arc<str>, Weak<Fiber>>> {
    static MAP: OnceLock<Mutex<HashMap<Arc<str>, Weak<Fiber>>>> = OnceLock::new();
    MAP.get_or_init(Default::default)
}

/// Give `sched` a process-wide name for introspection.
pub fn register_scheduler(name: impl Into<Arc<str>>, sched: &Arc<Scheduler>) {
    let name = name.into();
    sched.set_name(name.clone());
    schedulers().lock().unwrap().insert(name, Arc::downgrade(sched));
}

/// Give `fiber` a process-wide name for introspection.
pub fn register_fiber(name: impl Into<Arc<str>>, fiber: &Arc<Fiber>) {
    let name = name.into();
    fiber.set_name(name.clone());
    fibers().lock().unwrap().insert(name, Arc::downgrade(fiber));
}

/// Look up a live scheduler by name.
pub fn lookup_scheduler(name: &str) -> Option<Arc<Scheduler>> {
    schedulers().lock().unwrap().get(name).and_then(Weak::upgrade)
}

/// Look up a live fiber by name.
pub fn lookup_fiber(name: &str) -> Option<Arc<Fiber>> {
    fibers().lock().unwrap().get(name).and_then(Weak::upgrade)
}

/// Every currently-live named scheduler.
pub fn live_schedulers() -> Vec<Arc<Scheduler>> {
    let mut map = schedulers().lock().unwrap();
    map.retain(|_, weak| weak.strong_count() > 0);
    map.values().filter_map(Weak::upgrade).collect()
}

/// Every currently-live named fiber.
pub fn live_fibers() -> Vec<Arc<Fiber>> {
    let mut map = fibers().lock().unwrap();
    map.retain(|_, weak| weak.strong_count() > 0);
    map.values().filter_map(Weak::upgrade).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedulerConfig;
    use crate::scheduler::make_scheduler;

    #[test]
    fn registered_scheduler_is_found_by_name_and_dropped_when_unreferenced() {
        let sched = make_scheduler(SchedulerConfig::default()).unwrap();
        register_scheduler("registry-test-scheduler", &sched);
        assert!(lookup_scheduler("registry-test-scheduler").is_some());

        drop(sched);
        assert!(lookup_scheduler("registry-test-scheduler").is_none());
    }
}
