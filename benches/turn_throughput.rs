//! Turn-loop throughput benchmarks: spawn-N-fibers-and-drain and raw
//! run-queue push/pop, the two costs spec §8's "scheduler overhead per
//! turn" property bears on.

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use twine_fibers::config::SchedulerConfig;
use twine_fibers::fiber::create_fiber;
use twine_fibers::run_queue::RunQueue;
use twine_fibers::scheduler::{make_scheduler, run_scheduler};

fn bench_spawn_and_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("spawn_and_drain");
    for fiber_count in [10usize, 100, 1_000] {
        group.bench_function(format!("{fiber_count}_fibers"), |b| {
            b.iter(|| {
                let sched = make_scheduler(SchedulerConfig::default()).unwrap();
                for _ in 0..fiber_count {
                    create_fiber(&sched, || async {});
                }
                run_scheduler(black_box(&sched)).unwrap();
            });
        });
    }
    group.finish();
}

fn bench_run_queue_push_pop(c: &mut Criterion) {
    c.bench_function("run_queue_enqueue_drain_1000", |b| {
        b.iter(|| {
            let rq = RunQueue::new();
            for fiber in black_box(test_fibers(1_000)) {
                rq.enqueue(fiber);
            }
            black_box(rq.drain_all());
        });
    });
}

fn test_fibers(n: u64) -> Vec<std::sync::Arc<twine_fibers::Fiber>> {
    use twine_fibers::fiber::{Fiber, FiberId};
    (0..n)
        .map(|id| Fiber::new_detached(FiberId::from_raw(id), std::sync::Weak::new()))
        .collect()
}

criterion_group!(benches, bench_spawn_and_drain, bench_run_queue_push_pop);
criterion_main!(benches);
