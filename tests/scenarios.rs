//! End-to-end scenarios from spec §8 (S1-S6), exercised over real pipes,
//! sockets and kernel threads.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::os::unix::io::AsRawFd;
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use twine_fibers::backend::EventMask;
use twine_fibers::config::SchedulerConfig;
use twine_fibers::fiber::{create_fiber, resume_fiber};
use twine_fibers::scheduler::{make_scheduler, run_scheduler};
use twine_fibers::suspend::suspend_current_fiber;
use twine_fibers::timer::resume_on_timer;
use twine_fibers::wait_source::{resume_on_readable_fd, resume_on_writable_fd};

fn run_to_quiescence(sched: &Arc<twine_fibers::Scheduler>) {
    run_scheduler(sched).expect("scheduler loop should not error");
}

/// S1: pipe readability wakes exactly one resumption, carrying the
/// reported event mask.
#[test]
fn s1_pipe_readability() {
    let sched = make_scheduler(SchedulerConfig::default()).unwrap();
    let (mut writer, reader) = UnixStream::pair().unwrap();
    reader.set_nonblocking(true).unwrap();
    let fd = reader.as_raw_fd();

    let observed = Arc::new(Mutex::new(None));
    let observed_clone = observed.clone();
    let sched_for_fiber = sched.clone();

    create_fiber(&sched, move || {
        let sched = sched_for_fiber;
        async move {
            let mask = suspend_current_fiber::<EventMask, _>(move |fiber| {
                resume_on_readable_fd(&sched, fd, &fiber).unwrap();
            })
            .await
            .unwrap();
            *observed_clone.lock().unwrap() = Some(mask);
        }
    });

    writer.write_all(b"x").unwrap();

    run_to_quiescence(&sched);

    let mask = observed.lock().unwrap().expect("fiber should have resumed");
    assert!(mask.contains(EventMask::READABLE));

    let mut buf = [0u8; 1];
    assert_eq!(reader.read(&mut buf).unwrap(), 1);
    assert_eq!(&buf, b"x");
}

/// S2: a writer blocked on a full pipe resumes once the reader drains it.
#[test]
fn s2_pipe_writability_after_drain() {
    let sched = make_scheduler(SchedulerConfig::default()).unwrap();
    let (writer, mut reader) = UnixStream::pair().unwrap();
    writer.set_nonblocking(true).unwrap();
    let fd = writer.as_raw_fd();

    // Fill the send buffer until it would block.
    let chunk = vec![0u8; 4096];
    loop {
        match (&writer).write(&chunk) {
            Ok(0) => break,
            Ok(_) => continue,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
            Err(e) => panic!("unexpected write error: {e}"),
        }
    }

    let resumed = Arc::new(AtomicBool::new(false));
    let resumed_clone = resumed.clone();
    let sched_for_fiber = sched.clone();

    create_fiber(&sched, move || {
        let sched = sched_for_fiber;
        async move {
            let mask = suspend_current_fiber::<EventMask, _>(move |fiber| {
                resume_on_writable_fd(&sched, fd, &fiber).unwrap();
            })
            .await
            .unwrap();
            assert!(mask.contains(EventMask::WRITABLE));
            resumed_clone.store(true, Ordering::SeqCst);
        }
    });

    // Drain the read end on another thread shortly after the scheduler
    // starts polling, so the writable wait genuinely blocks first.
    let drain_handle = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(20));
        let mut buf = vec![0u8; 1 << 20];
        loop {
            match reader.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(_) => continue,
            }
        }
    });

    run_to_quiescence(&sched);
    drain_handle.join().unwrap();

    assert!(resumed.load(Ordering::SeqCst));
}

/// S3: three timers at 30ms/10ms/20ms fire in deadline order (10, 20, 30).
#[test]
fn s3_timer_ordering() {
    let sched = make_scheduler(SchedulerConfig::default()).unwrap();
    let order = Arc::new(Mutex::new(Vec::new()));
    let now = Instant::now();

    for (delay_ms, label) in [(30u64, 30), (10, 10), (20, 20)] {
        let order = order.clone();
        create_fiber(&sched, move || async move {
            suspend_current_fiber::<(), _>(move |fiber| {
                let deadline = now + Duration::from_millis(delay_ms);
                resume_on_timer(&fiber, deadline, move || {
                    Some(Box::new(move || ()) as Box<dyn FnOnce() + Send>)
                })
                .unwrap();
            })
            .await
            .unwrap();
            order.lock().unwrap().push(label);
        });
    }

    run_to_quiescence(&sched);

    assert_eq!(*order.lock().unwrap(), vec![10, 20, 30]);
}

/// S4: two timers race for the same fiber via a shared claim cell;
/// exactly one resumption occurs.
#[test]
fn s4_timer_race_via_get_thunk() {
    let sched = make_scheduler(SchedulerConfig::default()).unwrap();
    let resumption_count = Arc::new(AtomicU32::new(0));
    let claim: Arc<Mutex<Option<()>>> = Arc::new(Mutex::new(Some(())));
    let now = Instant::now();

    let count_clone = resumption_count.clone();
    create_fiber(&sched, move || async move {
        suspend_current_fiber::<(), _>(move |fiber| {
            for delay_ms in [5u64, 5u64] {
                let claim = claim.clone();
                let fiber = fiber.clone();
                let deadline = now + Duration::from_millis(delay_ms);
                resume_on_timer(&fiber, deadline, move || {
                    claim
                        .lock()
                        .unwrap()
                        .take()
                        .map(|()| Box::new(move || ()) as Box<dyn FnOnce() + Send>)
                })
                .unwrap();
            }
        })
        .await
        .unwrap();
        count_clone.fetch_add(1, Ordering::SeqCst);
    });

    run_to_quiescence(&sched);

    assert_eq!(resumption_count.load(Ordering::SeqCst), 1);
}

/// S5: scheduler A on thread TA wakes a fiber suspended with no wake
/// source on scheduler B, which is blocked in `poll` on thread TB.
#[test]
fn s5_cross_scheduler_wake() {
    let sched_a = make_scheduler(SchedulerConfig::default()).unwrap();
    let sched_b = make_scheduler(SchedulerConfig::default()).unwrap();

    let resumed_value = Arc::new(Mutex::new(None));
    let resumed_value_clone = resumed_value.clone();
    let fiber_handle = Arc::new(Mutex::new(None));
    let fiber_handle_clone = fiber_handle.clone();

    create_fiber(&sched_b, move || async move {
        let value = suspend_current_fiber::<u32, _>(move |fiber| {
            *fiber_handle_clone.lock().unwrap() = Some(fiber);
        })
        .await
        .unwrap();
        *resumed_value_clone.lock().unwrap() = Some(value);
    });

    let sched_b_for_thread = sched_b.clone();
    let thread_b = std::thread::spawn(move || {
        run_scheduler(&sched_b_for_thread).unwrap();
    });

    // Give B's loop time to reach `poll` with no active fds/timers before
    // A resumes the fiber from outside.
    std::thread::sleep(Duration::from_millis(50));

    let fiber = loop {
        if let Some(f) = fiber_handle.lock().unwrap().clone() {
            break f;
        }
        std::thread::sleep(Duration::from_millis(1));
    };

    let sched_a_for_thread = sched_a.clone();
    std::thread::spawn(move || {
        let _ = &sched_a_for_thread;
        resume_fiber(&fiber, || 42u32).unwrap();
    })
    .join()
    .unwrap();

    thread_b.join().unwrap();

    assert_eq!(*resumed_value.lock().unwrap(), Some(42));
}

/// S6: a listening socket with no pending connection blocks until a peer
/// connects, then the accepted socket is obtainable.
#[test]
fn s6_accept_readiness() {
    let sched = make_scheduler(SchedulerConfig::default()).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.set_nonblocking(true).unwrap();
    let addr = listener.local_addr().unwrap();
    let fd = listener.as_raw_fd();

    let accepted = Arc::new(Mutex::new(false));
    let accepted_clone = accepted.clone();
    let sched_for_fiber = sched.clone();

    create_fiber(&sched, move || {
        let sched = sched_for_fiber;
        async move {
            suspend_current_fiber::<EventMask, _>(move |fiber| {
                resume_on_readable_fd(&sched, fd, &fiber).unwrap();
            })
            .await
            .unwrap();
            match listener.accept() {
                Ok(_) => *accepted_clone.lock().unwrap() = true,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(e) => panic!("accept failed: {e}"),
            }
        }
    });

    std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(20));
        let _ = TcpStream::connect(addr);
    });

    run_to_quiescence(&sched);

    assert!(*accepted.lock().unwrap());
}
