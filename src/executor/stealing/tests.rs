use super::*;
use crate::executor::Priority;
use parking_lot::Mutex as PlMutex;
use std::collections::HashSet;
use std::sync::mpsc;

fn started(workers: usize) -> MultithreadExecutor {
    let executor = MultithreadExecutor::new(workers);
    executor.start().expect("start multithread executor");
    executor
}

#[test]
fn test_worker_count_is_clamped() {
    assert_eq!(MultithreadExecutor::new(0).worker_count(), 1);
    assert_eq!(MultithreadExecutor::new(4).worker_count(), 4);
    assert_eq!(MultithreadExecutor::new(1_000_000).worker_count(), MAX_WORKERS);
}

#[test]
fn test_post_from_outside_lands_in_global_queue_and_runs() {
    let executor = started(2);
    let (tx, rx) = mpsc::channel();
    assert!(!executor.is_current());
    executor.post(PriorityTask::new(Priority::Medium, move || {
        tx.send(()).ok();
    }));
    assert!(rx.recv_timeout(Duration::from_secs(1)).is_ok());
    executor.stop();
}

#[test]
fn test_post_from_worker_goes_to_own_queue() {
    let executor = Arc::new(started(2));
    let (tx, rx) = mpsc::channel();

    let inner = executor.clone();
    executor.post(PriorityTask::new(Priority::Medium, move || {
        let first_thread = thread::current().id();
        // Posting from inside a worker thread: the follow-up unit goes to
        // this worker's own queue and runs on the same thread.
        let tx = tx.clone();
        inner.post(PriorityTask::new(Priority::Medium, move || {
            tx.send((first_thread, thread::current().id())).ok();
        }));
    }));

    let (first, second) = rx.recv_timeout(Duration::from_secs(1)).expect("follow-up ran");
    assert_eq!(first, second);
    executor.stop();
}

#[test]
fn test_stealing_distributes_seeded_work() {
    let executor = Arc::new(started(4));
    const UNITS: usize = 64;

    let done = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let threads: Arc<PlMutex<HashSet<ThreadId>>> = Arc::new(PlMutex::new(HashSet::new()));
    let (tx, rx) = mpsc::channel();

    // Seed every unit from inside a single worker so they all land on that
    // worker's own queue; the other three workers start idle.
    let inner = executor.clone();
    let seed_done = done.clone();
    let seed_threads = threads.clone();
    executor.post(PriorityTask::new(Priority::Medium, move || {
        for _ in 0..UNITS {
            let done = seed_done.clone();
            let threads = seed_threads.clone();
            let tx = tx.clone();
            inner.post(PriorityTask::new(Priority::Medium, move || {
                threads.lock().insert(thread::current().id());
                thread::sleep(Duration::from_millis(2));
                if done.fetch_add(1, Ordering::SeqCst) + 1 == UNITS {
                    tx.send(()).ok();
                }
            }));
        }
    }));

    rx.recv_timeout(Duration::from_secs(10)).expect("all units ran");

    // Every unit ran exactly once...
    assert_eq!(done.load(Ordering::SeqCst), UNITS);
    // ...and idle peers stole a share instead of sitting out.
    assert!(
        threads.lock().len() >= 2,
        "expected at least two workers to participate, got {:?}",
        threads.lock().len()
    );
    executor.stop();
}

#[test]
fn test_delayed_units_run_in_deadline_order_and_not_early() {
    let executor = started(2);
    let order = Arc::new(PlMutex::new(Vec::new()));
    let (tx, rx) = mpsc::channel();
    let posted_at = Instant::now();

    for (tag, ms) in [(3u32, 90u64), (1, 30), (2, 60)] {
        let order = order.clone();
        let tx = tx.clone();
        executor.post_delay(
            Duration::from_millis(ms),
            PriorityTask::new(Priority::Medium, move || {
                let mut order = order.lock();
                order.push((tag, Instant::now()));
                if order.len() == 3 {
                    tx.send(()).ok();
                }
            }),
        );
    }

    rx.recv_timeout(Duration::from_secs(5)).expect("timers ran");
    let order = order.lock();
    let tags: Vec<u32> = order.iter().map(|(tag, _)| *tag).collect();
    assert_eq!(tags, vec![1, 2, 3]);
    for (tag, ran_at) in order.iter() {
        let deadline = Duration::from_millis(*tag as u64 * 30);
        assert!(ran_at.duration_since(posted_at) >= deadline);
    }
    executor.stop();
}

#[test]
fn test_shutdown_with_pending_work_joins_all_threads() {
    let executor = started(3);

    // Pending units in the global overflow queue and in worker queues;
    // a few of them long enough to still be in flight at stop time.
    for _ in 0..32 {
        executor.post(PriorityTask::new(Priority::Medium, || {
            thread::sleep(Duration::from_millis(1));
        }));
    }
    executor.post_delay(
        Duration::from_secs(60),
        PriorityTask::new(Priority::Medium, || {}),
    );

    // Must not deadlock: every worker and the main loop terminate and join.
    executor.stop();
    assert!(executor.threads.lock().is_empty());

    // A second stop is a no-op.
    executor.stop();
}

#[test]
fn test_harvest_hook_is_polled_by_main_loop() {
    let executor = started(2);
    let (tx, rx) = mpsc::channel();
    let fired = Arc::new(AtomicBool::new(false));

    let hook_fired = fired.clone();
    executor.set_task_getter(Box::new(move || {
        if !hook_fired.swap(true, Ordering::SeqCst) {
            let tx = tx.clone();
            vec![PriorityTask::new(Priority::Medium, move || {
                tx.send(()).ok();
            })]
        } else {
            Vec::new()
        }
    }));
    executor.wake();

    assert!(rx.recv_timeout(Duration::from_secs(1)).is_ok());
    executor.stop();
}
