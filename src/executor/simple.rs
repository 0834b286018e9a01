use crate::executor::{DEFAULT_POLL_INTERVAL, DelayQueue, Executor, PriorityTask, TaskGetter};
use anyhow::{Context as _, Result, anyhow};
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

/// Single-thread scheduler. One loop thread repeatedly pulls harvested
/// proactor work, runs timer-expired work, drains the immediate queue, and
/// blocks with a bounded wait when nothing is ready.
pub struct SimpleExecutor {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

struct Shared {
    queues: Mutex<Queues>,
    cv: Condvar,
    stopped: AtomicBool,
    /// Thread id of the loop thread, set once at startup.
    loop_thread: RwLock<Option<ThreadId>>,
    getter: RwLock<Option<TaskGetter>>,
}

#[derive(Default)]
struct Queues {
    ready: VecDeque<PriorityTask>,
    delayed: DelayQueue,
}

impl SimpleExecutor {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                queues: Mutex::new(Queues::default()),
                cv: Condvar::new(),
                stopped: AtomicBool::new(false),
                loop_thread: RwLock::new(None),
                getter: RwLock::new(None),
            }),
            thread: Mutex::new(None),
        }
    }
}

impl Default for SimpleExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor for SimpleExecutor {
    fn start(&self) -> Result<()> {
        let mut slot = self.thread.lock();
        if slot.is_some() {
            return Err(anyhow!("executor already started"));
        }

        let shared = self.shared.clone();
        let handle = thread::Builder::new()
            .name("corio-simple".into())
            .spawn(move || {
                *shared.loop_thread.write() = Some(thread::current().id());
                tracing::debug!("simple executor loop running");
                run_loop(&shared);
            })
            .context("failed to spawn executor thread")?;

        *slot = Some(handle);
        Ok(())
    }

    fn stop(&self) {
        if self.shared.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.cv.notify_all();
        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }
        tracing::debug!("simple executor stopped");
    }

    fn post(&self, task: PriorityTask) {
        self.shared.queues.lock().ready.push_back(task);
        self.shared.cv.notify_all();
    }

    fn post_delay(&self, delay: Duration, task: PriorityTask) {
        self.shared.queues.lock().delayed.push(delay, task);
        self.shared.cv.notify_all();
    }

    fn set_task_getter(&self, getter: TaskGetter) {
        *self.shared.getter.write() = Some(getter);
    }

    fn is_current(&self) -> bool {
        *self.shared.loop_thread.read() == Some(thread::current().id())
    }

    fn wake(&self) {
        self.shared.cv.notify_all();
    }
}

fn run_loop(shared: &Shared) {
    while !shared.stopped.load(Ordering::Acquire) {
        let mut ran = false;

        // (a) Harvested proactor completions.
        if let Some(getter) = shared.getter.read().as_ref() {
            for task in getter() {
                task.run();
                ran = true;
            }
        }

        // (b) Timer-expired work.
        let now = Instant::now();
        let (expired, next_deadline) = {
            let mut queues = shared.queues.lock();
            let expired = queues.delayed.pop_expired(now);
            (expired, queues.delayed.next_deadline_in(now))
        };
        for task in expired {
            task.run();
            ran = true;
        }

        // (c) Queued immediate work. Snapshot the queue so work posted from
        // within a running unit lands in the next cycle.
        let batch = std::mem::take(&mut shared.queues.lock().ready);
        for task in batch {
            task.run();
            ran = true;
        }

        // (d) Nothing ready: block until new work arrives or the nearest
        // deadline (bounded, so a missed notify never stalls the loop).
        if !ran {
            let mut queues = shared.queues.lock();
            if queues.ready.is_empty() && !shared.stopped.load(Ordering::Acquire) {
                let wait = next_deadline.min(DEFAULT_POLL_INTERVAL);
                shared.cv.wait_for(&mut queues, wait);
            }
        }
    }
}

impl Drop for SimpleExecutor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::Priority;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;

    fn started() -> SimpleExecutor {
        let executor = SimpleExecutor::new();
        executor.start().expect("start simple executor");
        executor
    }

    #[test]
    fn test_posted_work_runs() {
        let executor = started();
        let (tx, rx) = mpsc::channel();
        executor.post(PriorityTask::new(Priority::Medium, move || {
            tx.send(42).ok();
        }));
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)), Ok(42));
        executor.stop();
    }

    #[test]
    fn test_work_posted_before_start_runs_after_start() {
        let executor = SimpleExecutor::new();
        let (tx, rx) = mpsc::channel();
        executor.post(PriorityTask::new(Priority::Medium, move || {
            tx.send(()).ok();
        }));
        executor.start().expect("start");
        assert!(rx.recv_timeout(Duration::from_secs(1)).is_ok());
    }

    #[test]
    fn test_delayed_work_respects_deadline() {
        let executor = started();
        let (tx, rx) = mpsc::channel();
        let posted_at = Instant::now();
        executor.post_delay(
            Duration::from_millis(50),
            PriorityTask::new(Priority::Medium, move || {
                tx.send(Instant::now()).ok();
            }),
        );
        let ran_at = rx.recv_timeout(Duration::from_secs(1)).expect("timer ran");
        assert!(ran_at.duration_since(posted_at) >= Duration::from_millis(50));
        executor.stop();
    }

    #[test]
    fn test_is_current_only_on_loop_thread() {
        let executor = Arc::new(started());
        assert!(!executor.is_current());

        let (tx, rx) = mpsc::channel();
        let inner = executor.clone();
        executor.post(PriorityTask::new(Priority::Medium, move || {
            tx.send(inner.is_current()).ok();
        }));
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)), Ok(true));
    }

    #[test]
    fn test_stop_is_idempotent_and_joins() {
        let executor = started();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..16 {
            let counter = counter.clone();
            executor.post(PriorityTask::new(Priority::Medium, move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }
        executor.stop();
        executor.stop();
    }
}
