use crate::executor::{DEFAULT_POLL_INTERVAL, DelayQueue, Executor, PriorityTask, TaskGetter};
use anyhow::{Context as _, Result, anyhow};
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

mod worker;
use worker::Worker;

#[cfg(test)]
mod tests;

/// Worker count is clamped to this range.
const MAX_WORKERS: usize = 1000;

/// Work-stealing multithread scheduler.
///
/// Each worker owns a FIFO queue; an idle worker falls back to the global
/// overflow queue, then to stealing from a peer (scanning from a
/// pseudo-random offset so contention is spread rather than concentrated on
/// worker 0), and finally nudges the main loop and sleeps with a short
/// bounded timeout.
///
/// A dedicated main-loop thread, not itself a worker, drains expired timer
/// entries, pulls the harvested proactor batch once per cycle, and fans the
/// resulting units out to randomly chosen workers.
pub struct MultithreadExecutor {
    shared: Arc<Shared>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

struct Shared {
    workers: Vec<Worker>,

    /// Global overflow queue plus the timer min-heap, both guarded by the
    /// executor's single mutex. The main loop waits on `cv` against this
    /// same mutex.
    global: Mutex<GlobalQueues>,
    cv: Condvar,

    stopped: AtomicBool,
    started: AtomicBool,

    /// Maps each worker thread to its index; posts from a worker thread go
    /// to that worker's own queue, posts from anywhere else to the global
    /// overflow queue.
    thread_index: RwLock<HashMap<ThreadId, usize>>,

    getter: RwLock<Option<TaskGetter>>,
}

#[derive(Default)]
struct GlobalQueues {
    ready: VecDeque<PriorityTask>,
    delayed: DelayQueue,
}

impl MultithreadExecutor {
    pub fn new(workers: usize) -> Self {
        let worker_count = workers.clamp(1, MAX_WORKERS);
        Self {
            shared: Arc::new(Shared {
                workers: (0..worker_count).map(|_| Worker::new()).collect(),
                global: Mutex::new(GlobalQueues::default()),
                cv: Condvar::new(),
                stopped: AtomicBool::new(false),
                started: AtomicBool::new(false),
                thread_index: RwLock::new(HashMap::new()),
                getter: RwLock::new(None),
            }),
            threads: Mutex::new(Vec::new()),
        }
    }

    pub fn worker_count(&self) -> usize {
        self.shared.workers.len()
    }
}

impl Executor for MultithreadExecutor {
    fn start(&self) -> Result<()> {
        if self.shared.started.swap(true, Ordering::AcqRel) {
            return Err(anyhow!("executor already started"));
        }

        let worker_count = self.shared.workers.len();
        // Workers + main loop + the caller all meet at the barrier, so
        // `start` returns only once every thread is running.
        let barrier = Arc::new(Barrier::new(worker_count + 2));
        let mut threads = self.threads.lock();

        {
            let shared = self.shared.clone();
            let barrier = barrier.clone();
            threads.push(
                thread::Builder::new()
                    .name("corio-main-loop".into())
                    .spawn(move || {
                        barrier.wait();
                        main_loop(&shared);
                    })
                    .context("failed to spawn main loop thread")?,
            );
        }

        for index in 0..worker_count {
            let shared = self.shared.clone();
            let barrier = barrier.clone();
            threads.push(
                thread::Builder::new()
                    .name(format!("corio-worker-{index}"))
                    .spawn(move || {
                        shared
                            .thread_index
                            .write()
                            .insert(thread::current().id(), index);
                        barrier.wait();
                        worker_loop(&shared, index);
                    })
                    .context("failed to spawn worker thread")?,
            );
        }

        barrier.wait();
        tracing::debug!(workers = worker_count, "multithread executor started");
        Ok(())
    }

    fn stop(&self) {
        if self.shared.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.cv.notify_all();
        for worker in &self.shared.workers {
            worker.wake_up();
        }
        for handle in self.threads.lock().drain(..) {
            let _ = handle.join();
        }
        tracing::debug!("multithread executor stopped");
    }

    fn post(&self, task: PriorityTask) {
        let index = self
            .shared
            .thread_index
            .read()
            .get(&thread::current().id())
            .copied();
        match index {
            // Self-originated follow-up work stays on the posting worker,
            // avoiding cross-thread contention.
            Some(index) => self.shared.workers[index].post(task),
            None => {
                self.shared.global.lock().ready.push_back(task);
                self.shared.cv.notify_one();
            }
        }
    }

    fn post_delay(&self, delay: Duration, task: PriorityTask) {
        self.shared.global.lock().delayed.push(delay, task);
        self.shared.cv.notify_one();
    }

    fn set_task_getter(&self, getter: TaskGetter) {
        *self.shared.getter.write() = Some(getter);
    }

    fn is_current(&self) -> bool {
        self.shared
            .thread_index
            .read()
            .contains_key(&thread::current().id())
    }

    fn wake(&self) {
        self.shared.cv.notify_one();
    }
}

impl Drop for MultithreadExecutor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Timer drain + proactor harvest + fan-out, one cycle per iteration.
fn main_loop(shared: &Shared) {
    while !shared.stopped.load(Ordering::Acquire) {
        let now = Instant::now();
        let (expired, next_deadline) = {
            let mut global = shared.global.lock();
            let expired = global.delayed.pop_expired(now);
            (expired, global.delayed.next_deadline_in(now))
        };

        let harvested = match shared.getter.read().as_ref() {
            Some(getter) => getter(),
            None => Vec::new(),
        };

        if expired.is_empty() && harvested.is_empty() {
            let mut global = shared.global.lock();
            if !shared.stopped.load(Ordering::Acquire) {
                let wait = next_deadline.min(DEFAULT_POLL_INTERVAL);
                shared.cv.wait_for(&mut global, wait);
            }
            continue;
        }

        for task in expired.into_iter().chain(harvested) {
            let index = fastrand::usize(..shared.workers.len());
            shared.workers[index].post(task);
        }
    }
}

fn worker_loop(shared: &Shared, index: usize) {
    while !shared.stopped.load(Ordering::Acquire) {
        let has_job = run_own_job(shared, index) || steal_and_run_job(shared, index);
        if !has_job {
            // Ask the main loop for fresh proactor work, then sleep with a
            // bounded timeout.
            shared.cv.notify_one();
            shared.workers[index].sleep();
        }
    }
}

fn run_own_job(shared: &Shared, index: usize) -> bool {
    match shared.workers[index].take_one() {
        Some(task) => {
            task.run();
            true
        }
        None => false,
    }
}

fn steal_and_run_job(shared: &Shared, index: usize) -> bool {
    // Global overflow queue first.
    let task = shared.global.lock().ready.pop_front();
    if let Some(task) = task {
        task.run();
        return true;
    }

    // Then scan every peer, starting at a pseudo-random offset.
    let count = shared.workers.len();
    let start = fastrand::usize(..count);
    for offset in 0..count {
        let victim = (start + offset) % count;
        if victim == index {
            continue;
        }
        if let Some(task) = shared.workers[victim].take_one() {
            task.run();
            return true;
        }
    }
    false
}
