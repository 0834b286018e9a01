use anyhow::Result;
use std::collections::BinaryHeap;
use std::fmt;
use std::time::{Duration, Instant};

pub mod simple;
pub mod stealing;

pub use simple::SimpleExecutor;
pub use stealing::MultithreadExecutor;

/// Closure installed by the [`Context`](crate::Context): invoked once per
/// scheduling cycle to pull the batch of harvested proactor completions.
pub type TaskGetter = Box<dyn Fn() -> Vec<PriorityTask> + Send + Sync>;

/// How long an idle scheduling loop blocks when the timer queue is empty.
pub(crate) const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Priority tag carried by a work unit. Ordering between priorities is a
/// scheduling hint only; no FIFO guarantee holds across worker boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    High,
    Medium,
    Low,
}

/// A priority-tagged deferred callable, the unit of work every scheduler
/// queues and runs.
pub struct PriorityTask {
    priority: Priority,
    func: Box<dyn FnOnce() + Send>,
}

impl PriorityTask {
    pub fn new<F>(priority: Priority, func: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            priority,
            func: Box::new(func),
        }
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Run the work unit to completion, consuming it.
    pub fn run(self) {
        (self.func)();
    }
}

impl fmt::Debug for PriorityTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PriorityTask")
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

/// Work unit with a target execution time on the monotonic clock.
struct DelayedTask {
    run_at: Instant,
    task: PriorityTask,
}

// BinaryHeap is a max-heap; order is inverted on `run_at` so the earliest
// deadline sits on top.
impl PartialEq for DelayedTask {
    fn eq(&self, other: &Self) -> bool {
        self.run_at == other.run_at
    }
}

impl Eq for DelayedTask {}

impl PartialOrd for DelayedTask {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DelayedTask {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other.run_at.cmp(&self.run_at)
    }
}

/// Min-heap of delayed work units, ordered by `run_at` ascending.
#[derive(Default)]
pub(crate) struct DelayQueue {
    heap: BinaryHeap<DelayedTask>,
}

impl DelayQueue {
    pub(crate) fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
        }
    }

    pub(crate) fn push(&mut self, delay: Duration, task: PriorityTask) {
        self.heap.push(DelayedTask {
            run_at: Instant::now() + delay,
            task,
        });
    }

    /// Pop every entry whose deadline has passed, in ascending `run_at`
    /// order. None are returned early.
    pub(crate) fn pop_expired(&mut self, now: Instant) -> Vec<PriorityTask> {
        let mut expired = Vec::new();
        while self.heap.peek().is_some_and(|head| head.run_at <= now) {
            if let Some(delayed) = self.heap.pop() {
                expired.push(delayed.task);
            }
        }
        expired
    }

    /// Time until the next deadline, or the default poll interval when the
    /// queue is empty.
    pub(crate) fn next_deadline_in(&self, now: Instant) -> Duration {
        match self.heap.peek() {
            Some(head) => head.run_at.saturating_duration_since(now),
            None => DEFAULT_POLL_INTERVAL,
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

/// Scheduler contract shared by the single-thread and work-stealing variants.
///
/// Executors are shared as `Arc<dyn Executor>`: routine wakers, timer
/// closures and the [`Context`](crate::Context) all hold handles. The only
/// ordering guarantee is that posted work is eventually run.
pub trait Executor: Send + Sync {
    /// Spin up the scheduling thread(s). Returns once the loop is running.
    fn start(&self) -> Result<()>;

    /// Set the stop flag, wake every thread and join them. In-flight work
    /// units finish; no new cycle begins. Idempotent.
    fn stop(&self);

    /// Queue a work unit for execution as soon as possible.
    fn post(&self, task: PriorityTask);

    /// Queue a work unit to run no earlier than `delay` from now.
    fn post_delay(&self, delay: Duration, task: PriorityTask);

    /// Install the proactor-harvest hook, called once per scheduling cycle.
    fn set_task_getter(&self, getter: TaskGetter);

    /// True iff the calling thread is one of this executor's threads.
    fn is_current(&self) -> bool;

    /// Nudge the scheduling loop out of its bounded wait, e.g. because a
    /// proactor queued fresh completions.
    fn wake(&self);
}
