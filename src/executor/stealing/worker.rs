use crate::executor::PriorityTask;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::Duration;

/// How long an idle worker sleeps before rescanning. Bounded so liveness is
/// restored even if a wake signal is missed.
pub(super) const IDLE_SLEEP: Duration = Duration::from_millis(2);

/// One worker execution context: a FIFO queue owned by its thread, guarded
/// by the worker's own mutex and condition variable. Peers only touch it
/// through [`Worker::post`] and [`Worker::take_one`].
pub(super) struct Worker {
    queue: Mutex<VecDeque<PriorityTask>>,
    cv: Condvar,
}

impl Worker {
    pub(super) fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            cv: Condvar::new(),
        }
    }

    pub(super) fn post(&self, task: PriorityTask) {
        self.queue.lock().push_back(task);
        self.cv.notify_one();
    }

    pub(super) fn take_one(&self) -> Option<PriorityTask> {
        self.queue.lock().pop_front()
    }

    /// Bounded idle wait; cut short by [`Worker::wake_up`].
    pub(super) fn sleep(&self) {
        let mut queue = self.queue.lock();
        if queue.is_empty() {
            self.cv.wait_for(&mut queue, IDLE_SLEEP);
        }
    }

    pub(super) fn wake_up(&self) {
        self.cv.notify_one();
    }
}
