use crate::executor::{Executor, Priority, PriorityTask};
use crate::future::{Expire, RunOn, Sleep, SwitchTo, YieldNow};
use futures::task::{ArcWake, waker_ref};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

type BoxRoutine = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

static NEXT_ROUTINE_ID: AtomicU64 = AtomicU64::new(1);

/// Explicit per-routine handle passed into every coroutine entry point.
///
/// Replaces any implicit "current executor" lookup: suspension helpers that
/// need a scheduler reach it through the handle they were given.
#[derive(Clone)]
pub struct Co {
    core: Arc<RoutineCore>,
}

impl Co {
    /// The executor this routine currently resumes on.
    pub fn executor(&self) -> Arc<dyn Executor> {
        self.core.executor()
    }

    /// Suspend for at least `duration`.
    pub fn sleep_for(&self, duration: Duration) -> Sleep {
        Sleep::new(self.executor(), duration)
    }

    /// Reschedule after one trip through the queue.
    pub fn yield_now(&self) -> YieldNow {
        YieldNow::new()
    }

    /// Move subsequent execution of this routine onto `target`'s queues.
    pub fn switch_to(&self, target: &Arc<dyn Executor>) -> SwitchTo {
        SwitchTo::new(self.core.clone(), target.clone())
    }

    /// Run `func` on `target`, resuming back on this routine's own executor
    /// with the result.
    pub fn run_on<R, F>(&self, target: &Arc<dyn Executor>, func: F) -> RunOn<R>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        RunOn::new(target.clone(), func)
    }

    /// Race `fut` against a deadline; `None` means the deadline won. The
    /// loser has no externally observable effect.
    pub fn run_with<F: Future>(&self, timeout: Duration, fut: F) -> Expire<F> {
        Expire::new(self.executor(), timeout, fut)
    }
}

/// Harness for one fire-and-forget coroutine.
///
/// Owns the boxed future and the executor handle it resumes on. Waking posts
/// a medium-priority poll unit to the *current* executor handle, which is
/// what makes [`Co::switch_to`] a true migration: after the handle is
/// swapped, every later resumption lands on the target executor.
pub(crate) struct RoutineCore {
    id: u64,
    future: Mutex<Option<BoxRoutine>>,
    executor: Mutex<Arc<dyn Executor>>,
    registry: Arc<RoutineRegistry>,
}

impl RoutineCore {
    /// Build the routine and run its first slice on the calling thread.
    /// Callers post this behind a work unit so spawning never reenters the
    /// spawner's stack.
    pub(crate) fn spawn<F, Fut>(executor: Arc<dyn Executor>, registry: Arc<RoutineRegistry>, f: F)
    where
        F: FnOnce(Co) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = NEXT_ROUTINE_ID.fetch_add(1, Ordering::Relaxed);
        registry.add(id, Instant::now());

        let core = Arc::new(RoutineCore {
            id,
            future: Mutex::new(None),
            executor: Mutex::new(executor),
            registry,
        });

        let fut = f(Co { core: core.clone() });
        *core.future.lock() = Some(Box::pin(fut));
        core.poll();
    }

    pub(crate) fn executor(&self) -> Arc<dyn Executor> {
        self.executor.lock().clone()
    }

    pub(crate) fn set_executor(&self, executor: Arc<dyn Executor>) {
        *self.executor.lock() = executor;
    }

    /// Run the routine to its next suspension point, or to completion, on
    /// the calling thread. The future slot's mutex serializes concurrent
    /// resumption attempts.
    fn poll(self: &Arc<Self>) {
        let waker = waker_ref(self);
        let mut cx = Context::from_waker(&waker);

        let mut slot = self.future.lock();
        let Some(fut) = slot.as_mut() else {
            // Already completed; a stale wake is a no-op.
            return;
        };
        if let Poll::Ready(()) = fut.as_mut().poll(&mut cx) {
            *slot = None;
            drop(slot);
            self.registry.remove(self.id);
        }
    }
}

impl ArcWake for RoutineCore {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        let core = arc_self.clone();
        let executor = core.executor();
        executor.post(PriorityTask::new(Priority::Medium, move || core.poll()));
    }
}

/// Bookkeeping set of outstanding top-level routines, keyed by
/// (routine id, start time). Mutations may come from any worker thread,
/// hence the single mutex.
#[derive(Default)]
pub(crate) struct RoutineRegistry {
    routines: Mutex<BTreeMap<u64, Instant>>,
}

impl RoutineRegistry {
    pub(crate) fn add(&self, id: u64, started_at: Instant) {
        self.routines.lock().insert(id, started_at);
    }

    pub(crate) fn remove(&self, id: u64) {
        self.routines.lock().remove(&id);
    }

    pub(crate) fn len(&self) -> usize {
        self.routines.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::SimpleExecutor;
    use std::sync::mpsc;

    fn started_executor() -> Arc<dyn Executor> {
        let executor = Arc::new(SimpleExecutor::new());
        executor.start().expect("start executor");
        executor
    }

    #[test]
    fn test_routine_registers_and_deregisters() {
        let executor = started_executor();
        let registry = Arc::new(RoutineRegistry::default());
        let (tx, rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        {
            let spawn_executor = executor.clone();
            let spawn_registry = registry.clone();
            let registry = registry.clone();
            executor.post(PriorityTask::new(Priority::Medium, move || {
                RoutineCore::spawn(spawn_executor, spawn_registry, move |co| async move {
                    tx.send(registry.len()).ok();
                    // Stay suspended until the test releases us.
                    loop {
                        if release_rx.try_recv().is_ok() {
                            break;
                        }
                        co.sleep_for(Duration::from_millis(1)).await;
                    }
                });
            }));
        }

        // Registered before the first slice runs.
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)), Ok(1));
        release_tx.send(()).ok();

        let deadline = Instant::now() + Duration::from_secs(2);
        while registry.len() != 0 {
            assert!(Instant::now() < deadline, "routine never deregistered");
            std::thread::sleep(Duration::from_millis(5));
        }
        executor.stop();
    }

    #[test]
    fn test_registry_is_ordered_and_counted() {
        let registry = RoutineRegistry::default();
        let now = Instant::now();
        registry.add(2, now);
        registry.add(1, now);
        assert_eq!(registry.len(), 2);
        registry.remove(1);
        registry.remove(1);
        assert_eq!(registry.len(), 1);
    }
}
