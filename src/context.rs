use crate::executor::{Executor, Priority, PriorityTask};
use crate::proactor::Proactor;
use crate::routine::{Co, RoutineCore, RoutineRegistry};
use anyhow::{Result, anyhow};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Composition root binding one executor to a set of named proactors.
///
/// On [`Context::start`] the executor's harvest hook is wired to drain every
/// registered proactor once per cycle, and each proactor's wake hook is
/// pointed at the executor so fresh completions cut a sleeping cycle short.
/// Cloning a `Context` clones a handle to the same runtime.
pub struct Context<P: Proactor> {
    inner: Arc<Inner<P>>,
}

struct Inner<P: Proactor> {
    executor: Arc<dyn Executor>,
    proactors: Mutex<HashMap<String, Arc<P>>>,
    /// Which registered proactor newly created sockets should use.
    socket_key: Mutex<Option<String>>,
    registry: Arc<RoutineRegistry>,
    started: AtomicBool,
}

impl<P: Proactor> Context<P> {
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self {
            inner: Arc::new(Inner {
                executor,
                proactors: Mutex::new(HashMap::new()),
                socket_key: Mutex::new(None),
                registry: Arc::new(RoutineRegistry::default()),
                started: AtomicBool::new(false),
            }),
        }
    }

    pub fn executor(&self) -> Arc<dyn Executor> {
        self.inner.executor.clone()
    }

    /// Register a proactor under `name`. The first registration also becomes
    /// the socket proactor unless one was already chosen.
    pub fn add_proactor(&self, name: impl Into<String>, proactor: Arc<P>) {
        let name = name.into();
        let mut key = self.inner.socket_key.lock();
        if key.is_none() {
            *key = Some(name.clone());
        }
        self.inner.proactors.lock().insert(name, proactor);
    }

    /// Choose which registered proactor the socket layer uses.
    pub fn set_socket_proactor(&self, name: impl Into<String>) {
        *self.inner.socket_key.lock() = Some(name.into());
    }

    pub fn socket_proactor(&self) -> Option<Arc<P>> {
        let key = self.inner.socket_key.lock().clone()?;
        self.inner.proactors.lock().get(&key).cloned()
    }

    /// Wire the harvest and wake paths, then start the proactors and the
    /// executor. Starting twice is an error.
    pub fn start(&self) -> Result<()> {
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return Err(anyhow!("context already started"));
        }

        let harvest_from = self.inner.clone();
        self.inner.executor.set_task_getter(Box::new(move || {
            let mut batch = Vec::new();
            for proactor in harvest_from.proactors.lock().values() {
                batch.append(&mut proactor.harvest());
            }
            batch
        }));

        for proactor in self.inner.proactors.lock().values() {
            let executor = self.inner.executor.clone();
            proactor.set_wake_hook(Box::new(move || executor.wake()));
            proactor.start()?;
        }
        self.inner.executor.start()?;

        tracing::info!(
            proactors = self.inner.proactors.lock().len(),
            "context started"
        );
        Ok(())
    }

    /// Stop the executor first so no cycle harvests a stopped proactor,
    /// then the proactors. Idempotent.
    pub fn stop(&self) {
        if !self.inner.started.swap(false, Ordering::AcqRel) {
            return;
        }
        self.inner.executor.stop();
        for proactor in self.inner.proactors.lock().values() {
            proactor.stop();
        }
        tracing::info!("context stopped");
    }

    /// Launch a fire-and-forget routine. The routine's first slice runs
    /// behind a medium-priority work unit, never on the spawner's stack.
    pub fn spawn<F, Fut>(&self, f: F)
    where
        F: FnOnce(Co) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let executor = self.inner.executor.clone();
        let registry = self.inner.registry.clone();
        let spawn_on = executor.clone();
        executor.post(PriorityTask::new(Priority::Medium, move || {
            RoutineCore::spawn(spawn_on, registry, f);
        }));
    }

    /// Number of top-level routines that have not yet run to completion.
    pub fn routines_len(&self) -> usize {
        self.inner.registry.len()
    }
}

impl<P: Proactor> Clone for Context<P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::SimpleExecutor;
    use crate::proactor::EpollProactor;
    use std::sync::mpsc;
    use std::time::Duration;

    fn started_context() -> Context<EpollProactor> {
        let executor: Arc<dyn Executor> = Arc::new(SimpleExecutor::new());
        let ctx = Context::new(executor);
        ctx.add_proactor("io", Arc::new(EpollProactor::new().expect("epoll")));
        ctx.start().expect("start context");
        ctx
    }

    #[test]
    fn test_spawned_routine_runs_and_deregisters() {
        let ctx = started_context();
        let (tx, rx) = mpsc::channel();

        ctx.spawn(move |_co| async move {
            tx.send(42u32).expect("send");
        });

        assert_eq!(rx.recv_timeout(Duration::from_secs(2)), Ok(42));
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while ctx.routines_len() > 0 {
            assert!(std::time::Instant::now() < deadline, "routine never left registry");
            std::thread::sleep(Duration::from_millis(5));
        }
        ctx.stop();
    }

    #[test]
    fn test_spawn_does_not_run_inline() {
        let ctx = started_context();
        let (tx, rx) = mpsc::channel();
        let spawner = std::thread::current().id();

        ctx.spawn(move |_co| async move {
            tx.send(std::thread::current().id()).expect("send");
        });

        let ran_on = rx.recv_timeout(Duration::from_secs(2)).expect("routine ran");
        assert_ne!(ran_on, spawner);
        ctx.stop();
    }

    #[test]
    fn test_first_proactor_becomes_socket_proactor() {
        let executor: Arc<dyn Executor> = Arc::new(SimpleExecutor::new());
        let ctx: Context<EpollProactor> = Context::new(executor);
        assert!(ctx.socket_proactor().is_none());
        ctx.add_proactor("a", Arc::new(EpollProactor::new().expect("epoll")));
        ctx.add_proactor("b", Arc::new(EpollProactor::new().expect("epoll")));
        assert!(ctx.socket_proactor().is_some());
        ctx.set_socket_proactor("b");
        assert!(ctx.socket_proactor().is_some());
    }

    #[test]
    fn test_double_start_fails_and_stop_is_idempotent() {
        let ctx = started_context();
        assert!(ctx.start().is_err());
        ctx.stop();
        ctx.stop();
    }
}
