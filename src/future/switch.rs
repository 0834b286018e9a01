use crate::executor::{Executor, Priority, PriorityTask};
use crate::routine::RoutineCore;
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

/// Moves subsequent execution of the awaiting routine onto another
/// executor's queues.
///
/// The first poll swaps the routine harness's executor handle and wakes;
/// since waking always posts the next poll unit through that handle, the
/// resumption (and everything after it) runs on the target executor.
pub struct SwitchTo {
    core: Arc<RoutineCore>,
    target: Arc<dyn Executor>,
    switched: bool,
}

impl SwitchTo {
    pub(crate) fn new(core: Arc<RoutineCore>, target: Arc<dyn Executor>) -> Self {
        Self {
            core,
            target,
            switched: false,
        }
    }
}

impl Future for SwitchTo {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if this.switched {
            Poll::Ready(())
        } else {
            this.switched = true;
            this.core.set_executor(this.target.clone());
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    }
}

/// Runs a callable on a target executor and resumes the awaiting routine,
/// on its own executor, with the result.
pub struct RunOn<R> {
    target: Arc<dyn Executor>,
    func: Option<Box<dyn FnOnce() -> R + Send>>,
    state: Arc<RunOnState<R>>,
}

struct RunOnState<R> {
    result: Mutex<Option<R>>,
    fired: AtomicBool,
}

impl<R: Send + 'static> RunOn<R> {
    pub(crate) fn new<F>(target: Arc<dyn Executor>, func: F) -> Self
    where
        F: FnOnce() -> R + Send + 'static,
    {
        Self {
            target,
            func: Some(Box::new(func)),
            state: Arc::new(RunOnState {
                result: Mutex::new(None),
                fired: AtomicBool::new(false),
            }),
        }
    }
}

impl<R: Send + 'static> Future for RunOn<R> {
    type Output = R;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if this.state.fired.load(Ordering::Acquire) {
            if let Some(result) = this.state.result.lock().take() {
                return Poll::Ready(result);
            }
        }

        if let Some(func) = this.func.take() {
            let state = this.state.clone();
            let waker = cx.waker().clone();
            this.target.post(PriorityTask::new(Priority::Medium, move || {
                *state.result.lock() = Some(func());
                state.fired.store(true, Ordering::Release);
                // Waking resumes the routine on its own executor, not on
                // the target: the hop back is the waker's job.
                waker.wake();
            }));
        }
        Poll::Pending
    }
}
