use crate::executor::{Executor, Priority, PriorityTask};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

/// Suspends the awaiting routine for at least the requested duration.
///
/// The first poll posts a delayed wake to the executor; the `fired` flag
/// guards against a spurious wake (another sub-future of the same routine)
/// resuming the sleep early.
pub struct Sleep {
    executor: Arc<dyn Executor>,
    duration: Duration,
    fired: Arc<AtomicBool>,
    armed: bool,
}

impl Sleep {
    pub(crate) fn new(executor: Arc<dyn Executor>, duration: Duration) -> Self {
        Self {
            executor,
            duration,
            fired: Arc::new(AtomicBool::new(false)),
            armed: false,
        }
    }
}

impl Future for Sleep {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if this.fired.load(Ordering::Acquire) {
            return Poll::Ready(());
        }
        if !this.armed {
            this.armed = true;
            let fired = this.fired.clone();
            let waker = cx.waker().clone();
            this.executor.post_delay(
                this.duration,
                PriorityTask::new(Priority::Medium, move || {
                    fired.store(true, Ordering::Release);
                    waker.wake();
                }),
            );
        }
        Poll::Pending
    }
}
