use crate::executor::{Executor, Priority, PriorityTask};
use pin_project::pin_project;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

/// Races an inner future against a deadline.
///
/// Resolves to `Some(output)` if the inner future finishes first, `None` if
/// the deadline does. The shared `settled` flag arbitrates: whichever side
/// loses checks the flag and has no externally observable effect. An expired
/// wait only stops waiting; any proactor-level request behind the inner
/// future stays in flight and its eventual completion is discarded by the
/// already-resolved task cell.
#[pin_project]
pub struct Expire<F: Future> {
    #[pin]
    inner: F,
    executor: Arc<dyn Executor>,
    timeout: Duration,
    settled: Arc<AtomicBool>,
    expired: Arc<AtomicBool>,
    armed: bool,
}

impl<F: Future> Expire<F> {
    pub(crate) fn new(executor: Arc<dyn Executor>, timeout: Duration, inner: F) -> Self {
        Self {
            inner,
            executor,
            timeout,
            settled: Arc::new(AtomicBool::new(false)),
            expired: Arc::new(AtomicBool::new(false)),
            armed: false,
        }
    }
}

impl<F: Future> Future for Expire<F> {
    type Output = Option<F::Output>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();

        match this.inner.poll(cx) {
            Poll::Ready(output) => {
                // First to flip the flag wins; if the timer got there first
                // the value is dropped unobserved.
                if !this.settled.swap(true, Ordering::AcqRel) {
                    Poll::Ready(Some(output))
                } else {
                    Poll::Ready(None)
                }
            }
            Poll::Pending => {
                if this.expired.load(Ordering::Acquire) {
                    return Poll::Ready(None);
                }
                if !*this.armed {
                    *this.armed = true;
                    let settled = this.settled.clone();
                    let expired = this.expired.clone();
                    let waker = cx.waker().clone();
                    this.executor.post_delay(
                        *this.timeout,
                        PriorityTask::new(Priority::Medium, move || {
                            // Loser side of the race: no-op if the task
                            // already resolved.
                            if !settled.swap(true, Ordering::AcqRel) {
                                expired.store(true, Ordering::Release);
                                waker.wake();
                            }
                        }),
                    );
                }
                Poll::Pending
            }
        }
    }
}
