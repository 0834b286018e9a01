use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

/// Single-resolution result cell shared between a producer (an I/O completion
/// callback, or a computed value) and a consumer (the suspended coroutine).
///
/// The cell is reference counted: cloning a `Task` clones the handle, not the
/// result. The result is set at most once; any call to [`Task::set_result`]
/// after the first resolution is a no-op, so a completion racing the caller's
/// own synchronous short-circuit can never overwrite an observed value.
///
/// Producing a value and scheduling its consumer are deliberately separate:
/// [`Task::set_result`] only stores, [`Task::resume`] only wakes the stored
/// continuation. Callbacks hopping from a poller thread back into coroutine
/// execution do both, in that order.
pub struct Task<T> {
    cell: Arc<Cell<T>>,
}

struct Cell<T> {
    state: Mutex<State<T>>,
}

struct State<T> {
    /// Present between `set_result` and the consuming poll.
    result: Option<T>,
    /// Sticky: stays true once the first `set_result` landed, even after the
    /// value has been taken by the consumer.
    resolved: bool,
    /// The continuation captured at the last suspending poll.
    waker: Option<Waker>,
}

impl<T> Task<T> {
    pub fn new() -> Self {
        Self {
            cell: Arc::new(Cell {
                state: Mutex::new(State {
                    result: None,
                    resolved: false,
                    waker: None,
                }),
            }),
        }
    }

    /// Store the result. First call wins; later calls are ignored.
    pub fn set_result(&self, value: T) {
        let mut state = self.cell.state.lock();
        if state.resolved {
            return;
        }
        state.result = Some(value);
        state.resolved = true;
    }

    /// True iff a result has already been produced. Used by completion
    /// callbacks to guard against a synchronous short-circuit that already
    /// resolved the task.
    pub fn is_ready(&self) -> bool {
        self.cell.state.lock().resolved
    }

    /// Wake the stored continuation, if any. Never runs coroutine code
    /// inline: waking re-posts the suspended routine to its executor, which
    /// picks the thread the continuation actually runs on.
    pub fn resume(&self) {
        let waker = self.cell.state.lock().waker.take();
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

impl<T> Default for Task<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Task<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<T> Future for Task<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.cell.state.lock();
        match state.result.take() {
            Some(value) => Poll::Ready(value),
            None => {
                state.waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::task::{ArcWake, waker};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingWake(AtomicUsize);

    impl ArcWake for CountingWake {
        fn wake_by_ref(arc_self: &Arc<Self>) {
            arc_self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn counting_waker() -> (Arc<CountingWake>, std::task::Waker) {
        let wake = Arc::new(CountingWake(AtomicUsize::new(0)));
        let w = waker(wake.clone());
        (wake, w)
    }

    #[test]
    fn test_set_result_is_single_assignment() {
        let task: Task<i32> = Task::new();
        task.set_result(1);
        task.set_result(2);

        let (_wake, w) = counting_waker();
        let mut cx = Context::from_waker(&w);
        let mut fut = task.clone();
        assert_eq!(Pin::new(&mut fut).poll(&mut cx), Poll::Ready(1));
    }

    #[test]
    fn test_is_ready_stays_true_after_consumption() {
        let task: Task<u8> = Task::new();
        assert!(!task.is_ready());
        task.set_result(7);
        assert!(task.is_ready());

        let (_wake, w) = counting_waker();
        let mut cx = Context::from_waker(&w);
        let mut fut = task.clone();
        assert_eq!(Pin::new(&mut fut).poll(&mut cx), Poll::Ready(7));

        // The completion-callback guard must still see the task as settled.
        assert!(task.is_ready());
    }

    #[test]
    fn test_resume_wakes_stored_continuation_once() {
        let task: Task<i32> = Task::new();
        let (wake, w) = counting_waker();
        let mut cx = Context::from_waker(&w);

        let mut fut = task.clone();
        assert!(Pin::new(&mut fut).poll(&mut cx).is_pending());

        task.set_result(42);
        task.resume();
        assert_eq!(wake.0.load(Ordering::SeqCst), 1);

        // The waker slot was taken; a second resume has nothing to wake.
        task.resume();
        assert_eq!(wake.0.load(Ordering::SeqCst), 1);

        assert_eq!(Pin::new(&mut fut).poll(&mut cx), Poll::Ready(42));
    }

    #[test]
    fn test_pending_until_resolved() {
        let task: Task<String> = Task::new();
        let (wake, w) = counting_waker();
        let mut cx = Context::from_waker(&w);

        let mut fut = task.clone();
        assert!(Pin::new(&mut fut).poll(&mut cx).is_pending());
        assert!(Pin::new(&mut fut).poll(&mut cx).is_pending());
        assert_eq!(wake.0.load(Ordering::SeqCst), 0);

        task.set_result("done".to_string());
        assert_eq!(
            Pin::new(&mut fut).poll(&mut cx),
            Poll::Ready("done".to_string())
        );
    }
}
