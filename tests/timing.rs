//! Timer semantics: sleeps never fire early, and deadline races have exactly
//! one winner.

use corio::{Context, EpollProactor, Executor, MultithreadExecutor, SimpleExecutor, Task};
use rstest::rstest;
use std::sync::Arc;
use std::sync::mpsc;
use std::time::{Duration, Instant};

fn simple() -> Arc<dyn Executor> {
    Arc::new(SimpleExecutor::new())
}

fn stealing() -> Arc<dyn Executor> {
    Arc::new(MultithreadExecutor::new(2))
}

fn started_context(executor: Arc<dyn Executor>) -> Context<EpollProactor> {
    let ctx = Context::new(executor);
    ctx.add_proactor("io", Arc::new(EpollProactor::new().expect("epoll")));
    ctx.start().expect("start context");
    ctx
}

#[rstest]
#[case::simple(simple())]
#[case::stealing(stealing())]
fn test_sleep_for_waits_at_least_the_duration(#[case] executor: Arc<dyn Executor>) {
    let ctx = started_context(executor);
    let (tx, rx) = mpsc::channel();

    ctx.spawn(move |co| async move {
        let before = Instant::now();
        co.sleep_for(Duration::from_millis(50)).await;
        tx.send(before.elapsed()).expect("send elapsed");
    });

    let elapsed = rx.recv_timeout(Duration::from_secs(5)).expect("slept");
    assert!(elapsed >= Duration::from_millis(50), "woke early: {elapsed:?}");
    // Generous upper bound: just proves the timer fired rather than the
    // shutdown path unblocking us.
    assert!(elapsed < Duration::from_secs(2), "woke far too late: {elapsed:?}");
    ctx.stop();
}

#[rstest]
#[case::simple(simple())]
#[case::stealing(stealing())]
fn test_run_with_times_out_a_stuck_future(#[case] executor: Arc<dyn Executor>) {
    let ctx = started_context(executor);
    let (tx, rx) = mpsc::channel();

    ctx.spawn(move |co| async move {
        // A task never resolved by anyone models an I/O request whose
        // completion never arrives.
        let stuck: Task<u32> = Task::new();
        let before = Instant::now();
        let outcome = co.run_with(Duration::from_millis(40), stuck).await;
        tx.send((outcome, before.elapsed())).expect("send outcome");
    });

    let (outcome, elapsed) = rx.recv_timeout(Duration::from_secs(5)).expect("resolved");
    assert_eq!(outcome, None);
    assert!(elapsed >= Duration::from_millis(40), "expired early: {elapsed:?}");
    ctx.stop();
}

#[rstest]
#[case::simple(simple())]
#[case::stealing(stealing())]
fn test_run_with_passes_through_a_fast_future(#[case] executor: Arc<dyn Executor>) {
    let ctx = started_context(executor);
    let (tx, rx) = mpsc::channel();

    ctx.spawn(move |co| async move {
        let sleep = co.sleep_for(Duration::from_millis(10));
        let outcome = co.run_with(Duration::from_secs(5), sleep).await;
        tx.send(outcome.is_some()).expect("send outcome");
    });

    assert!(rx.recv_timeout(Duration::from_secs(5)).expect("resolved"));
    ctx.stop();
}

#[test]
fn test_run_with_near_simultaneous_race_has_one_winner() {
    let ctx = started_context(simple());
    let (tx, rx) = mpsc::channel();

    // Sweep the deadline across the future's own latency; whichever side
    // wins, the routine must resolve exactly once per iteration.
    for timeout_ms in [8u64, 9, 10, 11, 12] {
        let tx = tx.clone();
        ctx.spawn(move |co| async move {
            let sleep = co.sleep_for(Duration::from_millis(10));
            let outcome = co.run_with(Duration::from_millis(timeout_ms), sleep).await;
            tx.send(outcome.is_some()).expect("send outcome");
        });
    }

    for _ in 0..5 {
        // Either side may win near the crossover; receiving at all proves a
        // single resolution.
        rx.recv_timeout(Duration::from_secs(5)).expect("resolved");
    }
    ctx.stop();
}
