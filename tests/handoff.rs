//! Cross-executor handoffs: yielding, migrating a routine, and hopping a
//! single closure onto another executor.

use corio::{Context, EpollProactor, Executor, MultithreadExecutor, SimpleExecutor};
use std::sync::Arc;
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
fn test_yield_now_resumes_on_the_same_executor() {
    let ctx = started_context();
    let (tx, rx) = mpsc::channel();

    ctx.spawn(move |co| async move {
        let before = std::thread::current().id();
        co.yield_now().await;
        let after = std::thread::current().id();
        tx.send((before, after, co.executor().is_current()))
            .expect("send");
    });

    let (before, after, still_current) =
        rx.recv_timeout(Duration::from_secs(5)).expect("resolved");
    assert_eq!(before, after);
    assert!(still_current);
    ctx.stop();
}

#[test]
fn test_switch_to_migrates_the_routine() {
    let ctx = started_context();
    let other: Arc<dyn Executor> = Arc::new(SimpleExecutor::new());
    other.start().expect("start second executor");

    let (tx, rx) = mpsc::channel();
    let target = other.clone();
    ctx.spawn(move |co| async move {
        let before = std::thread::current().id();
        assert!(co.executor().is_current());

        co.switch_to(&target).await;

        let after = std::thread::current().id();
        // All execution from here on, including later resumptions, belongs
        // to the target executor.
        let migrated = co.executor().is_current();
        co.sleep_for(Duration::from_millis(10)).await;
        let after_sleep = std::thread::current().id();
        tx.send((before, after, after_sleep, migrated)).expect("send");
    });

    let (before, after, after_sleep, migrated) =
        rx.recv_timeout(Duration::from_secs(5)).expect("resolved");
    assert_ne!(before, after);
    assert_eq!(after, after_sleep);
    assert!(migrated);
    ctx.stop();
    other.stop();
}

#[test]
fn test_run_on_hops_once_and_comes_back() {
    let ctx = started_context();
    let pool: Arc<dyn Executor> = Arc::new(MultithreadExecutor::new(2));
    pool.start().expect("start pool");

    let (tx, rx) = mpsc::channel();
    let target = pool.clone();
    ctx.spawn(move |co| async move {
        let home = std::thread::current().id();
        let ran_on = co
            .run_on(&target, || std::thread::current().id())
            .await;
        let back_on = std::thread::current().id();
        tx.send((home, ran_on, back_on, co.executor().is_current()))
            .expect("send");
    });

    let (home, ran_on, back_on, still_home) =
        rx.recv_timeout(Duration::from_secs(5)).expect("resolved");
    assert_ne!(home, ran_on, "closure must run on the target pool");
    assert_eq!(home, back_on, "routine must resume on its own executor");
    assert!(still_home);
    ctx.stop();
    pool.stop();
}
