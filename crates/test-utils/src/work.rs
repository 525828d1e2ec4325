#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use swarmsched::exec::{UnitOfWork, work_fn};

/// Succeeds immediately with `value`.
pub fn ok_work<T: Clone + Send + Sync + 'static>(value: T) -> UnitOfWork<T> {
    work_fn(move |_ctx| {
        let value = value.clone();
        async move { Ok(value) }
    })
}

/// Sleeps for `ms`, then succeeds with `value`. Stops early with an error if
/// cancelled.
pub fn sleep_work<T: Clone + Send + Sync + 'static>(ms: u64, value: T) -> UnitOfWork<T> {
    work_fn(move |ctx| {
        let value = value.clone();
        async move {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(ms)) => Ok(value),
                _ = ctx.cancelled() => Err(anyhow!("cancelled")),
            }
        }
    })
}

/// Always fails with `message`.
pub fn failing_work<T: Send + 'static>(message: &str) -> UnitOfWork<T> {
    let message = message.to_string();
    work_fn(move |_ctx| {
        let message = message.clone();
        async move { Err(anyhow!(message)) }
    })
}

/// Fails the first `failures` calls, then succeeds with `value`. The counter
/// reports how many times the work was called.
pub fn flaky_work<T: Clone + Send + Sync + 'static>(
    failures: u32,
    value: T,
) -> (UnitOfWork<T>, Arc<AtomicU32>) {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    let work = work_fn(move |_ctx| {
        let value = value.clone();
        let call = counter.fetch_add(1, Ordering::SeqCst) + 1;
        async move {
            if call <= failures {
                Err(anyhow!("flaky failure #{call}"))
            } else {
                Ok(value)
            }
        }
    });
    (work, calls)
}

/// Appends the task id to `log` when an attempt starts, sleeps `ms`, then
/// succeeds with `value`.
pub fn recording_work<T: Clone + Send + Sync + 'static>(
    log: Arc<Mutex<Vec<String>>>,
    ms: u64,
    value: T,
) -> UnitOfWork<T> {
    work_fn(move |ctx| {
        log.lock().unwrap().push(ctx.task_id().to_string());
        let value = value.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(value)
        }
    })
}

/// Never finishes on its own; returns an error once cancelled.
pub fn hanging_work<T: Send + 'static>() -> UnitOfWork<T> {
    work_fn(move |ctx| async move {
        ctx.cancelled().await;
        Err(anyhow!("cancelled"))
    })
}
