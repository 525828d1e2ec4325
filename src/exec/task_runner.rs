// src/exec/task_runner.rs

//! Individual attempt runner.

use std::any::Any;

use tokio::sync::mpsc;
use tokio::time::{Instant, timeout};
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, info, warn};

use crate::errors::TaskError;
use crate::exec::{AttemptReport, Job};

/// Run a single attempt and report its result to the runtime.
///
/// The unit of work runs in its own tokio task, raced against the task's
/// timeout:
/// - on timeout the work is aborted and the attempt fails with
///   `ExecutionTimeout`,
/// - a panic becomes `ExecutionError`,
/// - an error that wraps a [`TaskError`] (for example a failed
///   `ctx.acquire(..)?`) keeps that classification; any other error becomes
///   `ExecutionError`.
///
/// Exactly one report is sent per attempt. Dropping the returned future
/// aborts the unit of work with it.
pub async fn run_attempt<T: Send + 'static>(job: Job<T>, reports_tx: mpsc::Sender<AttemptReport<T>>) {
    let Job { task, work, ctx } = job;
    let started = Instant::now();

    info!(
        task = %task.id,
        attempt = task.attempt,
        worker = task.worker_id,
        timeout_ms = task.timeout.as_millis() as u64,
        "starting attempt"
    );

    let mut handle = AbortOnDropHandle::new(tokio::spawn(work(ctx)));

    let result = match timeout(task.timeout, &mut handle).await {
        Ok(Ok(Ok(value))) => Ok(value),
        Ok(Ok(Err(err))) => Err(classify_error(err)),
        Ok(Err(join_err)) if join_err.is_panic() => {
            let message = panic_message(join_err.into_panic());
            warn!(task = %task.id, attempt = task.attempt, %message, "unit of work panicked");
            Err(TaskError::ExecutionError(format!("panicked: {message}")))
        }
        Ok(Err(_join_err)) => Err(TaskError::ExecutionError("unit of work was aborted".to_string())),
        Err(_elapsed) => {
            handle.abort();
            warn!(task = %task.id, attempt = task.attempt, "attempt timed out; aborted");
            Err(TaskError::ExecutionTimeout(task.timeout))
        }
    };

    let elapsed = started.elapsed();
    info!(
        task = %task.id,
        attempt = task.attempt,
        success = result.is_ok(),
        elapsed_ms = elapsed.as_millis() as u64,
        "attempt finished"
    );

    let report = AttemptReport {
        task: task.id,
        attempt: task.attempt,
        result,
        elapsed,
    };
    if reports_tx.send(report).await.is_err() {
        debug!("runtime loop gone; dropping attempt report");
    }
}

fn classify_error(err: anyhow::Error) -> TaskError {
    match err.downcast::<TaskError>() {
        Ok(task_err) => task_err,
        Err(other) => TaskError::ExecutionError(format!("{other:#}")),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
