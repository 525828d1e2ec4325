// src/workload.rs

//! Simulated units of work for tasks declared in a workload file.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use anyhow::anyhow;
use tracing::debug;

use crate::config::{TaskEntry, WorkloadFile};
use crate::engine::TaskSubmission;
use crate::exec::{UnitOfWork, work_fn};

/// Build the unit of work for one `[task.<id>]` entry.
///
/// Each attempt sleeps for `duration_ms` (or until cancelled). The first
/// `fail_attempts` attempts end in an execution error, which the manager
/// retries like any other transient failure.
pub fn simulated_work(entry: &TaskEntry) -> UnitOfWork<String> {
    let duration = Duration::from_millis(entry.duration_ms);
    let fail_attempts = entry.fail_attempts;
    let calls = Arc::new(AtomicU32::new(0));

    work_fn(move |ctx| {
        let calls = Arc::clone(&calls);
        async move {
            let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
            debug!(task = ctx.task_id(), attempt = ctx.attempt(), "simulated work started");

            tokio::select! {
                _ = tokio::time::sleep(duration) => {}
                _ = ctx.cancelled() => {
                    return Err(anyhow!("interrupted by cancellation"));
                }
            }

            if call <= fail_attempts {
                return Err(anyhow!("simulated failure on attempt {call}"));
            }
            Ok(format!("{} finished on attempt {}", ctx.task_id(), ctx.attempt()))
        }
    })
}

/// Turn every task of a workload into a submission, in id order.
///
/// Relative deadlines are anchored at `now`.
pub fn submissions(workload: &WorkloadFile, now: Instant) -> Vec<TaskSubmission<String>> {
    workload
        .task
        .iter()
        .map(|(id, entry)| TaskSubmission::new(id.clone(), simulated_work(entry), entry.to_options(now)))
        .collect()
}
