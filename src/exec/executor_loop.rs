// src/exec/executor_loop.rs

//! Background loop that spawns attempts.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::exec::task_runner::run_attempt;
use crate::exec::{AttemptReport, Job};
use crate::types::TaskId;

/// Spawn the background executor loop.
///
/// The returned sender is what [`TokioExecutor`](crate::exec::TokioExecutor)
/// forwards jobs to. Each job runs in its own tokio task. Per task id there
/// is never more than one attempt in flight, since the runtime only
/// dispatches a task again after its previous attempt reported back.
///
/// When the sender is dropped the loop exits and aborts whatever is still
/// running.
pub fn spawn_executor<T: Send + 'static>(reports_tx: mpsc::Sender<AttemptReport<T>>) -> mpsc::Sender<Job<T>> {
    let (tx, mut rx) = mpsc::channel::<Job<T>>(64);

    tokio::spawn(async move {
        info!("executor loop started");

        let mut active: HashMap<TaskId, JoinHandle<()>> = HashMap::new();

        while let Some(job) = rx.recv().await {
            active.retain(|_, handle| !handle.is_finished());
            handle_job(job, &mut active, &reports_tx);
        }

        for (task, handle) in active.drain() {
            if !handle.is_finished() {
                debug!(task = %task, "aborting in-flight attempt on executor shutdown");
                handle.abort();
            }
        }

        info!("executor loop finished (channel closed)");
    });

    tx
}

fn handle_job<T: Send + 'static>(
    job: Job<T>,
    active: &mut HashMap<TaskId, JoinHandle<()>>,
    reports_tx: &mpsc::Sender<AttemptReport<T>>,
) {
    let id = job.task.id.clone();

    if let Some(existing) = active.get(&id) {
        if !existing.is_finished() {
            warn!(
                task = %id,
                attempt = job.task.attempt,
                "previous attempt still in flight; starting the new one anyway"
            );
        }
    }

    let reports_tx = reports_tx.clone();
    let handle = tokio::spawn(async move {
        run_attempt(job, reports_tx).await;
    });

    active.insert(id, handle);
}
