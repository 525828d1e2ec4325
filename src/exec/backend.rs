// src/exec/backend.rs

//! Pluggable executor backend abstraction.
//!
//! The runtime talks to an `ExecutorBackend` instead of a raw mpsc sender.
//! This makes it easy to swap in a recording executor in tests while keeping
//! the production implementation in [`executor_loop`](super::executor_loop).

use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;

use crate::errors::{Result, SwarmError};
use crate::exec::executor_loop::spawn_executor;
use crate::exec::{AttemptReport, Job};

/// Trait abstracting how dispatched attempts are executed.
///
/// Whatever the implementation does, it must eventually send exactly one
/// [`AttemptReport`] per job to the runtime, or the worker slot stays busy.
pub trait ExecutorBackend<T>: Send {
    fn spawn_attempt(&mut self, job: Job<T>) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Executor backend used in production.
///
/// Wraps the [`spawn_executor`] loop and forwards jobs to it.
pub struct TokioExecutor<T> {
    tx: mpsc::Sender<Job<T>>,
}

impl<T: Send + 'static> TokioExecutor<T> {
    /// Spawn the background executor loop, reporting to `reports_tx`.
    pub fn new(reports_tx: mpsc::Sender<AttemptReport<T>>) -> Self {
        let tx = spawn_executor(reports_tx);
        Self { tx }
    }
}

impl<T: Send + 'static> ExecutorBackend<T> for TokioExecutor<T> {
    fn spawn_attempt(&mut self, job: Job<T>) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        // Clone the sender so the future doesn't borrow `self` across `await`.
        let tx = self.tx.clone();

        Box::pin(async move {
            tx.send(job)
                .await
                .map_err(|_| SwarmError::Other(anyhow::anyhow!("executor loop has stopped")))
        })
    }
}
