// src/exec/mod.rs

//! Execution layer.
//!
//! This module runs units of work for dispatched attempts and reports back to
//! the runtime loop.
//!
//! - [`context`] defines the `TaskContext` every unit of work receives.
//! - [`executor_loop`] owns the background loop that spawns attempts.
//! - [`task_runner`] runs one attempt under its timeout and classifies the
//!   result.
//! - [`backend`] provides the `ExecutorBackend` trait and the tokio-backed
//!   `TokioExecutor` the runtime uses in production, and which tests can
//!   replace.

pub mod backend;
pub mod context;
pub mod executor_loop;
pub mod task_runner;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::dag::ScheduledTask;
use crate::errors::TaskError;
use crate::types::TaskId;

pub use backend::{ExecutorBackend, TokioExecutor};
pub use context::TaskContext;
pub use executor_loop::spawn_executor;
pub use task_runner::run_attempt;

/// Boxed future returned by a unit of work.
pub type WorkFuture<T> = Pin<Box<dyn Future<Output = anyhow::Result<T>> + Send>>;

/// A unit of work. It is called once per attempt, so it must be re-runnable.
pub type UnitOfWork<T> = Arc<dyn Fn(TaskContext) -> WorkFuture<T> + Send + Sync>;

/// Wrap an async closure as a [`UnitOfWork`].
///
/// ```
/// use swarmsched::exec::work_fn;
///
/// let work = work_fn(|ctx| async move { Ok(ctx.task_id().len()) });
/// # let _ = work;
/// ```
pub fn work_fn<T, F, Fut>(f: F) -> UnitOfWork<T>
where
    F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    Arc::new(move |ctx| Box::pin(f(ctx)) as WorkFuture<T>)
}

/// One attempt handed to the executor.
pub struct Job<T> {
    pub task: ScheduledTask,
    pub work: UnitOfWork<T>,
    pub ctx: TaskContext,
}

/// Result of one attempt, sent back to the runtime loop.
#[derive(Debug)]
pub struct AttemptReport<T> {
    pub task: TaskId,
    pub attempt: u32,
    pub result: Result<T, TaskError>,
    pub elapsed: Duration,
}
