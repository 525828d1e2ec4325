// src/exec/context.rs

use std::time::Duration;

use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::errors::TaskError;
use crate::locks::LockClient;
use crate::types::{LockMode, TaskId};

/// Handed to every attempt of a unit of work.
///
/// Cancellation is cooperative: cancelling a task (or the manager shutting
/// down, or the deadlock detector picking this task) only trips the token.
/// Long-running work should check [`TaskContext::is_cancelled`] or race
/// against [`TaskContext::cancelled`].
#[derive(Debug, Clone)]
pub struct TaskContext {
    task_id: TaskId,
    attempt: u32,
    cancel: CancellationToken,
    locks: LockClient,
}

impl TaskContext {
    pub fn new(task_id: TaskId, attempt: u32, cancel: CancellationToken, locks: LockClient) -> Self {
        Self {
            task_id,
            attempt,
            cancel,
            locks,
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// 1-based attempt number.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    /// Lock a further resource for the rest of this attempt.
    ///
    /// The lock is released with the task's declared resources when the
    /// attempt ends.
    pub async fn acquire(&self, resource: &str, mode: LockMode) -> Result<(), TaskError> {
        self.locks.acquire(&self.task_id, resource, mode).await
    }

    pub async fn acquire_with_timeout(
        &self,
        resource: &str,
        mode: LockMode,
        timeout: Duration,
    ) -> Result<(), TaskError> {
        self.locks
            .acquire_with_timeout(&self.task_id, resource, mode, timeout)
            .await
    }

    /// Release one resource early.
    pub async fn release(&self, resource: &str) -> bool {
        self.locks.release(&self.task_id, resource).await
    }
}
