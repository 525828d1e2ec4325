// src/errors.rs

//! Crate-wide error types.
//!
//! [`TaskError`] is what a task can end with and what callers of `wait_for`
//! receive; it is cloneable so one failure can be handed to every waiter.
//! [`SwarmError`] covers everything else (config, IO, the runtime itself).

use std::time::Duration;

use thiserror::Error;

use crate::types::TaskId;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    #[error("task '{task}' depends on unknown task '{dependency}'")]
    UnknownDependency { task: TaskId, dependency: TaskId },

    #[error("task id '{0}' is already in use")]
    DuplicateTaskId(TaskId),

    #[error("unknown task '{0}'")]
    UnknownTask(TaskId),

    #[error("timed out acquiring resource '{resource}'")]
    ResourceAcquisitionTimeout { resource: String },

    #[error("execution timed out after {0:?}")]
    ExecutionTimeout(Duration),

    #[error("execution failed: {0}")]
    ExecutionError(String),

    #[error("task was cancelled")]
    Cancelled,

    #[error("task was cancelled to break a deadlock")]
    DeadlockCancelled,

    #[error("dependency '{0}' failed")]
    DependencyFailed(TaskId),

    #[error("dependency cycle detected involving task '{0}'")]
    DependencyCycle(TaskId),

    #[error("task manager has shut down")]
    ManagerShutdown,
}

impl TaskError {
    /// Transient failures are retried up to the task's `max_retries`.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TaskError::ExecutionError(_)
                | TaskError::ExecutionTimeout(_)
                | TaskError::ResourceAcquisitionTimeout { .. }
        )
    }

    /// Whether this error represents a cancellation (explicit or deadlock-driven).
    pub fn is_cancellation(&self) -> bool {
        matches!(self, TaskError::Cancelled | TaskError::DeadlockCancelled)
    }
}

#[derive(Error, Debug)]
pub enum SwarmError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Task(#[from] TaskError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, SwarmError>;
