// src/locks/client.rs

//! Async handle for manual lock coordination.
//!
//! The lock table itself lives inside the runtime loop; a `LockClient` only
//! sends requests over a channel and waits for the reply. It is cheap to clone
//! and is handed to every running unit of work through its `TaskContext`.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use crate::errors::TaskError;
use crate::types::{LockMode, TaskId};

/// Lock request as seen by the runtime loop.
#[derive(Debug)]
pub enum LockRequest {
    Acquire {
        owner: TaskId,
        resource: String,
        mode: LockMode,
        /// `None` uses the manager's `lock_timeout`.
        timeout: Option<Duration>,
        reply: oneshot::Sender<Result<(), TaskError>>,
    },
    Release {
        owner: TaskId,
        resource: String,
        reply: oneshot::Sender<bool>,
    },
    ReleaseAll {
        owner: TaskId,
        reply: oneshot::Sender<Vec<String>>,
    },
}

#[derive(Debug, Clone)]
pub struct LockClient {
    tx: mpsc::Sender<LockRequest>,
}

impl LockClient {
    pub(crate) fn new(tx: mpsc::Sender<LockRequest>) -> Self {
        Self { tx }
    }

    /// Acquire `resource` for `owner`, waiting at most the manager's lock timeout.
    pub async fn acquire(&self, owner: &str, resource: &str, mode: LockMode) -> Result<(), TaskError> {
        self.request_acquire(owner, resource, mode, None).await
    }

    /// Acquire with an explicit bound on the wait. A zero timeout only succeeds
    /// if the lock is free right now.
    pub async fn acquire_with_timeout(
        &self,
        owner: &str,
        resource: &str,
        mode: LockMode,
        timeout: Duration,
    ) -> Result<(), TaskError> {
        self.request_acquire(owner, resource, mode, Some(timeout)).await
    }

    /// Release one resource. Returns `false` if `owner` did not hold it.
    pub async fn release(&self, owner: &str, resource: &str) -> bool {
        let (reply, rx) = oneshot::channel();
        let request = LockRequest::Release {
            owner: owner.to_string(),
            resource: resource.to_string(),
            reply,
        };
        if self.tx.send(request).await.is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Release everything `owner` holds and drop its pending requests.
    pub async fn release_all(&self, owner: &str) -> Vec<String> {
        let (reply, rx) = oneshot::channel();
        let request = LockRequest::ReleaseAll {
            owner: owner.to_string(),
            reply,
        };
        if self.tx.send(request).await.is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    async fn request_acquire(
        &self,
        owner: &str,
        resource: &str,
        mode: LockMode,
        timeout: Option<Duration>,
    ) -> Result<(), TaskError> {
        let (reply, rx) = oneshot::channel();
        let request = LockRequest::Acquire {
            owner: owner.to_string(),
            resource: resource.to_string(),
            mode,
            timeout,
            reply,
        };
        self.tx
            .send(request)
            .await
            .map_err(|_| TaskError::ManagerShutdown)?;
        rx.await.map_err(|_| TaskError::ManagerShutdown)?
    }
}
