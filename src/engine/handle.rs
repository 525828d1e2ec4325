// src/engine/handle.rs

//! Cloneable handle to a running manager.

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::ManagerConfig;
use crate::dag::TaskOptions;
use crate::engine::core::CoreRuntime;
use crate::engine::runtime::Runtime;
use crate::engine::TaskEvent;
use crate::errors::{Result, TaskError};
use crate::exec::{AttemptReport, ExecutorBackend, TokioExecutor, UnitOfWork};
use crate::locks::LockClient;
use crate::metrics::ManagerStats;
use crate::types::{LockMode, TaskId};

const REQUEST_CHANNEL_CAPACITY: usize = 256;
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// One entry of a batch submission.
pub struct TaskSubmission<T> {
    pub id: TaskId,
    pub work: UnitOfWork<T>,
    pub options: TaskOptions,
}

impl<T> TaskSubmission<T> {
    pub fn new(id: impl Into<TaskId>, work: UnitOfWork<T>, options: TaskOptions) -> Self {
        Self {
            id: id.into(),
            work,
            options,
        }
    }
}

/// Requests from `Manager` handles to the runtime loop.
pub(crate) enum ManagerRequest<T> {
    Submit {
        tasks: Vec<TaskSubmission<T>>,
        reply: oneshot::Sender<std::result::Result<Vec<TaskId>, TaskError>>,
    },
    WaitFor {
        id: TaskId,
        reply: oneshot::Sender<std::result::Result<T, TaskError>>,
    },
    Cancel {
        id: TaskId,
        reply: oneshot::Sender<bool>,
    },
    Stats {
        reply: oneshot::Sender<ManagerStats>,
    },
    Forget {
        id: TaskId,
        reply: oneshot::Sender<bool>,
    },
}

/// Handle to a running task manager.
///
/// Cheap to clone. The runtime loop stops when [`Manager::shutdown`] is called
/// or when every handle has been dropped.
pub struct Manager<T> {
    requests: mpsc::Sender<ManagerRequest<T>>,
    locks: LockClient,
    events: broadcast::Sender<TaskEvent>,
    shutdown: CancellationToken,
}

impl<T> Clone for Manager<T> {
    fn clone(&self) -> Self {
        Self {
            requests: self.requests.clone(),
            locks: self.locks.clone(),
            events: self.events.clone(),
            shutdown: self.shutdown.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> Manager<T> {
    /// Start a manager on the current tokio runtime with the tokio executor.
    pub fn spawn(config: ManagerConfig) -> Result<(Self, JoinHandle<Result<()>>)> {
        Self::spawn_with_executor(config, TokioExecutor::new)
    }

    /// Start a manager with a custom executor backend.
    ///
    /// `make_executor` receives the channel the executor must report attempt
    /// results on.
    pub fn spawn_with_executor<E, F>(config: ManagerConfig, make_executor: F) -> Result<(Self, JoinHandle<Result<()>>)>
    where
        E: ExecutorBackend<T> + 'static,
        F: FnOnce(mpsc::Sender<AttemptReport<T>>) -> E,
    {
        config.validate()?;

        let (requests_tx, requests_rx) = mpsc::channel(REQUEST_CHANNEL_CAPACITY);
        let (lock_tx, lock_rx) = mpsc::channel(REQUEST_CHANNEL_CAPACITY);
        let (reports_tx, reports_rx) = mpsc::channel(REQUEST_CHANNEL_CAPACITY);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let shutdown = CancellationToken::new();
        let locks = LockClient::new(lock_tx);

        let executor = make_executor(reports_tx);
        let core = CoreRuntime::new(config, std::time::Instant::now());
        let runtime = Runtime::new(
            core,
            executor,
            requests_rx,
            lock_rx,
            reports_rx,
            locks.clone(),
            events.clone(),
            shutdown.clone(),
        );

        let join = tokio::spawn(runtime.run());

        let manager = Self {
            requests: requests_tx,
            locks,
            events,
            shutdown,
        };
        Ok((manager, join))
    }

    /// Submit a task.
    ///
    /// Fails with `DuplicateTaskId` or `UnknownDependency`; nothing is
    /// registered in that case.
    pub async fn submit(
        &self,
        id: impl Into<TaskId>,
        work: UnitOfWork<T>,
        options: TaskOptions,
    ) -> std::result::Result<TaskId, TaskError> {
        let ids = self
            .submit_batch(vec![TaskSubmission::new(id, work, options)])
            .await?;
        ids.into_iter().next().ok_or(TaskError::ManagerShutdown)
    }

    /// Submit several tasks atomically. Dependencies may point at other
    /// members of the batch regardless of order; cycles are rejected with
    /// `DependencyCycle`.
    pub async fn submit_batch(
        &self,
        tasks: Vec<TaskSubmission<T>>,
    ) -> std::result::Result<Vec<TaskId>, TaskError> {
        let (reply, rx) = oneshot::channel();
        self.request(ManagerRequest::Submit { tasks, reply }).await?;
        rx.await.map_err(|_| TaskError::ManagerShutdown)?
    }

    /// Wait for a task's terminal outcome.
    pub async fn wait_for(&self, id: &str) -> std::result::Result<T, TaskError> {
        let (reply, rx) = oneshot::channel();
        self.request(ManagerRequest::WaitFor {
            id: id.to_string(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| TaskError::ManagerShutdown)?
    }

    /// Wait for several tasks. One failure does not affect the others.
    pub async fn wait_all<I, S>(&self, ids: I) -> Vec<std::result::Result<T, TaskError>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut results = Vec::new();
        for id in ids {
            results.push(self.wait_for(id.as_ref()).await);
        }
        results
    }

    /// Cancel a task. Returns `false` if it is unknown or already terminal.
    pub async fn cancel(&self, id: &str) -> bool {
        let (reply, rx) = oneshot::channel();
        let request = ManagerRequest::Cancel {
            id: id.to_string(),
            reply,
        };
        if self.request(request).await.is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Acquire a lock on behalf of `owner`, waiting up to the lock timeout.
    pub async fn acquire_resource(&self, owner: &str, resource: &str, mode: LockMode) -> bool {
        self.locks.acquire(owner, resource, mode).await.is_ok()
    }

    pub async fn release_resource(&self, owner: &str, resource: &str) -> bool {
        self.locks.release(owner, resource).await
    }

    pub async fn release_all_resources(&self, owner: &str) -> Vec<String> {
        self.locks.release_all(owner).await
    }

    /// The lock client used by `acquire_resource`, for callers that want the
    /// error instead of a `bool` or an explicit timeout.
    pub fn lock_client(&self) -> &LockClient {
        &self.locks
    }

    pub async fn stats(&self) -> std::result::Result<ManagerStats, TaskError> {
        let (reply, rx) = oneshot::channel();
        self.request(ManagerRequest::Stats { reply }).await?;
        rx.await.map_err(|_| TaskError::ManagerShutdown)
    }

    /// Drop a terminal task's record and result so the id can be reused.
    pub async fn forget(&self, id: &str) -> bool {
        let (reply, rx) = oneshot::channel();
        let request = ManagerRequest::Forget {
            id: id.to_string(),
            reply,
        };
        if self.request(request).await.is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    /// Stop the runtime loop. Pending waiters receive `ManagerShutdown` and
    /// running attempts see their cancellation token tripped.
    pub fn shutdown(&self) {
        debug!("manager shutdown requested");
        self.shutdown.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    async fn request(&self, request: ManagerRequest<T>) -> std::result::Result<(), TaskError> {
        self.requests
            .send(request)
            .await
            .map_err(|_| TaskError::ManagerShutdown)
    }
}
