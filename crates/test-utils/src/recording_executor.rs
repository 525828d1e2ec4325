use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use swarmsched::config::ManagerConfig;
use swarmsched::dag::ScheduledTask;
use swarmsched::engine::Manager;
use swarmsched::errors::Result;
use swarmsched::exec::{AttemptReport, ExecutorBackend, Job, TokioExecutor};

/// Dispatched attempts, in dispatch order.
pub type DispatchLog = Arc<Mutex<Vec<ScheduledTask>>>;

/// An executor that:
/// - records every dispatched attempt (task, attempt, worker)
/// - runs it on the regular tokio executor.
pub struct RecordingExecutor<T> {
    inner: TokioExecutor<T>,
    dispatched: DispatchLog,
}

impl<T: Send + 'static> RecordingExecutor<T> {
    pub fn new(reports_tx: mpsc::Sender<AttemptReport<T>>, dispatched: DispatchLog) -> Self {
        Self {
            inner: TokioExecutor::new(reports_tx),
            dispatched,
        }
    }
}

impl<T: Send + 'static> ExecutorBackend<T> for RecordingExecutor<T> {
    fn spawn_attempt(&mut self, job: Job<T>) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        {
            let mut guard = self.dispatched.lock().unwrap();
            guard.push(job.task.clone());
        }
        self.inner.spawn_attempt(job)
    }
}

/// Spawn a manager whose dispatches are recorded.
pub fn spawn_recording<T: Clone + Send + 'static>(
    config: ManagerConfig,
) -> (Manager<T>, JoinHandle<Result<()>>, DispatchLog) {
    let log: DispatchLog = Arc::new(Mutex::new(Vec::new()));
    let executor_log = Arc::clone(&log);
    let (manager, join) =
        Manager::spawn_with_executor(config, move |tx| RecordingExecutor::new(tx, executor_log))
            .expect("valid manager config");
    (manager, join, log)
}

/// Task ids of the recorded dispatches, in order.
pub fn dispatched_ids(log: &DispatchLog) -> Vec<String> {
    log.lock().unwrap().iter().map(|t| t.id.clone()).collect()
}
