// src/dag/task_info.rs

//! Task metadata, submission options and per-task state.

use std::time::{Duration, Instant};

use crate::errors::TaskError;
use crate::locks::{ResourceRequest, normalize_requests};
use crate::types::{LockMode, TaskId};

/// Category used when a task does not name one.
pub const DEFAULT_CATEGORY: &str = "default";

/// Options for a submitted task.
///
/// ```
/// use std::time::Duration;
/// use swarmsched::dag::TaskOptions;
///
/// let opts = TaskOptions::new()
///     .priority(5)
///     .after("fetch")
///     .exclusive("scene")
///     .shared("mesh-cache")
///     .timeout(Duration::from_secs(2))
///     .max_retries(1);
/// assert_eq!(opts.dependencies, vec!["fetch".to_string()]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct TaskOptions {
    /// Higher runs first under the priority policy.
    pub priority: i64,
    pub deadline: Option<Instant>,
    pub dependencies: Vec<TaskId>,
    pub resources: Vec<ResourceRequest>,
    /// `None` uses the manager's `default_max_retries`.
    pub max_retries: Option<u32>,
    /// Per-attempt timeout. `None` uses the manager's `default_timeout_ms`.
    pub timeout: Option<Duration>,
    pub category: Option<String>,
}

impl TaskOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Add a dependency.
    pub fn after(mut self, dependency: impl Into<TaskId>) -> Self {
        self.dependencies.push(dependency.into());
        self
    }

    pub fn resource(mut self, request: ResourceRequest) -> Self {
        self.resources.push(request);
        self
    }

    pub fn shared(self, resource: impl Into<String>) -> Self {
        self.resource(ResourceRequest::shared(resource))
    }

    pub fn exclusive(self, resource: impl Into<String>) -> Self {
        self.resource(ResourceRequest::exclusive(resource))
    }

    /// Resource with an explicit mode.
    pub fn lock(self, resource: impl Into<String>, mode: LockMode) -> Self {
        self.resource(ResourceRequest {
            resource: resource.into(),
            mode,
        })
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }
}

/// Live state of a tracked task (internal).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Some dependency has not completed yet.
    Waiting,
    /// Dependencies satisfied; waiting for a worker and its resources.
    Queued,
    /// Dispatched to a worker.
    Running,
}

/// Public, read-only view of a task's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Waiting,
    Queued,
    Running,
    Completed,
    Failed,
}

impl From<RunState> for TaskState {
    fn from(state: RunState) -> Self {
        match state {
            RunState::Waiting => TaskState::Waiting,
            RunState::Queued => TaskState::Queued,
            RunState::Running => TaskState::Running,
        }
    }
}

/// A task tracked by the registry until it reaches a terminal state.
#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub id: TaskId,
    /// Submission order, unique and increasing.
    pub seq: u64,
    pub priority: i64,
    pub submitted_at: Instant,
    pub deadline: Option<Instant>,
    /// Normalized: unique names, sorted, exclusive wins over shared.
    pub resources: Vec<ResourceRequest>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub timeout: Duration,
    pub category: String,

    pub state: RunState,
    /// Dependencies without a Completed record yet.
    pub unmet_deps: usize,
    /// Earliest time a retry may be dispatched.
    pub not_before: Option<Instant>,
    /// When the scheduler first found this task ready but its resources taken.
    pub blocked_since: Option<Instant>,
    /// Number of attempts dispatched so far.
    pub attempt: u32,
    pub worker: Option<usize>,
    pub started_at: Option<Instant>,
    /// Accumulated wall time across attempts.
    pub process_time: Duration,
    /// Set once the task was cancelled while running: its terminal record
    /// exists, the in-flight attempt has not reported back yet.
    pub draining: bool,
}

impl TaskRecord {
    pub fn new(
        id: TaskId,
        seq: u64,
        options: TaskOptions,
        default_max_retries: u32,
        default_timeout: Duration,
        now: Instant,
    ) -> Self {
        Self {
            id,
            seq,
            priority: options.priority,
            submitted_at: now,
            deadline: options.deadline,
            resources: normalize_requests(options.resources),
            retry_count: 0,
            max_retries: options.max_retries.unwrap_or(default_max_retries),
            timeout: options.timeout.unwrap_or(default_timeout),
            category: options
                .category
                .unwrap_or_else(|| DEFAULT_CATEGORY.to_string()),
            state: RunState::Waiting,
            unmet_deps: 0,
            not_before: None,
            blocked_since: None,
            attempt: 0,
            worker: None,
            started_at: None,
            process_time: Duration::ZERO,
            draining: false,
        }
    }

    /// Queued, retry delay elapsed.
    pub fn is_dispatchable(&self, now: Instant) -> bool {
        self.state == RunState::Queued && self.not_before.is_none_or(|t| t <= now)
    }
}

/// Description of an attempt the scheduler wants the executor to run now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledTask {
    pub id: TaskId,
    /// 1-based attempt number.
    pub attempt: u32,
    pub worker_id: usize,
    pub timeout: Duration,
    pub resources: Vec<ResourceRequest>,
}

impl ScheduledTask {
    pub fn from_record(record: &TaskRecord) -> Self {
        Self {
            id: record.id.clone(),
            attempt: record.attempt,
            worker_id: record.worker.unwrap_or_default(),
            timeout: record.timeout,
            resources: record.resources.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalOutcome {
    Completed,
    Failed(TaskError),
}

/// Produced exactly once per task, kept until the task is forgotten.
#[derive(Debug, Clone)]
pub struct TerminalRecord {
    pub outcome: TerminalOutcome,
    pub retry_count: u32,
    pub process_time: Duration,
    pub finished_at: Instant,
}

impl TerminalRecord {
    pub fn state(&self) -> TaskState {
        match self.outcome {
            TerminalOutcome::Completed => TaskState::Completed,
            TerminalOutcome::Failed(_) => TaskState::Failed,
        }
    }
}
