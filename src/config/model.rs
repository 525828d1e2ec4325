// src/config/model.rs

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use serde::Deserialize;

use crate::dag::TaskOptions;
use crate::locks::ResourceRequest;
use crate::types::{DependencyFailurePolicy, SchedulingPolicy};

/// Manager configuration, usually read from the `[manager]` section of a
/// workload file.
///
/// ```toml
/// [manager]
/// policy = "priority"
/// workers = 4
/// tick_interval_ms = 100
/// lock_timeout_ms = 5000
/// on_dependency_failure = "cascade"
/// ```
///
/// Every field has a default, so an empty section (or `ManagerConfig::default()`)
/// is a working configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ManagerConfig {
    /// Task selection policy used on every scheduler tick.
    #[serde(default)]
    pub policy: SchedulingPolicy,

    /// Number of worker slots. `0` means "available parallelism".
    #[serde(default)]
    pub workers: usize,

    /// Interval between scheduler ticks.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Interval between deadlock detection passes.
    #[serde(default = "default_deadlock_interval_ms")]
    pub deadlock_interval_ms: u64,

    /// Bounded wait for lock requests, and for queued tasks whose resources
    /// stay unobtainable.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,

    /// Base delay before a failed attempt is retried.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Upper bound for the exponential retry delay.
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,

    /// Per-attempt timeout for tasks that do not set their own.
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,

    /// `max_retries` for tasks that do not set their own.
    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,

    /// How much a worker's load score moves per tick (busy: up, idle: down).
    #[serde(default = "default_load_step")]
    pub load_step: u8,

    /// Duration estimate for categories with no completed history.
    #[serde(default = "default_shortest_job_ms")]
    pub shortest_job_default_ms: u64,

    #[serde(default)]
    pub on_dependency_failure: DependencyFailurePolicy,
}

fn default_tick_interval_ms() -> u64 {
    100
}

fn default_deadlock_interval_ms() -> u64 {
    1000
}

fn default_lock_timeout_ms() -> u64 {
    5000
}

fn default_retry_delay_ms() -> u64 {
    100
}

fn default_max_retry_delay_ms() -> u64 {
    5000
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_load_step() -> u8 {
    10
}

fn default_shortest_job_ms() -> u64 {
    1000
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            policy: SchedulingPolicy::default(),
            workers: 0,
            tick_interval_ms: default_tick_interval_ms(),
            deadlock_interval_ms: default_deadlock_interval_ms(),
            lock_timeout_ms: default_lock_timeout_ms(),
            retry_delay_ms: default_retry_delay_ms(),
            max_retry_delay_ms: default_max_retry_delay_ms(),
            default_timeout_ms: default_timeout_ms(),
            default_max_retries: default_max_retries(),
            load_step: default_load_step(),
            shortest_job_default_ms: default_shortest_job_ms(),
            on_dependency_failure: DependencyFailurePolicy::default(),
        }
    }
}

impl ManagerConfig {
    /// Resolve the worker count (0 means use available parallelism).
    pub fn resolved_workers(&self) -> usize {
        if self.workers == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        } else {
            self.workers
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn deadlock_interval(&self) -> Duration {
        Duration::from_millis(self.deadlock_interval_ms)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn shortest_job_default(&self) -> Duration {
        Duration::from_millis(self.shortest_job_default_ms)
    }

    /// Delay before retry number `retry` (1-based): base * 2^(retry-1), capped.
    pub fn retry_delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(16);
        let delay = self.retry_delay_ms.saturating_mul(1u64 << exponent);
        Duration::from_millis(delay.min(self.max_retry_delay_ms))
    }
}

/// Workload file as deserialized, before semantic validation.
#[derive(Debug, Clone, Deserialize)]
pub struct RawWorkloadFile {
    #[serde(default)]
    pub manager: ManagerConfig,

    /// All tasks from `[task.<id>]`, keyed by task id.
    #[serde(default)]
    pub task: BTreeMap<String, TaskEntry>,
}

/// A validated workload file. Construct it through `TryFrom<RawWorkloadFile>`
/// or [`crate::config::load_and_validate`].
#[derive(Debug, Clone)]
pub struct WorkloadFile {
    pub manager: ManagerConfig,
    pub task: BTreeMap<String, TaskEntry>,
}

impl WorkloadFile {
    pub(crate) fn new_unchecked(manager: ManagerConfig, task: BTreeMap<String, TaskEntry>) -> Self {
        Self { manager, task }
    }
}

/// `[task.<id>]` section.
///
/// The scheduling fields map one-to-one onto [`TaskOptions`]; `duration_ms`
/// and `fail_attempts` drive the simulated unit of work used by the CLI.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskEntry {
    #[serde(default)]
    pub priority: i64,

    /// Tasks that must complete before this one may run.
    #[serde(default)]
    pub after: Vec<String>,

    /// Resources needed for reading.
    #[serde(default)]
    pub shared: Vec<String>,

    /// Resources needed exclusively.
    #[serde(default)]
    pub exclusive: Vec<String>,

    #[serde(default)]
    pub category: Option<String>,

    /// Deadline relative to submission.
    #[serde(default)]
    pub deadline_ms: Option<u64>,

    #[serde(default)]
    pub timeout_ms: Option<u64>,

    #[serde(default)]
    pub max_retries: Option<u32>,

    /// How long the simulated work takes per attempt.
    #[serde(default)]
    pub duration_ms: u64,

    /// Number of leading attempts that fail before the work succeeds.
    #[serde(default)]
    pub fail_attempts: u32,
}

impl TaskEntry {
    /// Build submission options; relative deadlines are anchored at `now`.
    pub fn to_options(&self, now: Instant) -> TaskOptions {
        let mut options = TaskOptions::new().priority(self.priority);

        for dep in &self.after {
            options = options.after(dep.clone());
        }
        let requests = self
            .shared
            .iter()
            .map(ResourceRequest::shared)
            .chain(self.exclusive.iter().map(ResourceRequest::exclusive));
        for request in requests {
            options = options.resource(request);
        }
        if let Some(category) = &self.category {
            options = options.category(category.clone());
        }
        if let Some(ms) = self.deadline_ms {
            options = options.deadline(now + Duration::from_millis(ms));
        }
        if let Some(ms) = self.timeout_ms {
            options = options.timeout(Duration::from_millis(ms));
        }
        if let Some(retries) = self.max_retries {
            options = options.max_retries(retries);
        }
        options
    }
}
