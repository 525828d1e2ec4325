#![allow(dead_code)]

use std::collections::BTreeMap;

use swarmsched::config::{ManagerConfig, RawWorkloadFile, TaskEntry, WorkloadFile};
use swarmsched::types::{DependencyFailurePolicy, SchedulingPolicy};

/// Manager config with short intervals so runtime tests finish quickly.
pub fn fast_config() -> ManagerConfig {
    ManagerConfigBuilder::new().build()
}

/// Builder for `ManagerConfig`, starting from fast test timings.
pub struct ManagerConfigBuilder {
    config: ManagerConfig,
}

impl ManagerConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ManagerConfig {
                workers: 2,
                tick_interval_ms: 5,
                deadlock_interval_ms: 20,
                lock_timeout_ms: 500,
                retry_delay_ms: 5,
                max_retry_delay_ms: 20,
                default_timeout_ms: 2000,
                ..ManagerConfig::default()
            },
        }
    }

    pub fn policy(mut self, policy: SchedulingPolicy) -> Self {
        self.config.policy = policy;
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.config.workers = workers;
        self
    }

    pub fn lock_timeout_ms(mut self, ms: u64) -> Self {
        self.config.lock_timeout_ms = ms;
        self
    }

    pub fn retry_delay_ms(mut self, base: u64, max: u64) -> Self {
        self.config.retry_delay_ms = base;
        self.config.max_retry_delay_ms = max;
        self
    }

    pub fn default_timeout_ms(mut self, ms: u64) -> Self {
        self.config.default_timeout_ms = ms;
        self
    }

    pub fn default_max_retries(mut self, retries: u32) -> Self {
        self.config.default_max_retries = retries;
        self
    }

    pub fn on_dependency_failure(mut self, policy: DependencyFailurePolicy) -> Self {
        self.config.on_dependency_failure = policy;
        self
    }

    pub fn build(self) -> ManagerConfig {
        self.config
    }
}

impl Default for ManagerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `WorkloadFile` to simplify test setup.
pub struct WorkloadBuilder {
    raw: RawWorkloadFile,
}

impl WorkloadBuilder {
    pub fn new() -> Self {
        Self {
            raw: RawWorkloadFile {
                manager: fast_config(),
                task: BTreeMap::new(),
            },
        }
    }

    pub fn manager(mut self, manager: ManagerConfig) -> Self {
        self.raw.manager = manager;
        self
    }

    pub fn with_task(mut self, id: &str, task: TaskEntry) -> Self {
        self.raw.task.insert(id.to_string(), task);
        self
    }

    pub fn raw(self) -> RawWorkloadFile {
        self.raw
    }

    pub fn build(self) -> WorkloadFile {
        WorkloadFile::try_from(self.raw).expect("Failed to build valid workload from builder")
    }
}

impl Default for WorkloadBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `TaskEntry`.
pub struct TaskEntryBuilder {
    task: TaskEntry,
}

impl TaskEntryBuilder {
    pub fn new() -> Self {
        Self {
            task: TaskEntry::default(),
        }
    }

    pub fn priority(mut self, priority: i64) -> Self {
        self.task.priority = priority;
        self
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.task.after.push(dep.to_string());
        self
    }

    pub fn shared(mut self, resource: &str) -> Self {
        self.task.shared.push(resource.to_string());
        self
    }

    pub fn exclusive(mut self, resource: &str) -> Self {
        self.task.exclusive.push(resource.to_string());
        self
    }

    pub fn category(mut self, category: &str) -> Self {
        self.task.category = Some(category.to_string());
        self
    }

    pub fn duration_ms(mut self, ms: u64) -> Self {
        self.task.duration_ms = ms;
        self
    }

    pub fn fail_attempts(mut self, n: u32) -> Self {
        self.task.fail_attempts = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.task.max_retries = Some(n);
        self
    }

    pub fn build(self) -> TaskEntry {
        self.task
    }
}

impl Default for TaskEntryBuilder {
    fn default() -> Self {
        Self::new()
    }
}
