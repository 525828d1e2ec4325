// src/config/validate.rs

use crate::config::model::{ManagerConfig, RawWorkloadFile, WorkloadFile};
use crate::dag::graph::find_cycle_member;
use crate::errors::{Result, SwarmError};

impl TryFrom<RawWorkloadFile> for WorkloadFile {
    type Error = crate::errors::SwarmError;

    fn try_from(raw: RawWorkloadFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_workload(&raw)?;
        Ok(WorkloadFile::new_unchecked(raw.manager, raw.task))
    }
}

impl ManagerConfig {
    /// Reject settings the runtime cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.tick_interval_ms == 0 {
            return Err(SwarmError::ConfigError(
                "[manager].tick_interval_ms must be >= 1 (got 0)".to_string(),
            ));
        }
        if self.deadlock_interval_ms == 0 {
            return Err(SwarmError::ConfigError(
                "[manager].deadlock_interval_ms must be >= 1 (got 0)".to_string(),
            ));
        }
        if self.lock_timeout_ms == 0 {
            return Err(SwarmError::ConfigError(
                "[manager].lock_timeout_ms must be >= 1 (got 0)".to_string(),
            ));
        }
        if self.default_timeout_ms == 0 {
            return Err(SwarmError::ConfigError(
                "[manager].default_timeout_ms must be >= 1 (got 0)".to_string(),
            ));
        }
        if self.load_step == 0 || self.load_step > 100 {
            return Err(SwarmError::ConfigError(format!(
                "[manager].load_step must be between 1 and 100 (got {})",
                self.load_step
            )));
        }
        if self.max_retry_delay_ms < self.retry_delay_ms {
            return Err(SwarmError::ConfigError(format!(
                "[manager].max_retry_delay_ms ({}) must be >= retry_delay_ms ({})",
                self.max_retry_delay_ms, self.retry_delay_ms
            )));
        }
        Ok(())
    }
}

fn validate_raw_workload(cfg: &RawWorkloadFile) -> Result<()> {
    ensure_has_tasks(cfg)?;
    cfg.manager.validate()?;
    validate_task_dependencies(cfg)?;
    validate_task_resources(cfg)?;
    validate_dag(cfg)?;
    Ok(())
}

fn ensure_has_tasks(cfg: &RawWorkloadFile) -> Result<()> {
    if cfg.task.is_empty() {
        return Err(SwarmError::ConfigError(
            "workload must contain at least one [task.<id>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_task_dependencies(cfg: &RawWorkloadFile) -> Result<()> {
    for (name, task) in cfg.task.iter() {
        for dep in task.after.iter() {
            if !cfg.task.contains_key(dep) {
                return Err(SwarmError::ConfigError(format!(
                    "task '{}' has unknown dependency '{}' in `after`",
                    name, dep
                )));
            }
            if dep == name {
                return Err(SwarmError::ConfigError(format!(
                    "task '{}' cannot depend on itself in `after`",
                    name
                )));
            }
        }
    }
    Ok(())
}

fn validate_task_resources(cfg: &RawWorkloadFile) -> Result<()> {
    for (name, task) in cfg.task.iter() {
        if let Some(both) = task.shared.iter().find(|r| task.exclusive.contains(r)) {
            return Err(SwarmError::ConfigError(format!(
                "task '{}' lists resource '{}' as both shared and exclusive",
                name, both
            )));
        }
    }
    Ok(())
}

fn validate_dag(cfg: &RawWorkloadFile) -> Result<()> {
    // Edge direction: dep -> task.
    let nodes: Vec<&str> = cfg.task.keys().map(|k| k.as_str()).collect();
    let edges: Vec<(&str, &str)> = cfg
        .task
        .iter()
        .flat_map(|(name, task)| task.after.iter().map(move |dep| (dep.as_str(), name.as_str())))
        .collect();

    match find_cycle_member(&nodes, &edges) {
        None => Ok(()),
        Some(node) => Err(SwarmError::ConfigError(format!(
            "cycle detected in task dependencies involving task '{}'",
            node
        ))),
    }
}
