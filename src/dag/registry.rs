// src/dag/registry.rs

//! Task registry: live task records, dependency edges and terminal records.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::dag::graph::{DependencyGraph, find_cycle_member};
use crate::dag::state_manager::StateManager;
use crate::dag::task_info::{
    RunState, ScheduledTask, TaskOptions, TaskRecord, TaskState, TerminalOutcome, TerminalRecord,
};
use crate::errors::TaskError;
use crate::types::{DependencyFailurePolicy, TaskId};

/// Holds every submitted task until it is forgotten.
///
/// Live tasks (`Waiting`, `Queued`, `Running`) sit in `tasks`; once a task
/// reaches a terminal state its [`TerminalRecord`] moves to `terminal`. A task
/// cancelled while running is in both maps until its attempt reports back.
#[derive(Debug)]
pub struct TaskRegistry {
    graph: DependencyGraph,
    tasks: HashMap<TaskId, TaskRecord>,
    terminal: HashMap<TaskId, TerminalRecord>,
    next_seq: u64,
    on_dependency_failure: DependencyFailurePolicy,
    default_max_retries: u32,
    default_timeout: Duration,
}

impl TaskRegistry {
    pub fn new(
        on_dependency_failure: DependencyFailurePolicy,
        default_max_retries: u32,
        default_timeout: Duration,
    ) -> Self {
        Self {
            graph: DependencyGraph::new(),
            tasks: HashMap::new(),
            terminal: HashMap::new(),
            next_seq: 0,
            on_dependency_failure,
            default_max_retries,
            default_timeout,
        }
    }

    /// Submit one task. See [`TaskRegistry::submit_batch`].
    pub fn submit(
        &mut self,
        id: TaskId,
        options: TaskOptions,
        now: Instant,
    ) -> Result<Vec<TaskId>, TaskError> {
        self.submit_batch(vec![(id, options)], now)
    }

    /// Validate and insert a set of tasks atomically.
    ///
    /// Dependencies may name tracked tasks, terminal tasks, or other members of
    /// the batch in any order. Nothing is inserted if any check fails.
    ///
    /// Returns the tasks that became terminal during submission (dependents of
    /// an already-failed task under the cascade policy).
    pub fn submit_batch(
        &mut self,
        batch: Vec<(TaskId, TaskOptions)>,
        now: Instant,
    ) -> Result<Vec<TaskId>, TaskError> {
        self.validate_batch(&batch)?;

        let mut failed_deps: Vec<(TaskId, TaskId)> = Vec::new();
        let mut inserted: Vec<TaskId> = Vec::with_capacity(batch.len());

        for (id, options) in batch {
            let mut unmet: Vec<TaskId> = Vec::new();
            let mut failed_dep: Option<TaskId> = None;

            for dep in &options.dependencies {
                match self.terminal.get(dep).map(|r| &r.outcome) {
                    Some(TerminalOutcome::Completed) => {}
                    Some(TerminalOutcome::Failed(_)) => {
                        failed_dep.get_or_insert_with(|| dep.clone());
                    }
                    None => {
                        if !unmet.contains(dep) {
                            unmet.push(dep.clone());
                        }
                    }
                }
            }

            let mut record = TaskRecord::new(
                id.clone(),
                self.next_seq,
                options,
                self.default_max_retries,
                self.default_timeout,
                now,
            );
            self.next_seq += 1;

            record.unmet_deps = unmet.len() + usize::from(failed_dep.is_some());
            if record.unmet_deps == 0 {
                record.state = RunState::Queued;
            }

            debug!(
                task = %id,
                seq = record.seq,
                priority = record.priority,
                unmet = record.unmet_deps,
                state = ?record.state,
                "task submitted"
            );

            self.graph.add_task(&id, &unmet);
            self.tasks.insert(id.clone(), record);
            if let Some(dep) = failed_dep {
                failed_deps.push((id.clone(), dep));
            }
            inserted.push(id);
        }

        let mut newly_terminal = Vec::new();
        if self.on_dependency_failure == DependencyFailurePolicy::Cascade {
            for (id, dep) in failed_deps {
                if self.terminal.contains_key(&id) {
                    continue;
                }
                newly_terminal.extend(self.fail(&id, TaskError::DependencyFailed(dep), now));
            }
        }

        info!(count = inserted.len(), failed = newly_terminal.len(), "batch submitted");
        Ok(newly_terminal)
    }

    fn validate_batch(&self, batch: &[(TaskId, TaskOptions)]) -> Result<(), TaskError> {
        let mut ids: HashSet<&str> = HashSet::new();
        for (id, _) in batch {
            if self.tasks.contains_key(id) || self.terminal.contains_key(id) || !ids.insert(id.as_str()) {
                return Err(TaskError::DuplicateTaskId(id.clone()));
            }
        }

        for (id, options) in batch {
            for dep in &options.dependencies {
                if dep == id {
                    return Err(TaskError::DependencyCycle(id.clone()));
                }
                let known = self.tasks.contains_key(dep)
                    || self.terminal.contains_key(dep)
                    || ids.contains(dep.as_str());
                if !known {
                    return Err(TaskError::UnknownDependency {
                        task: id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        // Tasks outside the batch cannot depend on batch members, so a cycle
        // can only run through the batch itself.
        let nodes: Vec<&str> = batch.iter().map(|(id, _)| id.as_str()).collect();
        let mut edges: Vec<(&str, &str)> = Vec::new();
        for (id, options) in batch {
            for dep in &options.dependencies {
                if ids.contains(dep.as_str()) {
                    edges.push((dep.as_str(), id.as_str()));
                }
            }
        }

        match find_cycle_member(&nodes, &edges) {
            Some(node) => Err(TaskError::DependencyCycle(node.to_string())),
            None => Ok(()),
        }
    }

    /// Public state of a task, if it is tracked or has a terminal record.
    pub fn state_of(&self, id: &str) -> Option<TaskState> {
        if let Some(record) = self.terminal.get(id) {
            return Some(record.state());
        }
        self.tasks.get(id).map(|r| r.state.into())
    }

    /// Live (non-draining) record.
    pub fn record(&self, id: &str) -> Option<&TaskRecord> {
        self.tasks.get(id).filter(|r| !r.draining)
    }

    /// Live record, including one that is draining after cancellation.
    pub fn record_any(&self, id: &str) -> Option<&TaskRecord> {
        self.tasks.get(id)
    }

    pub fn terminal(&self, id: &str) -> Option<&TerminalRecord> {
        self.terminal.get(id)
    }

    /// Live tasks whose dependencies are satisfied, in submission order.
    pub fn queued(&self) -> Vec<&TaskRecord> {
        let mut queued: Vec<&TaskRecord> = self
            .tasks
            .values()
            .filter(|r| r.state == RunState::Queued && !r.draining)
            .collect();
        queued.sort_by_key(|r| r.seq);
        queued
    }

    /// Transition a queued task to `Running` on `worker`.
    pub fn mark_running(&mut self, id: &str, worker: usize, now: Instant) -> Option<ScheduledTask> {
        let record = self.tasks.get_mut(id)?;
        if record.state != RunState::Queued || record.draining {
            warn!(task = %id, state = ?record.state, "mark_running on a task that is not queued");
            return None;
        }

        record.state = RunState::Running;
        record.attempt += 1;
        record.worker = Some(worker);
        record.started_at = Some(now);
        record.blocked_since = None;
        record.not_before = None;

        Some(ScheduledTask::from_record(record))
    }

    /// Add attempt wall time to a live task.
    pub fn add_process_time(&mut self, id: &str, elapsed: Duration) {
        if let Some(record) = self.tasks.get_mut(id) {
            record.process_time += elapsed;
        }
    }

    /// Record success and queue dependents whose last dependency this was.
    ///
    /// Returns the newly queued dependents.
    pub fn complete(&mut self, id: &str, now: Instant) -> Vec<TaskId> {
        let mut manager = StateManager::new(&mut self.graph, &mut self.tasks, &mut self.terminal);
        if !manager.finish(id, TerminalOutcome::Completed, now, false) {
            return Vec::new();
        }
        let newly_queued = manager.release_dependents(id);
        self.graph.remove_task(id);

        info!(task = %id, unblocked = newly_queued.len(), "task completed");
        newly_queued
    }

    /// Record a permanent failure.
    ///
    /// Under the cascade policy every waiting dependent fails transitively
    /// with `DependencyFailed`; under the block policy they stay `Waiting`.
    /// Returns all newly terminal tasks, `id` first.
    pub fn fail(&mut self, id: &str, error: TaskError, now: Instant) -> Vec<TaskId> {
        self.fail_inner(id, error, now, false)
    }

    /// Cancel a task.
    ///
    /// A waiting or queued task is removed at once. A running task gets its
    /// terminal record immediately but stays tracked as draining until its
    /// attempt reports back. Returns the newly terminal tasks, or `None` if
    /// the task is not live.
    pub fn cancel(&mut self, id: &str, error: TaskError, now: Instant) -> Option<Vec<TaskId>> {
        let record = self.record(id)?;
        let running = record.state == RunState::Running;
        Some(self.fail_inner(id, error, now, running))
    }

    fn fail_inner(&mut self, id: &str, error: TaskError, now: Instant, keep_draining: bool) -> Vec<TaskId> {
        let cascade = self.on_dependency_failure == DependencyFailurePolicy::Cascade;
        let mut manager = StateManager::new(&mut self.graph, &mut self.tasks, &mut self.terminal);

        let reason = error.to_string();
        if !manager.finish(id, TerminalOutcome::Failed(error), now, keep_draining) {
            return Vec::new();
        }

        let mut newly_terminal = vec![id.to_string()];
        if cascade {
            newly_terminal.extend(manager.mark_dependents_failed(id, now));
        }
        self.graph.remove_task(id);

        warn!(task = %id, %reason, cascaded = newly_terminal.len() - 1, "task failed");
        newly_terminal
    }

    /// The in-flight attempt of a cancelled task finished; forget its live record.
    pub fn finish_draining(&mut self, id: &str) -> bool {
        match self.tasks.get(id) {
            Some(record) if record.draining => {
                self.tasks.remove(id);
                true
            }
            _ => false,
        }
    }

    /// Put a task whose attempt failed transiently back in the queue.
    pub fn schedule_retry(&mut self, id: &str, not_before: Instant) -> Option<u32> {
        let record = self.tasks.get_mut(id)?;
        record.retry_count += 1;
        record.state = RunState::Queued;
        record.not_before = Some(not_before);
        record.worker = None;
        record.started_at = None;
        record.blocked_since = None;
        Some(record.retry_count)
    }

    /// Remember when a dispatchable task was first found resource-blocked.
    pub fn note_blocked(&mut self, id: &str, now: Instant) -> Option<Instant> {
        let record = self.tasks.get_mut(id)?;
        Some(*record.blocked_since.get_or_insert(now))
    }

    pub fn clear_blocked(&mut self, id: &str) {
        if let Some(record) = self.tasks.get_mut(id) {
            record.blocked_since = None;
        }
    }

    /// Drop a terminal record so its id can be reused.
    ///
    /// Refuses while a cancelled attempt is still draining.
    pub fn forget(&mut self, id: &str) -> bool {
        if self.tasks.contains_key(id) {
            return false;
        }
        self.terminal.remove(id).is_some()
    }

    pub fn total_submitted(&self) -> u64 {
        self.next_seq
    }

    /// Count of live, non-draining tasks in `state`.
    pub fn count_in(&self, state: RunState) -> usize {
        self.tasks
            .values()
            .filter(|r| r.state == state && !r.draining)
            .count()
    }

    pub fn live_count(&self) -> usize {
        self.tasks.values().filter(|r| !r.draining).count()
    }
}
