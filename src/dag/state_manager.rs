// src/dag/state_manager.rs

//! State transitions that fan out along dependency edges.

use std::collections::HashMap;
use std::time::Instant;

use tracing::{debug, warn};

use crate::dag::DependencyGraph;
use crate::dag::task_info::{RunState, TaskRecord, TerminalOutcome, TerminalRecord};
use crate::errors::TaskError;
use crate::types::TaskId;

/// Borrowed view over the registry's maps, used for one transition at a time.
pub struct StateManager<'a> {
    graph: &'a mut DependencyGraph,
    tasks: &'a mut HashMap<TaskId, TaskRecord>,
    terminal: &'a mut HashMap<TaskId, TerminalRecord>,
}

impl<'a> StateManager<'a> {
    pub fn new(
        graph: &'a mut DependencyGraph,
        tasks: &'a mut HashMap<TaskId, TaskRecord>,
        terminal: &'a mut HashMap<TaskId, TerminalRecord>,
    ) -> Self {
        Self {
            graph,
            tasks,
            terminal,
        }
    }

    /// Record a terminal outcome for a live task and drop it from the graph.
    ///
    /// The live record is removed unless `keep_draining` is set, in which case
    /// it stays (marked `draining`) until its in-flight attempt reports back.
    pub fn finish(
        &mut self,
        id: &str,
        outcome: TerminalOutcome,
        now: Instant,
        keep_draining: bool,
    ) -> bool {
        let Some(record) = self.tasks.get_mut(id) else {
            warn!(task = %id, "terminal transition for unknown task; ignoring");
            return false;
        };
        if record.draining {
            return false;
        }

        self.terminal.insert(
            id.to_string(),
            TerminalRecord {
                outcome,
                retry_count: record.retry_count,
                process_time: record.process_time,
                finished_at: now,
            },
        );

        if keep_draining {
            record.draining = true;
        } else {
            self.tasks.remove(id);
        }
        true
    }

    /// Fan-out after `completed` finished successfully: every direct dependent
    /// loses one unmet dependency, and those reaching zero become `Queued`.
    ///
    /// Must run before `completed` is removed from the graph.
    pub fn release_dependents(&mut self, completed: &str) -> Vec<TaskId> {
        let mut newly_queued = Vec::new();

        for dependent in self.graph.dependents_of(completed) {
            let Some(record) = self.tasks.get_mut(dependent) else {
                continue;
            };
            record.unmet_deps = record.unmet_deps.saturating_sub(1);
            if record.unmet_deps == 0 && record.state == RunState::Waiting {
                record.state = RunState::Queued;
                debug!(task = %record.id, after = %completed, "dependencies satisfied; queued");
                newly_queued.push(record.id.clone());
            }
        }

        newly_queued
    }

    /// Fail every live dependent (transitively) of a failed task with
    /// `DependencyFailed(parent)`.
    ///
    /// Returns the tasks newly marked as failed, excluding the root.
    pub fn mark_dependents_failed(&mut self, failed_task: &str, now: Instant) -> Vec<TaskId> {
        let mut stack: Vec<(TaskId, TaskId)> = self
            .graph
            .dependents_of(failed_task)
            .iter()
            .map(|d| (d.clone(), failed_task.to_string()))
            .collect();

        let mut newly_failed = Vec::new();

        while let Some((id, parent)) = stack.pop() {
            if self.terminal.contains_key(&id) {
                continue;
            }
            let live = self
                .tasks
                .get(&id)
                .is_some_and(|r| r.state == RunState::Waiting);
            if !live {
                // Only tasks still waiting on the failed parent can be affected.
                continue;
            }

            debug!(task = %id, dependency = %parent, "failing dependent due to upstream failure");
            stack.extend(
                self.graph
                    .dependents_of(&id)
                    .iter()
                    .map(|d| (d.clone(), id.clone())),
            );
            self.finish(
                &id,
                TerminalOutcome::Failed(TaskError::DependencyFailed(parent)),
                now,
                false,
            );
            self.graph.remove_task(&id);
            newly_failed.push(id);
        }

        newly_failed
    }
}
