// src/engine/event_handlers.rs

//! Event handling logic for the core runtime.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::dag::{RunState, ScheduledTask, TerminalOutcome};
use crate::deadlock::{build_wait_for_graph, choose_victim};
use crate::engine::core::CoreRuntime;
use crate::engine::{AttemptOutcome, TaskEvent};
use crate::errors::TaskError;
use crate::locks::RequestId;
use crate::types::TaskId;

/// Command produced by the pure core, to be executed by the outer IO shell.
#[derive(Debug, Clone, PartialEq)]
pub enum CoreCommand {
    /// Start this attempt on the executor.
    Dispatch(ScheduledTask),
    /// Trip the cancellation token of a running attempt.
    SignalCancel(TaskId),
    /// The task reached its terminal state: wake waiters, publish the event.
    Resolve { task: TaskId, outcome: TerminalOutcome },
    /// Answer a pending lock request.
    LockReply {
        request: RequestId,
        result: Result<(), TaskError>,
    },
    /// Publish a notification that needs no other action.
    Notify(TaskEvent),
}

/// Decision returned by the core after handling a single event or request.
#[derive(Debug, Clone)]
pub struct CoreStep {
    /// Commands the IO shell should execute, in order.
    pub commands: Vec<CoreCommand>,
    /// Whether the outer runtime loop should keep running.
    pub keep_running: bool,
}

impl CoreStep {
    pub fn new() -> Self {
        Self {
            commands: Vec::new(),
            keep_running: true,
        }
    }

    pub fn stop() -> Self {
        Self {
            commands: Vec::new(),
            keep_running: false,
        }
    }

    /// Attempts dispatched by this step.
    pub fn dispatched(&self) -> impl Iterator<Item = &ScheduledTask> {
        self.commands.iter().filter_map(|c| match c {
            CoreCommand::Dispatch(task) => Some(task),
            _ => None,
        })
    }
}

impl Default for CoreStep {
    fn default() -> Self {
        Self::new()
    }
}

impl CoreRuntime {
    /// Scheduler tick.
    ///
    /// - adjust worker loads
    /// - time out expired lock waits, then grant whatever became obtainable
    /// - dispatch one eligible task per free worker
    /// - count a `ResourceAcquisitionTimeout` attempt for queued tasks starved
    ///   of their resources past the lock timeout
    pub(super) fn handle_tick(&mut self, now: Instant) -> CoreStep {
        let mut step = CoreStep::new();

        self.pool.tick_loads();

        for waiter in self.locks.expire_waiters(now) {
            debug!(owner = %waiter.owner, resource = %waiter.resource, "lock wait timed out");
            step.commands.push(CoreCommand::LockReply {
                request: waiter.request,
                result: Err(TaskError::ResourceAcquisitionTimeout {
                    resource: waiter.resource,
                }),
            });
        }
        step.commands.extend(self.grant_waiters(now));

        let planned = self.scheduler.plan_tick(
            &mut self.registry,
            &mut self.pool,
            &mut self.locks,
            &self.estimates,
            now,
        );

        for task in planned.newly_dispatched {
            step.commands.push(CoreCommand::Dispatch(task));
        }

        for (task, resource) in planned.resource_timeouts {
            warn!(task = %task, %resource, "resources unobtainable within lock timeout");
            let error = TaskError::ResourceAcquisitionTimeout { resource };
            step.commands.extend(self.fail_or_retry(&task, error, now));
        }

        step
    }

    /// An attempt reported back.
    ///
    /// Reports for attempts the core no longer considers running (stale
    /// attempt numbers, unknown tasks) are ignored. Otherwise the attempt's
    /// locks and lock waits are dropped, its worker freed, and the outcome
    /// applied. A task cancelled while running has already been resolved, so
    /// its outcome is discarded.
    pub(super) fn handle_attempt_finished(
        &mut self,
        task: &str,
        attempt: u32,
        outcome: AttemptOutcome,
        elapsed: Duration,
        now: Instant,
    ) -> CoreStep {
        let mut step = CoreStep::new();

        let Some(record) = self.registry.record_any(task) else {
            warn!(task = %task, attempt, "report for unknown task; ignoring");
            return step;
        };
        if record.state != RunState::Running || record.attempt != attempt {
            warn!(
                task = %task,
                attempt,
                current = record.attempt,
                state = ?record.state,
                "stale attempt report; ignoring"
            );
            return step;
        }
        let worker = record.worker;
        let draining = record.draining;
        let category = record.category.clone();

        step.commands.extend(self.drop_lock_state(task, TaskError::Cancelled, now));
        if let Some(worker) = worker {
            self.pool.release(worker, elapsed);
        }
        self.stats.record_attempt(elapsed);
        self.registry.add_process_time(task, elapsed);

        if draining {
            debug!(task = %task, attempt, "cancelled attempt drained");
            self.registry.finish_draining(task);
            return step;
        }

        match outcome {
            AttemptOutcome::Success => {
                self.estimates.record(&category, elapsed);
                self.registry.complete(task, now);
                step.commands
                    .extend(self.resolve_terminal(&[task.to_string()]));
            }
            AttemptOutcome::Failed(error) => {
                step.commands.extend(self.fail_or_retry(task, error, now));
            }
        }

        step
    }

    /// Retry a transient failure while retries remain; otherwise fail the
    /// task permanently (and its dependents, per the dependency policy).
    pub(super) fn fail_or_retry(&mut self, task: &str, error: TaskError, now: Instant) -> Vec<CoreCommand> {
        let Some(record) = self.registry.record(task) else {
            return Vec::new();
        };

        if error.is_transient() && record.retry_count < record.max_retries {
            let retry = record.retry_count + 1;
            let delay = self.config.retry_delay_for(retry);
            self.registry.schedule_retry(task, now + delay);
            self.stats.record_retry();
            info!(
                task = %task,
                retry,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "transient failure; retry scheduled"
            );
            return vec![CoreCommand::Notify(TaskEvent::Retrying {
                task: task.to_string(),
                retry,
                delay,
                error,
            })];
        }

        let newly_terminal = self.registry.fail(task, error, now);
        self.resolve_terminal(&newly_terminal)
    }

    /// Deadlock detection pass.
    ///
    /// Builds the wait-for graph, cancels one victim per cycle found and
    /// repeats until the graph is acyclic. The number of resolutions is
    /// bounded by the number of nodes in the first graph.
    pub(super) fn handle_deadlock_tick(&mut self, now: Instant) -> CoreStep {
        let mut step = CoreStep::new();

        let budget = build_wait_for_graph(&self.locks, &self.registry).node_count();
        for _ in 0..budget {
            let graph = build_wait_for_graph(&self.locks, &self.registry);
            let Some(cycle) = graph.find_cycle() else {
                break;
            };
            let Some(victim) = choose_victim(&cycle, &self.registry) else {
                break;
            };

            warn!(victim = %victim, ?cycle, "deadlock detected; cancelling victim");
            step.commands.extend(self.resolve_deadlock_victim(&victim, now));
            self.stats.record_deadlock_resolved();
            step.commands.push(CoreCommand::Notify(TaskEvent::DeadlockResolved {
                victim,
                cycle,
            }));
        }

        step
    }

    /// Cancel `victim` with `DeadlockCancelled` and release all of its locks
    /// and lock waits right away so the other participants can proceed.
    fn resolve_deadlock_victim(&mut self, victim: &str, now: Instant) -> Vec<CoreCommand> {
        let mut commands = Vec::new();

        let running = self
            .registry
            .record(victim)
            .map(|r| r.state == RunState::Running);

        let newly_terminal = self
            .registry
            .cancel(victim, TaskError::DeadlockCancelled, now)
            .unwrap_or_default();
        if running == Some(true) {
            commands.push(CoreCommand::SignalCancel(victim.to_string()));
        }

        commands.extend(self.drop_lock_state(victim, TaskError::DeadlockCancelled, now));
        commands.extend(self.resolve_terminal(&newly_terminal));
        commands
    }

    /// Drop every lock and pending lock request of `owner`, answering the
    /// dropped requests with `error`, then grant what became obtainable.
    pub(super) fn drop_lock_state(&mut self, owner: &str, error: TaskError, now: Instant) -> Vec<CoreCommand> {
        let mut commands: Vec<CoreCommand> = self
            .locks
            .remove_waiters_of(owner)
            .into_iter()
            .map(|waiter| CoreCommand::LockReply {
                request: waiter.request,
                result: Err(error.clone()),
            })
            .collect();

        self.locks.release_all(owner);
        commands.extend(self.grant_waiters(now));
        commands
    }

    pub(super) fn grant_waiters(&mut self, now: Instant) -> Vec<CoreCommand> {
        self.locks
            .grant_waiters(now)
            .into_iter()
            .map(|waiter| {
                debug!(owner = %waiter.owner, resource = %waiter.resource, "pending lock granted");
                CoreCommand::LockReply {
                    request: waiter.request,
                    result: Ok(()),
                }
            })
            .collect()
    }

    /// Turn newly terminal tasks into `Resolve` commands and count them.
    pub(super) fn resolve_terminal(&mut self, ids: &[TaskId]) -> Vec<CoreCommand> {
        let mut commands = Vec::with_capacity(ids.len());

        for id in ids {
            let Some(record) = self.registry.terminal(id) else {
                continue;
            };
            match &record.outcome {
                TerminalOutcome::Completed => self.stats.record_completed(),
                TerminalOutcome::Failed(err) => self.stats.record_failed(err.is_cancellation()),
            }
            commands.push(CoreCommand::Resolve {
                task: id.clone(),
                outcome: record.outcome.clone(),
            });
        }

        commands
    }
}
