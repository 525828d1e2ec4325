// src/engine/core.rs

//! Pure core runtime state machine.
//!
//! This module contains a synchronous, deterministic "core runtime" that
//! consumes [`CoreEvent`]s and caller requests and produces:
//! - an updated core state
//! - a list of [`CoreCommand`]s describing what the IO shell should do next
//!
//! The async/IO-heavy shell (`engine::runtime::Runtime`) is responsible for:
//! - reading events and requests from channels
//! - sending dispatched attempts to the executor
//! - holding units of work, results, waiters and cancellation tokens
//!
//! The core takes `now` as a parameter everywhere and never reads the clock,
//! so it can be unit tested without any Tokio, channels or real time.

use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::config::ManagerConfig;
use crate::dag::{RunState, TaskOptions, TaskRegistry, TaskState};
use crate::engine::event_handlers::{CoreCommand, CoreStep};
use crate::engine::CoreEvent;
use crate::errors::TaskError;
use crate::locks::{LockTable, LockWaiter, RequestId};
use crate::metrics::{CategoryEstimates, LiveGauges, ManagerStats, StatsCollector};
use crate::pool::WorkerPool;
use crate::scheduler::Scheduler;
use crate::types::{LockMode, TaskId};

/// Pure core runtime state.
///
/// This owns the registry, scheduler, worker pool, lock table and stats.
/// It has **no** channels, no Tokio types, and does not perform any IO.
#[derive(Debug)]
pub struct CoreRuntime {
    pub(super) config: ManagerConfig,
    pub(super) registry: TaskRegistry,
    pub(super) scheduler: Scheduler,
    pub(super) pool: WorkerPool,
    pub(super) locks: LockTable,
    pub(super) stats: StatsCollector,
    pub(super) estimates: CategoryEstimates,
    next_request: RequestId,
}

impl CoreRuntime {
    pub fn new(config: ManagerConfig, now: Instant) -> Self {
        let workers = config.resolved_workers();
        info!(
            workers,
            policy = %config.policy,
            on_dependency_failure = ?config.on_dependency_failure,
            "core runtime created"
        );

        Self {
            registry: TaskRegistry::new(
                config.on_dependency_failure,
                config.default_max_retries,
                config.default_timeout(),
            ),
            scheduler: Scheduler::new(config.policy, config.lock_timeout()),
            pool: WorkerPool::new(workers, config.load_step),
            locks: LockTable::new(),
            stats: StatsCollector::new(now),
            estimates: CategoryEstimates::new(config.shortest_job_default()),
            next_request: 0,
            config,
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn locks(&self) -> &LockTable {
        &self.locks
    }

    pub fn state_of(&self, id: &str) -> Option<TaskState> {
        self.registry.state_of(id)
    }

    /// Handle a single event, updating core state and returning the resulting
    /// commands for the IO shell.
    pub fn step(&mut self, event: CoreEvent) -> CoreStep {
        match event {
            CoreEvent::Tick { now } => self.handle_tick(now),
            CoreEvent::DeadlockTick { now } => self.handle_deadlock_tick(now),
            CoreEvent::AttemptFinished {
                task,
                attempt,
                outcome,
                elapsed,
                now,
            } => self.handle_attempt_finished(&task, attempt, outcome, elapsed, now),
            CoreEvent::ShutdownRequested => {
                info!(
                    live = self.registry.live_count(),
                    running = self.pool.active_count(),
                    "core shutting down"
                );
                CoreStep::stop()
            }
        }
    }

    /// Submit one task.
    pub fn submit(&mut self, id: TaskId, options: TaskOptions, now: Instant) -> Result<CoreStep, TaskError> {
        self.submit_batch(vec![(id, options)], now)
    }

    /// Submit a set of tasks atomically; see [`TaskRegistry::submit_batch`].
    ///
    /// The returned step resolves tasks that failed at submission time
    /// (dependents of an already-failed task).
    pub fn submit_batch(
        &mut self,
        batch: Vec<(TaskId, TaskOptions)>,
        now: Instant,
    ) -> Result<CoreStep, TaskError> {
        let ids: Vec<TaskId> = batch.iter().map(|(id, _)| id.clone()).collect();
        let newly_terminal = self.registry.submit_batch(batch, now)?;

        for id in &ids {
            if let Some(record) = self.registry.record(id) {
                self.scheduler.register_category(&record.category);
            }
        }

        let mut step = CoreStep::new();
        step.commands.extend(self.resolve_terminal(&newly_terminal));
        Ok(step)
    }

    /// Cancel a task. Returns `false` if it is unknown or already terminal.
    ///
    /// A waiting or queued task is removed (and its locks and lock waits
    /// dropped) immediately. A running task has `Cancelled` recorded
    /// immediately and its token tripped; its locks go when the in-flight
    /// attempt reports back.
    pub fn cancel(&mut self, id: &str, now: Instant) -> (bool, CoreStep) {
        let Some(record) = self.registry.record(id) else {
            return (false, CoreStep::new());
        };
        let running = record.state == RunState::Running;

        let mut step = CoreStep::new();
        let newly_terminal = self
            .registry
            .cancel(id, TaskError::Cancelled, now)
            .unwrap_or_default();

        if running {
            step.commands.push(CoreCommand::SignalCancel(id.to_string()));
        } else {
            step.commands.extend(self.drop_lock_state(id, TaskError::Cancelled, now));
        }
        step.commands.extend(self.resolve_terminal(&newly_terminal));

        info!(task = %id, running, "task cancelled");
        (true, step)
    }

    /// Manual (or dynamic, from a `TaskContext`) lock request.
    ///
    /// Granted immediately when possible. Otherwise the request waits in the
    /// resource's FIFO until it can be granted or `timeout` (default: the
    /// manager's lock timeout) passes. A zero timeout never waits.
    pub fn acquire(
        &mut self,
        owner: &str,
        resource: &str,
        mode: LockMode,
        timeout: Option<Duration>,
        now: Instant,
    ) -> (RequestId, CoreStep) {
        let request = self.next_request;
        self.next_request += 1;

        let mut step = CoreStep::new();

        let granted = self.locks.already_satisfies(owner, resource, mode)
            || (!self.locks.has_waiter_for(resource) && self.locks.try_acquire(owner, resource, mode, now));
        if granted {
            step.commands.push(CoreCommand::LockReply {
                request,
                result: Ok(()),
            });
            return (request, step);
        }

        let timeout = timeout.unwrap_or_else(|| self.config.lock_timeout());
        if timeout.is_zero() {
            debug!(owner, resource, %mode, "lock unavailable and no wait requested");
            step.commands.push(CoreCommand::LockReply {
                request,
                result: Err(TaskError::ResourceAcquisitionTimeout {
                    resource: resource.to_string(),
                }),
            });
            return (request, step);
        }

        self.locks.enqueue_waiter(LockWaiter {
            request,
            owner: owner.to_string(),
            resource: resource.to_string(),
            mode,
            deadline: now + timeout,
        });
        (request, step)
    }

    /// Release one lock and re-evaluate waiters.
    pub fn release(&mut self, owner: &str, resource: &str, now: Instant) -> (bool, CoreStep) {
        let released = self.locks.release(owner, resource);
        let mut step = CoreStep::new();
        if released {
            step.commands.extend(self.grant_waiters(now));
        }
        (released, step)
    }

    /// Release every lock `owner` holds, drop its pending requests and
    /// re-evaluate waiters.
    pub fn release_all(&mut self, owner: &str, now: Instant) -> (Vec<String>, CoreStep) {
        let released = self.locks.held_by(owner);
        let mut step = CoreStep::new();
        step.commands.extend(self.drop_lock_state(owner, TaskError::Cancelled, now));
        (released, step)
    }

    /// Drop a terminal record so the id can be reused.
    pub fn forget(&mut self, id: &str) -> bool {
        self.registry.forget(id)
    }

    pub fn stats(&self, now: Instant) -> ManagerStats {
        let gauges = LiveGauges {
            total_tasks: self.registry.total_submitted(),
            waiting: self.registry.count_in(RunState::Waiting),
            queued: self.registry.count_in(RunState::Queued),
            running: self.registry.count_in(RunState::Running),
            active_workers: self.pool.active_count(),
            worker_count: self.pool.size(),
            resource_utilization: self.locks.utilization(),
            worker_utilization: self.pool.utilization(),
        };
        self.stats.snapshot(gauges, now)
    }
}
