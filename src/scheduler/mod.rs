// src/scheduler/mod.rs

//! Scheduler tick: match free workers with eligible tasks.
//!
//! - [`policy`] implements the selection policies.
//! - [`step`] defines the result type of one tick.

pub mod policy;
pub mod step;

use std::collections::HashSet;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::dag::TaskRegistry;
use crate::locks::LockTable;
use crate::metrics::CategoryEstimates;
use crate::pool::WorkerPool;
use crate::types::{SchedulingPolicy, TaskId};

pub use policy::{Candidate, PolicyState};
pub use step::SchedulerStep;

#[derive(Debug)]
pub struct Scheduler {
    policy: SchedulingPolicy,
    policy_state: PolicyState,
    lock_timeout: Duration,
}

impl Scheduler {
    pub fn new(policy: SchedulingPolicy, lock_timeout: Duration) -> Self {
        Self {
            policy,
            policy_state: PolicyState::default(),
            lock_timeout,
        }
    }

    /// Record a category in first-submission order (fair-share rotation).
    pub fn register_category(&mut self, category: &str) {
        self.policy_state.register_category(category);
    }

    /// Run one tick.
    ///
    /// For each free worker, lowest load first, pick one eligible task under
    /// the policy, acquire its whole resource plan and dispatch it. A task is
    /// eligible when it is queued, its retry delay has elapsed and all of its
    /// resources are obtainable right now.
    pub fn plan_tick(
        &mut self,
        registry: &mut TaskRegistry,
        pool: &mut WorkerPool,
        locks: &mut LockTable,
        estimates: &CategoryEstimates,
        now: Instant,
    ) -> SchedulerStep {
        let mut step = SchedulerStep::default();
        let mut skipped: HashSet<TaskId> = HashSet::new();

        'workers: for worker in pool.free_workers_by_load() {
            loop {
                let candidates = eligible_candidates(registry, locks, &skipped, now);
                let Some(idx) = self.policy.select(&candidates, estimates, &mut self.policy_state)
                else {
                    break 'workers;
                };
                let id = candidates[idx].id.clone();

                let resources = registry
                    .record(&id)
                    .map(|r| r.resources.clone())
                    .unwrap_or_default();

                if let Err(resource) = locks.acquire_plan(&id, &resources, now) {
                    warn!(task = %id, %resource, "resource plan failed after eligibility check; re-queued");
                    skipped.insert(id);
                    continue;
                }

                let Some(scheduled) = registry.mark_running(&id, worker, now) else {
                    locks.release_all(&id);
                    skipped.insert(id);
                    continue;
                };
                pool.assign(worker, &id);

                info!(
                    task = %id,
                    worker,
                    attempt = scheduled.attempt,
                    policy = %self.policy,
                    "dispatching task"
                );
                step.newly_dispatched.push(scheduled);
                continue 'workers;
            }
        }

        self.track_blocked(registry, locks, &mut step, now);
        step
    }

    /// Update resource-starvation bookkeeping for dispatchable tasks that were
    /// not dispatched this tick, and flag pool exhaustion.
    fn track_blocked(
        &self,
        registry: &mut TaskRegistry,
        locks: &LockTable,
        step: &mut SchedulerStep,
        now: Instant,
    ) {
        let leftover: Vec<(TaskId, Option<String>)> = registry
            .queued()
            .into_iter()
            .filter(|r| r.is_dispatchable(now))
            .map(|r| {
                let conflict = locks.first_conflict(&r.id, &r.resources).map(str::to_string);
                (r.id.clone(), conflict)
            })
            .collect();

        for (id, conflict) in leftover {
            match conflict {
                None => {
                    registry.clear_blocked(&id);
                    step.pool_exhausted = true;
                }
                Some(resource) => {
                    let Some(since) = registry.note_blocked(&id, now) else {
                        continue;
                    };
                    if now.saturating_duration_since(since) >= self.lock_timeout {
                        debug!(task = %id, %resource, "resources unobtainable past lock timeout");
                        step.resource_timeouts.push((id, resource));
                    }
                }
            }
        }

        if step.pool_exhausted {
            debug!(
                dispatched = step.newly_dispatched.len(),
                "pool exhausted; eligible tasks stay queued"
            );
        }
    }
}

fn eligible_candidates(
    registry: &TaskRegistry,
    locks: &LockTable,
    skipped: &HashSet<TaskId>,
    now: Instant,
) -> Vec<Candidate> {
    registry
        .queued()
        .into_iter()
        .filter(|r| r.is_dispatchable(now))
        .filter(|r| !skipped.contains(&r.id))
        .filter(|r| locks.can_acquire_all(&r.id, &r.resources))
        .map(Candidate::from)
        .collect()
}
