// src/scheduler/step.rs

//! Step-by-step result type for the scheduler tick.

use crate::dag::ScheduledTask;
use crate::types::TaskId;

/// Structured result of a single scheduler tick.
///
/// Useful for tests that step the core manually and make assertions about
/// what was dispatched.
#[derive(Debug, Clone, Default)]
pub struct SchedulerStep {
    /// Attempts dispatched in this tick, in dispatch order.
    pub newly_dispatched: Vec<ScheduledTask>,
    /// Queued tasks whose resources have been unobtainable for longer than the
    /// lock timeout, with the first conflicting resource.
    pub resource_timeouts: Vec<(TaskId, String)>,
    /// Eligible work was left over with no free worker.
    pub pool_exhausted: bool,
}
