// src/engine/mod.rs

//! Orchestration engine.
//!
//! This module ties together:
//! - the task registry, scheduler, worker pool and lock table
//! - the deadlock detector
//! - the runtime event loop that reacts to:
//!   - scheduler and deadlock ticks
//!   - attempt reports from the executor
//!   - caller requests (submit, wait, cancel, locks, stats)
//!   - shutdown
//!
//! The pure core state machine lives in [`core`] (with its event handlers in
//! [`event_handlers`]); the async/IO shell is implemented in [`runtime`];
//! [`handle`] is the cloneable `Manager` callers use.

use std::time::{Duration, Instant};

use crate::errors::TaskError;
use crate::types::TaskId;

pub mod core;
pub mod event_handlers;
pub mod handle;
pub mod runtime;

pub use self::core::CoreRuntime;
pub use event_handlers::{CoreCommand, CoreStep};
pub use handle::{Manager, TaskSubmission};
pub use runtime::Runtime;

/// Outcome of one attempt, as the core sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    Failed(TaskError),
}

/// Events flowing into the core.
#[derive(Debug, Clone)]
pub enum CoreEvent {
    /// Scheduler tick: adjust loads, expire lock waits, dispatch.
    Tick { now: Instant },
    /// Deadlock detection pass.
    DeadlockTick { now: Instant },
    /// An attempt reported back from the executor.
    AttemptFinished {
        task: TaskId,
        attempt: u32,
        outcome: AttemptOutcome,
        elapsed: Duration,
        now: Instant,
    },
    /// Graceful shutdown requested (e.g. Ctrl-C or `Manager::shutdown`).
    ShutdownRequested,
}

/// Notifications published to `Manager::subscribe` receivers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskEvent {
    Dispatched {
        task: TaskId,
        attempt: u32,
        worker: usize,
    },
    Retrying {
        task: TaskId,
        retry: u32,
        delay: Duration,
        error: TaskError,
    },
    Completed {
        task: TaskId,
    },
    Failed {
        task: TaskId,
        error: TaskError,
    },
    DeadlockResolved {
        victim: TaskId,
        cycle: Vec<TaskId>,
    },
}
