// src/dag/mod.rs

//! Task registry and dependency tracking.
//!
//! - [`graph`] holds the dependency edges between live tasks.
//! - [`task_info`] provides submission options, task records and the
//!   terminal records kept after a task finishes.
//! - [`state_manager`] applies transitions that fan out along edges
//!   (queueing dependents, cascading failures).
//! - [`registry`] owns all of the above and is what the engine talks to.

pub mod graph;
pub mod registry;
pub mod state_manager;
pub mod task_info;

pub use graph::DependencyGraph;
pub use registry::TaskRegistry;
pub use task_info::{
    DEFAULT_CATEGORY, RunState, ScheduledTask, TaskOptions, TaskRecord, TaskState, TerminalOutcome,
    TerminalRecord,
};
