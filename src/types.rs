use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

/// Canonical task identifier used throughout the crate.
pub type TaskId = String;

/// Policy used by the scheduler tick to pick one eligible task per free worker.
///
/// - `Fifo`: oldest submission first.
/// - `Priority`: highest `priority` first, ties broken by submission order.
/// - `Deadline`: earliest deadline first; tasks without a deadline only run
///   when no deadline-bearing task is eligible.
/// - `ShortestJob`: category with the lowest historical mean duration first.
/// - `FairShare`: round-robin across categories in first-submission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulingPolicy {
    Fifo,
    Priority,
    Deadline,
    ShortestJob,
    FairShare,
}

impl Default for SchedulingPolicy {
    fn default() -> Self {
        SchedulingPolicy::Fifo
    }
}

impl FromStr for SchedulingPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "fifo" => Ok(SchedulingPolicy::Fifo),
            "priority" => Ok(SchedulingPolicy::Priority),
            "deadline" | "edf" => Ok(SchedulingPolicy::Deadline),
            "shortest_job" | "sjf" => Ok(SchedulingPolicy::ShortestJob),
            "fair_share" => Ok(SchedulingPolicy::FairShare),
            other => Err(format!(
                "invalid scheduling policy: {other} (expected fifo, priority, deadline, shortest_job or fair_share)"
            )),
        }
    }
}

impl fmt::Display for SchedulingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SchedulingPolicy::Fifo => "fifo",
            SchedulingPolicy::Priority => "priority",
            SchedulingPolicy::Deadline => "deadline",
            SchedulingPolicy::ShortestJob => "shortest_job",
            SchedulingPolicy::FairShare => "fair_share",
        };
        f.write_str(name)
    }
}

/// Access mode requested on a named resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockMode {
    /// Any number of shared holders may coexist.
    Shared,
    /// A single holder, no readers.
    Exclusive,
}

impl LockMode {
    pub fn is_exclusive(self) -> bool {
        matches!(self, LockMode::Exclusive)
    }

    /// Convenience for callers that think in terms of an `exclusive` flag.
    pub fn from_exclusive(exclusive: bool) -> Self {
        if exclusive {
            LockMode::Exclusive
        } else {
            LockMode::Shared
        }
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockMode::Shared => f.write_str("shared"),
            LockMode::Exclusive => f.write_str("exclusive"),
        }
    }
}

/// What happens to dependents when one of their dependencies fails for good.
///
/// - `Cascade` (default): dependents fail with `DependencyFailed`, transitively.
/// - `Block`: dependents stay `Waiting` until the caller cancels them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyFailurePolicy {
    Cascade,
    Block,
}

impl Default for DependencyFailurePolicy {
    fn default() -> Self {
        DependencyFailurePolicy::Cascade
    }
}

impl FromStr for DependencyFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cascade" => Ok(DependencyFailurePolicy::Cascade),
            "block" => Ok(DependencyFailurePolicy::Block),
            other => Err(format!(
                "invalid on_dependency_failure: {other} (expected \"cascade\" or \"block\")"
            )),
        }
    }
}
