// src/scheduler/policy.rs

//! Task selection policies.

use std::cmp::Reverse;
use std::time::Instant;

use crate::dag::TaskRecord;
use crate::metrics::CategoryEstimates;
use crate::types::{SchedulingPolicy, TaskId};

/// The fields a policy looks at, copied out of an eligible task record.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub id: TaskId,
    pub seq: u64,
    pub priority: i64,
    pub deadline: Option<Instant>,
    pub category: String,
}

impl From<&TaskRecord> for Candidate {
    fn from(record: &TaskRecord) -> Self {
        Self {
            id: record.id.clone(),
            seq: record.seq,
            priority: record.priority,
            deadline: record.deadline,
            category: record.category.clone(),
        }
    }
}

/// Selection state that survives across ticks (fair-share rotation).
#[derive(Debug, Clone, Default)]
pub struct PolicyState {
    /// Categories in first-submission order.
    categories: Vec<String>,
    /// Index into `categories` of the category served last.
    last_served: Option<usize>,
}

impl PolicyState {
    pub fn register_category(&mut self, category: &str) -> usize {
        match self.categories.iter().position(|c| c == category) {
            Some(idx) => idx,
            None => {
                self.categories.push(category.to_string());
                self.categories.len() - 1
            }
        }
    }
}

impl SchedulingPolicy {
    /// Pick one of `candidates`, or `None` if the slice is empty.
    ///
    /// Selection is deterministic for a given candidate set and state; every
    /// policy falls back to submission order on ties.
    pub fn select(
        &self,
        candidates: &[Candidate],
        estimates: &CategoryEstimates,
        state: &mut PolicyState,
    ) -> Option<usize> {
        if candidates.is_empty() {
            return None;
        }

        match self {
            SchedulingPolicy::Fifo => position_min_by_key(candidates, |c| c.seq),
            SchedulingPolicy::Priority => {
                position_min_by_key(candidates, |c| (Reverse(c.priority), c.seq))
            }
            SchedulingPolicy::Deadline => {
                // `None` sorts after every `Some` deadline.
                position_min_by_key(candidates, |c| (c.deadline.is_none(), c.deadline, c.seq))
            }
            SchedulingPolicy::ShortestJob => {
                position_min_by_key(candidates, |c| (estimates.estimate(&c.category), c.seq))
            }
            SchedulingPolicy::FairShare => select_fair_share(candidates, state),
        }
    }
}

fn position_min_by_key<K: Ord>(candidates: &[Candidate], key: impl Fn(&Candidate) -> K) -> Option<usize> {
    candidates
        .iter()
        .enumerate()
        .min_by_key(|(_, c)| key(c))
        .map(|(idx, _)| idx)
}

/// Round-robin over categories: serve the first category after the last
/// served one that has an eligible task, picking its oldest task.
fn select_fair_share(candidates: &[Candidate], state: &mut PolicyState) -> Option<usize> {
    let mut ordered: Vec<&Candidate> = candidates.iter().collect();
    ordered.sort_by_key(|c| c.seq);
    for candidate in ordered {
        state.register_category(&candidate.category);
    }

    let count = state.categories.len();
    let start = state.last_served.map(|idx| idx + 1).unwrap_or(0);

    for offset in 0..count {
        let cat_idx = (start + offset) % count;
        let category = &state.categories[cat_idx];
        let oldest = candidates
            .iter()
            .enumerate()
            .filter(|(_, c)| &c.category == category)
            .min_by_key(|(_, c)| c.seq)
            .map(|(idx, _)| idx);

        if let Some(idx) = oldest {
            state.last_served = Some(cat_idx);
            return Some(idx);
        }
    }

    None
}
