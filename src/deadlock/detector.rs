// src/deadlock/detector.rs

use std::cmp::Reverse;

use tracing::trace;

use crate::dag::TaskRegistry;
use crate::deadlock::graph::WaitForGraph;
use crate::locks::LockTable;
use crate::types::TaskId;

/// Build the wait-for graph from the current lock state.
///
/// Pending requests are the lock table's waiters (manual and dynamic
/// acquisitions) plus the declared resources of queued, dependency-ready
/// tasks that are currently blocked. A waiter depends on the holders it
/// conflicts with and on conflicting waiters queued ahead of it.
pub fn build_wait_for_graph(locks: &LockTable, registry: &TaskRegistry) -> WaitForGraph {
    let mut graph = WaitForGraph::new();

    for waiter in locks.waiters() {
        for holder in locks.conflicting_holders(&waiter.owner, &waiter.resource, waiter.mode) {
            graph.add_edge(&holder, &waiter.owner);
        }
        for ahead in locks.conflicting_waiters_ahead(waiter) {
            graph.add_edge(&ahead, &waiter.owner);
        }
    }

    for record in registry.queued() {
        for request in &record.resources {
            for holder in locks.conflicting_holders(&record.id, &request.resource, request.mode) {
                graph.add_edge(&holder, &record.id);
            }
        }
    }

    trace!(
        nodes = graph.node_count(),
        edges = graph.edge_count(),
        "wait-for graph built"
    );
    graph
}

/// Pick the participant of `cycle` to cancel.
///
/// Owners without a live task record (manual lock owners, tasks already
/// terminal) go first; among live tasks the lowest priority, then the most
/// recent submission, then the greatest id.
pub fn choose_victim(cycle: &[TaskId], registry: &TaskRegistry) -> Option<TaskId> {
    cycle
        .iter()
        .min_by_key(|&id| match registry.record(id) {
            None => (false, i64::MIN, Reverse(u64::MAX), Reverse(id.as_str())),
            Some(record) => (true, record.priority, Reverse(record.seq), Reverse(id.as_str())),
        })
        .cloned()
}
