// src/dag/graph.rs

use std::collections::HashMap;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::types::TaskId;

/// Internal node structure: stores immediate deps and dependents.
#[derive(Debug, Clone, Default)]
struct DagNode {
    /// Dependencies that have not completed yet.
    deps: Vec<TaskId>,
    /// Live tasks waiting on this one.
    dependents: Vec<TaskId>,
}

/// Dependency edges between *live* tasks, keyed by task id.
///
/// Unlike a config-derived DAG this graph changes at runtime: tasks are added
/// on submission and removed once they reach a terminal state. Edges to
/// dependencies that already completed are never recorded, so an empty
/// `deps` list means "ready as far as dependencies go".
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: HashMap<TaskId, DagNode>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `id` with its still-unmet dependencies.
    ///
    /// Dependencies must already be present in the graph (or be inserted in
    /// the same batch before anything reads their dependents).
    pub fn add_task(&mut self, id: &str, unmet_deps: &[TaskId]) {
        self.nodes.entry(id.to_string()).or_default().deps = unmet_deps.to_vec();

        for dep in unmet_deps {
            self.nodes
                .entry(dep.clone())
                .or_default()
                .dependents
                .push(id.to_string());
        }
    }

    /// Drop a task and every edge touching it.
    pub fn remove_task(&mut self, id: &str) {
        let Some(node) = self.nodes.remove(id) else {
            return;
        };

        for dep in &node.deps {
            if let Some(dep_node) = self.nodes.get_mut(dep) {
                dep_node.dependents.retain(|d| d != id);
            }
        }
        for dependent in &node.dependents {
            if let Some(dependent_node) = self.nodes.get_mut(dependent) {
                dependent_node.deps.retain(|d| d != id);
            }
        }
    }

    /// Live tasks that list this one as a dependency.
    pub fn dependents_of(&self, id: &str) -> &[TaskId] {
        self.nodes
            .get(id)
            .map(|n| n.dependents.as_slice())
            .unwrap_or(&[])
    }
}

/// Return a node that takes part in a cycle, or `None` if the graph is acyclic.
///
/// Edge direction: dep -> task. Edges naming nodes outside `nodes` are still
/// added to the graph, which is harmless for cycle detection.
pub fn find_cycle_member<'a>(nodes: &[&'a str], edges: &[(&'a str, &'a str)]) -> Option<&'a str> {
    let mut graph: DiGraphMap<&'a str, ()> = DiGraphMap::new();

    for &node in nodes {
        graph.add_node(node);
    }
    for &(from, to) in edges {
        graph.add_edge(from, to, ());
    }

    match toposort(&graph, None) {
        Ok(_order) => None,
        Err(cycle) => Some(cycle.node_id()),
    }
}
