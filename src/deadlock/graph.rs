// src/deadlock/graph.rs

use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::types::TaskId;

/// Wait-for graph: an edge `holder -> waiter` means `waiter` is blocked on a
/// resource `holder` has locked in a conflicting mode.
///
/// Ordered maps keep traversal, and therefore the reported cycle,
/// deterministic.
#[derive(Debug, Clone, Default)]
pub struct WaitForGraph {
    edges: BTreeMap<TaskId, BTreeSet<TaskId>>,
}

impl WaitForGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `holder -> waiter`. Self edges are ignored: an owner never waits on
    /// itself (upgrades are granted in place).
    pub fn add_edge(&mut self, holder: &str, waiter: &str) {
        if holder == waiter {
            return;
        }
        self.edges
            .entry(holder.to_string())
            .or_default()
            .insert(waiter.to_string());
        self.edges.entry(waiter.to_string()).or_default();
    }

    pub fn node_count(&self) -> usize {
        self.edges.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(|s| s.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn successors(&self, node: &str) -> impl Iterator<Item = &str> {
        self.edges
            .get(node)
            .into_iter()
            .flat_map(|set| set.iter().map(|s| s.as_str()))
    }

    /// Find one cycle with a depth-first search that tracks the recursion
    /// stack. The returned nodes are in edge order, first node not repeated.
    pub fn find_cycle(&self) -> Option<Vec<TaskId>> {
        let mut visited: HashSet<&str> = HashSet::new();
        let mut stack: Vec<&str> = Vec::new();
        let mut on_stack: HashSet<&str> = HashSet::new();

        for start in self.edges.keys() {
            if visited.contains(start.as_str()) {
                continue;
            }
            if let Some(cycle) = self.visit(start, &mut visited, &mut stack, &mut on_stack) {
                return Some(cycle);
            }
        }
        None
    }

    fn visit<'g>(
        &'g self,
        node: &'g str,
        visited: &mut HashSet<&'g str>,
        stack: &mut Vec<&'g str>,
        on_stack: &mut HashSet<&'g str>,
    ) -> Option<Vec<TaskId>> {
        visited.insert(node);
        stack.push(node);
        on_stack.insert(node);

        for next in self.successors(node) {
            if on_stack.contains(next) {
                let start = stack.iter().position(|n| *n == next).unwrap_or(0);
                return Some(stack[start..].iter().map(|n| n.to_string()).collect());
            }
            if !visited.contains(next) {
                if let Some(cycle) = self.visit(next, visited, stack, on_stack) {
                    return Some(cycle);
                }
            }
        }

        stack.pop();
        on_stack.remove(node);
        None
    }
}
