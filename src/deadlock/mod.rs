// src/deadlock/mod.rs

//! Deadlock detection over a wait-for graph.
//!
//! - [`graph`] holds the graph and the DFS cycle search.
//! - [`detector`] builds the graph from the lock table and picks victims.
//!
//! Resolution itself (cancelling the victim, releasing its locks) lives in the
//! engine, which owns all the state involved.

pub mod detector;
pub mod graph;

pub use detector::{build_wait_for_graph, choose_victim};
pub use graph::WaitForGraph;
