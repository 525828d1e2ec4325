// src/config/mod.rs

//! Manager configuration and workload files.
//!
//! - [`model`] holds the serde types (`ManagerConfig`, `RawWorkloadFile`,
//!   `TaskEntry`).
//! - [`validate`] turns a raw workload into a validated [`WorkloadFile`].
//! - [`loader`] reads TOML from disk.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path};
pub use model::{ManagerConfig, RawWorkloadFile, TaskEntry, WorkloadFile};
