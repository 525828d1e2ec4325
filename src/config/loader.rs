// src/config/loader.rs

use std::fs;
use std::path::Path;

use crate::config::model::{RawWorkloadFile, WorkloadFile};
use crate::errors::Result;

/// Load a workload file from a given path and return the raw `RawWorkloadFile`.
///
/// This only performs TOML deserialization; it does **not** perform semantic
/// validation. Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawWorkloadFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let workload: RawWorkloadFile = toml::from_str(&contents)?;

    Ok(workload)
}

/// Load a workload file from path and validate it.
///
/// - Reads TOML.
/// - Applies defaults (handled by `serde` + `Default` impls).
/// - Checks for:
///   - unknown or self `after` references,
///   - dependency cycles,
///   - resources listed as both shared and exclusive,
///   - unusable `[manager]` settings.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<WorkloadFile> {
    let raw = load_from_path(&path)?;
    let workload = WorkloadFile::try_from(raw)?;
    Ok(workload)
}
