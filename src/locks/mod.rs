// src/locks/mod.rs

//! Resource lock manager.
//!
//! - [`table`] holds the authoritative lock table: per-resource shared /
//!   exclusive state, the per-owner index used by `release_all`, and the FIFO
//!   of pending lock requests.
//! - [`client`] is the async handle callers (and running units of work) use to
//!   talk to the lock table owned by the runtime loop.

pub mod client;
pub mod table;

use std::collections::BTreeMap;

use crate::types::LockMode;

pub use client::LockClient;
pub use table::{LockState, LockTable, LockWaiter, RequestId, ResourceLock};

/// One resource a task declares it needs for the duration of an attempt.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceRequest {
    pub resource: String,
    pub mode: LockMode,
}

impl ResourceRequest {
    pub fn shared(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            mode: LockMode::Shared,
        }
    }

    pub fn exclusive(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            mode: LockMode::Exclusive,
        }
    }
}

/// Collapse duplicate resource names and sort lexicographically.
///
/// Acquisition always walks resources in this order. When the same resource is
/// requested twice, exclusive wins over shared.
pub fn normalize_requests(requests: impl IntoIterator<Item = ResourceRequest>) -> Vec<ResourceRequest> {
    let mut merged: BTreeMap<String, LockMode> = BTreeMap::new();
    for req in requests {
        merged
            .entry(req.resource)
            .and_modify(|mode| *mode = (*mode).max(req.mode))
            .or_insert(req.mode);
    }
    merged
        .into_iter()
        .map(|(resource, mode)| ResourceRequest { resource, mode })
        .collect()
}
