// src/locks/table.rs

//! Lock table: the single source of truth for who holds which resource.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::time::Instant;

use tracing::{debug, trace};

use crate::locks::ResourceRequest;
use crate::types::{LockMode, TaskId};

/// Identifier of a pending manual lock request.
pub type RequestId = u64;

/// State of a locked resource. An unlocked resource has no entry at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockState {
    /// Held for reading by a non-empty set of owners.
    Shared(BTreeSet<TaskId>),
    /// Held exclusively by one owner.
    Exclusive(TaskId),
}

#[derive(Debug, Clone)]
pub struct ResourceLock {
    pub resource: String,
    pub state: LockState,
    pub acquired_at: Instant,
}

impl ResourceLock {
    pub fn is_exclusive(&self) -> bool {
        matches!(self.state, LockState::Exclusive(_))
    }

    /// Exclusive holder, if any.
    pub fn holder(&self) -> Option<&str> {
        match &self.state {
            LockState::Exclusive(owner) => Some(owner.as_str()),
            LockState::Shared(_) => None,
        }
    }

    /// Shared holders (empty for an exclusive lock).
    pub fn readers(&self) -> Vec<&str> {
        match &self.state {
            LockState::Shared(readers) => readers.iter().map(|r| r.as_str()).collect(),
            LockState::Exclusive(_) => Vec::new(),
        }
    }

    fn holds(&self, owner: &str) -> bool {
        match &self.state {
            LockState::Exclusive(holder) => holder == owner,
            LockState::Shared(readers) => readers.contains(owner),
        }
    }
}

/// A lock request that could not be granted immediately.
#[derive(Debug, Clone)]
pub struct LockWaiter {
    pub request: RequestId,
    pub owner: TaskId,
    pub resource: String,
    pub mode: LockMode,
    pub deadline: Instant,
}

#[derive(Debug, Default)]
pub struct LockTable {
    locks: BTreeMap<String, ResourceLock>,
    /// Owner -> resources it currently holds (either role).
    held: HashMap<TaskId, BTreeSet<String>>,
    /// Pending requests, oldest first.
    waiters: VecDeque<LockWaiter>,
    /// Every resource name ever seen, for utilization reporting.
    known: BTreeSet<String>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `owner` could take `resource` in `mode` right now.
    pub fn can_acquire(&self, owner: &str, resource: &str, mode: LockMode) -> bool {
        match self.locks.get(resource) {
            None => true,
            Some(lock) => match (&lock.state, mode) {
                (LockState::Exclusive(holder), _) => holder == owner,
                (LockState::Shared(_), LockMode::Shared) => true,
                (LockState::Shared(readers), LockMode::Exclusive) => {
                    readers.len() == 1 && readers.contains(owner)
                }
            },
        }
    }

    /// Whether `owner` already holds `resource` in a mode that covers `mode`.
    pub fn already_satisfies(&self, owner: &str, resource: &str, mode: LockMode) -> bool {
        match self.locks.get(resource).map(|l| &l.state) {
            Some(LockState::Exclusive(holder)) => holder == owner,
            Some(LockState::Shared(readers)) => {
                mode == LockMode::Shared && readers.contains(owner)
            }
            None => false,
        }
    }

    /// Take the lock if possible. Returns `false` without side effects when the
    /// resource is held in a conflicting mode.
    ///
    /// A sole reader asking for exclusive access is upgraded in place, so an
    /// owner never appears as reader and holder at the same time.
    pub fn try_acquire(&mut self, owner: &str, resource: &str, mode: LockMode, now: Instant) -> bool {
        self.known.insert(resource.to_string());

        if !self.can_acquire(owner, resource, mode) {
            return false;
        }

        match self.locks.get_mut(resource) {
            None => {
                let state = match mode {
                    LockMode::Exclusive => LockState::Exclusive(owner.to_string()),
                    LockMode::Shared => LockState::Shared(BTreeSet::from([owner.to_string()])),
                };
                self.locks.insert(
                    resource.to_string(),
                    ResourceLock {
                        resource: resource.to_string(),
                        state,
                        acquired_at: now,
                    },
                );
            }
            Some(lock) => {
                // Exclusive here means this owner already holds it.
                let upgrade = match &mut lock.state {
                    LockState::Exclusive(_) => false,
                    LockState::Shared(readers) => match mode {
                        LockMode::Shared => {
                            readers.insert(owner.to_string());
                            false
                        }
                        LockMode::Exclusive => true,
                    },
                };
                if upgrade {
                    debug!(owner, resource, "upgrading sole shared holder to exclusive");
                    lock.state = LockState::Exclusive(owner.to_string());
                    lock.acquired_at = now;
                }
            }
        }

        self.held
            .entry(owner.to_string())
            .or_default()
            .insert(resource.to_string());
        trace!(owner, resource, %mode, "lock granted");
        true
    }

    /// Release `owner`'s hold on `resource`. Returns `false` if it held nothing.
    pub fn release(&mut self, owner: &str, resource: &str) -> bool {
        let Some(lock) = self.locks.get_mut(resource) else {
            return false;
        };

        let fully_released = match &mut lock.state {
            LockState::Exclusive(holder) => {
                if holder.as_str() != owner {
                    return false;
                }
                true
            }
            LockState::Shared(readers) => {
                if !readers.remove(owner) {
                    return false;
                }
                readers.is_empty()
            }
        };

        if fully_released {
            self.locks.remove(resource);
        }

        if let Some(resources) = self.held.get_mut(owner) {
            resources.remove(resource);
            if resources.is_empty() {
                self.held.remove(owner);
            }
        }

        trace!(owner, resource, fully_released, "lock released");
        true
    }

    /// Turn `owner`'s exclusive hold on `resource` back into a shared one.
    fn downgrade(&mut self, owner: &str, resource: &str) {
        if let Some(lock) = self.locks.get_mut(resource) {
            if lock.holder() == Some(owner) {
                lock.state = LockState::Shared(BTreeSet::from([owner.to_string()]));
                trace!(owner, resource, "exclusive hold downgraded to shared");
            }
        }
    }

    /// Release every lock held by `owner`. Returns the released resource names.
    pub fn release_all(&mut self, owner: &str) -> Vec<String> {
        let resources: Vec<String> = self
            .held
            .get(owner)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();

        for resource in &resources {
            self.release(owner, resource);
        }

        if !resources.is_empty() {
            debug!(owner, ?resources, "released all locks");
        }
        resources
    }

    pub fn can_acquire_all(&self, owner: &str, requests: &[ResourceRequest]) -> bool {
        self.first_conflict(owner, requests).is_none()
    }

    /// First resource in `requests` that `owner` cannot take right now.
    pub fn first_conflict<'r>(&self, owner: &str, requests: &'r [ResourceRequest]) -> Option<&'r str> {
        requests
            .iter()
            .find(|req| !self.can_acquire(owner, &req.resource, req.mode))
            .map(|req| req.resource.as_str())
    }

    /// Acquire a task's whole resource plan, in the given (lexicographic) order.
    ///
    /// On the first failure everything taken by *this call* is released again,
    /// shared holds it upgraded go back to shared, and the conflicting
    /// resource name is returned.
    pub fn acquire_plan(
        &mut self,
        owner: &str,
        requests: &[ResourceRequest],
        now: Instant,
    ) -> std::result::Result<(), String> {
        let mut taken: Vec<&str> = Vec::new();
        let mut upgraded: Vec<&str> = Vec::new();

        for req in requests {
            let held_before = self.holds(owner, &req.resource);
            let shared_before = held_before && !self.lock(&req.resource).is_some_and(|l| l.is_exclusive());
            if self.try_acquire(owner, &req.resource, req.mode, now) {
                if !held_before {
                    taken.push(req.resource.as_str());
                } else if shared_before && req.mode.is_exclusive() {
                    upgraded.push(req.resource.as_str());
                }
                continue;
            }

            for resource in taken {
                self.release(owner, resource);
            }
            for resource in upgraded {
                self.downgrade(owner, resource);
            }
            debug!(owner, resource = %req.resource, "resource plan failed; rolled back");
            return Err(req.resource.clone());
        }

        Ok(())
    }

    /// Owners currently holding `resource` in a mode that conflicts with `mode`
    /// for `requester`.
    pub fn conflicting_holders(&self, requester: &str, resource: &str, mode: LockMode) -> Vec<TaskId> {
        let Some(lock) = self.locks.get(resource) else {
            return Vec::new();
        };

        match (&lock.state, mode) {
            (LockState::Exclusive(holder), _) if holder != requester => vec![holder.clone()],
            (LockState::Exclusive(_), _) => Vec::new(),
            (LockState::Shared(_), LockMode::Shared) => Vec::new(),
            (LockState::Shared(readers), LockMode::Exclusive) => readers
                .iter()
                .filter(|r| r.as_str() != requester)
                .cloned()
                .collect(),
        }
    }

    /// Owners of earlier pending requests on `waiter`'s resource whose mode
    /// conflicts with it. Waiters are served in arrival order, so `waiter`
    /// cannot be granted before these.
    pub fn conflicting_waiters_ahead(&self, waiter: &LockWaiter) -> Vec<TaskId> {
        self.waiters
            .iter()
            .take_while(|w| w.request != waiter.request)
            .filter(|w| w.resource == waiter.resource && w.owner != waiter.owner)
            .filter(|w| w.mode.is_exclusive() || waiter.mode.is_exclusive())
            .map(|w| w.owner.clone())
            .collect()
    }

    pub fn holds(&self, owner: &str, resource: &str) -> bool {
        self.locks
            .get(resource)
            .map(|lock| lock.holds(owner))
            .unwrap_or(false)
    }

    pub fn lock(&self, resource: &str) -> Option<&ResourceLock> {
        self.locks.get(resource)
    }

    /// Resources held by `owner`, sorted.
    pub fn held_by(&self, owner: &str) -> Vec<String> {
        self.held
            .get(owner)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Owners holding at least one lock.
    pub fn owners(&self) -> impl Iterator<Item = &str> {
        self.held.keys().map(|s| s.as_str())
    }

    pub fn locked_count(&self) -> usize {
        self.locks.len()
    }

    pub fn known_count(&self) -> usize {
        self.known.len()
    }

    /// Fraction of known resources currently locked (0.0 when none are known).
    pub fn utilization(&self) -> f64 {
        if self.known.is_empty() {
            0.0
        } else {
            self.locks.len() as f64 / self.known.len() as f64
        }
    }

    // --- pending requests ---------------------------------------------------

    pub fn enqueue_waiter(&mut self, waiter: LockWaiter) {
        self.known.insert(waiter.resource.clone());
        debug!(
            owner = %waiter.owner,
            resource = %waiter.resource,
            mode = %waiter.mode,
            request = waiter.request,
            "lock request queued"
        );
        self.waiters.push_back(waiter);
    }

    pub fn has_waiter_for(&self, resource: &str) -> bool {
        self.waiters.iter().any(|w| w.resource == resource)
    }

    pub fn waiters(&self) -> impl Iterator<Item = &LockWaiter> {
        self.waiters.iter()
    }

    /// Grant every pending request that has become obtainable.
    ///
    /// Requests on the same resource are served strictly in arrival order: once
    /// one request on a resource cannot be granted, later ones on that resource
    /// keep waiting.
    pub fn grant_waiters(&mut self, now: Instant) -> Vec<LockWaiter> {
        let mut granted = Vec::new();
        let mut blocked: HashSet<String> = HashSet::new();
        let mut remaining = VecDeque::with_capacity(self.waiters.len());

        while let Some(waiter) = self.waiters.pop_front() {
            if blocked.contains(&waiter.resource) {
                remaining.push_back(waiter);
                continue;
            }
            if self.try_acquire(&waiter.owner, &waiter.resource, waiter.mode, now) {
                granted.push(waiter);
            } else {
                blocked.insert(waiter.resource.clone());
                remaining.push_back(waiter);
            }
        }

        self.waiters = remaining;
        granted
    }

    /// Remove and return requests whose deadline has passed.
    pub fn expire_waiters(&mut self, now: Instant) -> Vec<LockWaiter> {
        let (expired, kept): (Vec<_>, Vec<_>) =
            self.waiters.drain(..).partition(|w| w.deadline <= now);
        self.waiters = kept.into();
        expired
    }

    /// Remove and return all pending requests made by `owner`.
    pub fn remove_waiters_of(&mut self, owner: &str) -> Vec<LockWaiter> {
        let (removed, kept): (Vec<_>, Vec<_>) =
            self.waiters.drain(..).partition(|w| w.owner == owner);
        self.waiters = kept.into();
        removed
    }

    /// Check the structural invariants of the table.
    ///
    /// Every entry is either a non-empty reader set or a single holder, and the
    /// per-owner index agrees with the entries.
    pub fn check_invariants(&self) -> std::result::Result<(), String> {
        for (name, lock) in &self.locks {
            if name != &lock.resource {
                return Err(format!("lock keyed '{name}' names resource '{}'", lock.resource));
            }
            let owners: Vec<&str> = match &lock.state {
                LockState::Shared(readers) if readers.is_empty() => {
                    return Err(format!("resource '{name}' is shared by an empty reader set"));
                }
                LockState::Shared(readers) => readers.iter().map(|r| r.as_str()).collect(),
                LockState::Exclusive(holder) => vec![holder.as_str()],
            };
            for owner in owners {
                let indexed = self.held.get(owner).is_some_and(|set| set.contains(name));
                if !indexed {
                    return Err(format!("owner '{owner}' holds '{name}' but is not indexed"));
                }
            }
        }

        for (owner, resources) in &self.held {
            if resources.is_empty() {
                return Err(format!("owner '{owner}' indexed with no resources"));
            }
            for resource in resources {
                if !self.holds(owner, resource) {
                    return Err(format!("index says '{owner}' holds '{resource}' but it does not"));
                }
            }
        }

        Ok(())
    }
}
