// src/metrics/mod.rs

//! Manager statistics and per-category duration estimates.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Point-in-time snapshot returned by `Manager::stats`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ManagerStats {
    /// Tasks ever accepted by `submit`/`submit_batch`.
    pub total_tasks: u64,
    pub completed: u64,
    /// Permanent failures, cancellations included.
    pub failed: u64,
    /// Subset of `failed` ending in `Cancelled` or `DeadlockCancelled`.
    pub cancelled: u64,
    pub retries: u64,
    pub deadlocks_resolved: u64,
    pub waiting: usize,
    pub queued: usize,
    pub running: usize,
    pub active_workers: usize,
    pub worker_count: usize,
    /// Mean wall time of finished attempts.
    pub avg_process_time: Duration,
    /// Locked resources / resources ever seen.
    pub resource_utilization: f64,
    /// Busy workers / pool size.
    pub worker_utilization: f64,
    /// Completed tasks per second since the manager started.
    pub throughput: f64,
}

/// Counters owned by the core; combined with live gauges in [`StatsCollector::snapshot`].
#[derive(Debug, Clone)]
pub struct StatsCollector {
    started_at: Instant,
    completed: u64,
    failed: u64,
    cancelled: u64,
    retries: u64,
    deadlocks_resolved: u64,
    attempts: u64,
    avg_attempt_time: Duration,
}

/// Gauges sampled from the registry, pool and lock table at snapshot time.
#[derive(Debug, Clone, Copy, Default)]
pub struct LiveGauges {
    pub total_tasks: u64,
    pub waiting: usize,
    pub queued: usize,
    pub running: usize,
    pub active_workers: usize,
    pub worker_count: usize,
    pub resource_utilization: f64,
    pub worker_utilization: f64,
}

impl StatsCollector {
    pub fn new(started_at: Instant) -> Self {
        Self {
            started_at,
            completed: 0,
            failed: 0,
            cancelled: 0,
            retries: 0,
            deadlocks_resolved: 0,
            attempts: 0,
            avg_attempt_time: Duration::ZERO,
        }
    }

    pub fn record_completed(&mut self) {
        self.completed += 1;
    }

    pub fn record_failed(&mut self, cancellation: bool) {
        self.failed += 1;
        if cancellation {
            self.cancelled += 1;
        }
    }

    pub fn record_retry(&mut self) {
        self.retries += 1;
    }

    pub fn record_deadlock_resolved(&mut self) {
        self.deadlocks_resolved += 1;
    }

    /// Fold one finished attempt into the running mean.
    pub fn record_attempt(&mut self, elapsed: Duration) {
        self.attempts += 1;
        self.avg_attempt_time = incremental_mean(self.avg_attempt_time, elapsed, self.attempts);
    }

    pub fn snapshot(&self, gauges: LiveGauges, now: Instant) -> ManagerStats {
        let uptime = now.saturating_duration_since(self.started_at).as_secs_f64();
        let throughput = if uptime > 0.0 {
            self.completed as f64 / uptime
        } else {
            0.0
        };

        ManagerStats {
            total_tasks: gauges.total_tasks,
            completed: self.completed,
            failed: self.failed,
            cancelled: self.cancelled,
            retries: self.retries,
            deadlocks_resolved: self.deadlocks_resolved,
            waiting: gauges.waiting,
            queued: gauges.queued,
            running: gauges.running,
            active_workers: gauges.active_workers,
            worker_count: gauges.worker_count,
            avg_process_time: self.avg_attempt_time,
            resource_utilization: gauges.resource_utilization,
            worker_utilization: gauges.worker_utilization,
            throughput,
        }
    }
}

/// Rolling mean of successful attempt durations per category, used by the
/// shortest-job policy.
#[derive(Debug, Clone)]
pub struct CategoryEstimates {
    default: Duration,
    means: HashMap<String, (u64, Duration)>,
}

impl CategoryEstimates {
    pub fn new(default: Duration) -> Self {
        Self {
            default,
            means: HashMap::new(),
        }
    }

    pub fn record(&mut self, category: &str, elapsed: Duration) {
        let entry = self
            .means
            .entry(category.to_string())
            .or_insert((0, Duration::ZERO));
        entry.0 += 1;
        entry.1 = incremental_mean(entry.1, elapsed, entry.0);
    }

    /// Mean duration for `category`, or the configured default when nothing
    /// in that category has completed yet.
    pub fn estimate(&self, category: &str) -> Duration {
        self.means
            .get(category)
            .map(|(_, mean)| *mean)
            .unwrap_or(self.default)
    }
}

// new_avg = prev_avg + (sample - prev_avg) / count
fn incremental_mean(prev: Duration, sample: Duration, count: u64) -> Duration {
    if count <= 1 {
        return sample;
    }
    let prev_nanos = prev.as_nanos() as f64;
    let cur_nanos = sample.as_nanos() as f64;
    let avg_nanos = prev_nanos + (cur_nanos - prev_nanos) / count as f64;
    Duration::from_nanos(avg_nanos as u64)
}
