// src/pool/mod.rs

//! Fixed-size worker pool with per-worker load scores.
//!
//! Workers are execution *slots*, not threads: the pool only tracks which
//! slot runs which task and how loaded each slot has been recently. The
//! actual work runs on the tokio executor.

use std::time::Duration;

use tracing::{debug, trace};

use crate::types::TaskId;

/// Weight of the newest sample in `average_process_time`.
pub const EMA_WEIGHT: f64 = 0.1;

#[derive(Debug, Clone)]
pub struct Worker {
    pub id: usize,
    pub busy: bool,
    pub current_task: Option<TaskId>,
    pub total_processed: u64,
    /// Exponential moving average of attempt durations.
    pub average_process_time: Duration,
    /// 0..=100; rises while busy, decays while idle.
    pub load: u8,
}

impl Worker {
    fn new(id: usize) -> Self {
        Self {
            id,
            busy: false,
            current_task: None,
            total_processed: 0,
            average_process_time: Duration::ZERO,
            load: 0,
        }
    }

    fn record_sample(&mut self, elapsed: Duration) {
        self.total_processed += 1;
        self.average_process_time = if self.total_processed == 1 {
            elapsed
        } else {
            let prev = self.average_process_time.as_secs_f64();
            let cur = elapsed.as_secs_f64();
            Duration::from_secs_f64(prev + EMA_WEIGHT * (cur - prev))
        };
    }
}

#[derive(Debug, Clone)]
pub struct WorkerPool {
    workers: Vec<Worker>,
    load_step: u8,
}

impl WorkerPool {
    /// Create `size` idle workers (at least one).
    pub fn new(size: usize, load_step: u8) -> Self {
        let size = size.max(1);
        Self {
            workers: (0..size).map(Worker::new).collect(),
            load_step,
        }
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    pub fn worker(&self, id: usize) -> Option<&Worker> {
        self.workers.get(id)
    }

    /// Per-tick load adjustment: busy workers go up, idle ones down.
    pub fn tick_loads(&mut self) {
        for worker in &mut self.workers {
            worker.load = if worker.busy {
                worker.load.saturating_add(self.load_step).min(100)
            } else {
                worker.load.saturating_sub(self.load_step)
            };
        }
    }

    /// Free workers, lowest load first, then lowest id.
    pub fn free_workers_by_load(&self) -> Vec<usize> {
        let mut free: Vec<&Worker> = self.workers.iter().filter(|w| !w.busy).collect();
        free.sort_by_key(|w| (w.load, w.id));
        free.into_iter().map(|w| w.id).collect()
    }

    /// Occupy `worker_id` with `task`. Returns `false` if the worker is unknown
    /// or already busy.
    pub fn assign(&mut self, worker_id: usize, task: &str) -> bool {
        let Some(worker) = self.workers.get_mut(worker_id) else {
            return false;
        };
        if worker.busy {
            return false;
        }
        worker.busy = true;
        worker.current_task = Some(task.to_string());
        trace!(worker = worker_id, task, "worker assigned");
        true
    }

    /// Free `worker_id` after an attempt that took `elapsed`.
    pub fn release(&mut self, worker_id: usize, elapsed: Duration) -> Option<TaskId> {
        let worker = self.workers.get_mut(worker_id)?;
        if !worker.busy {
            return None;
        }
        worker.busy = false;
        worker.record_sample(elapsed);
        let task = worker.current_task.take();
        debug!(
            worker = worker_id,
            task = ?task,
            elapsed_ms = elapsed.as_millis() as u64,
            avg_ms = worker.average_process_time.as_millis() as u64,
            "worker released"
        );
        task
    }

    pub fn active_count(&self) -> usize {
        self.workers.iter().filter(|w| w.busy).count()
    }

    pub fn has_free_worker(&self) -> bool {
        self.workers.iter().any(|w| !w.busy)
    }

    /// Busy workers / pool size.
    pub fn utilization(&self) -> f64 {
        self.active_count() as f64 / self.workers.len() as f64
    }
}
