// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod deadlock;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod locks;
pub mod logging;
pub mod metrics;
pub mod pool;
pub mod scheduler;
pub mod types;
pub mod workload;

use std::time::Instant;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::{WorkloadFile, load_and_validate};
use crate::engine::Manager;
use crate::metrics::ManagerStats;

pub use crate::engine::{TaskEvent, TaskSubmission};
pub use crate::errors::{SwarmError, TaskError};
pub use crate::exec::{TaskContext, UnitOfWork, work_fn};
pub use crate::types::{LockMode, SchedulingPolicy, TaskId};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - workload loading and CLI overrides
/// - the manager runtime
/// - simulated units of work for every declared task
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let mut workload = load_and_validate(&args.workload)?;

    if let Some(policy) = args.policy {
        workload.manager.policy = policy.into();
    }
    if let Some(workers) = args.workers {
        workload.manager.workers = workers;
    }

    if args.dry_run {
        print_dry_run(&workload);
        return Ok(());
    }

    let (manager, join) = Manager::<String>::spawn(workload.manager.clone())?;

    // Ctrl-C → graceful shutdown.
    {
        let manager = manager.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            manager.shutdown();
        });
    }

    let submissions = workload::submissions(&workload, Instant::now());
    let ids = manager.submit_batch(submissions).await?;
    info!(tasks = ids.len(), "workload submitted");

    let results = manager.wait_all(&ids).await;
    let mut failures = 0usize;
    for (id, result) in ids.iter().zip(&results) {
        match result {
            Ok(summary) => println!("  ok    {id}: {summary}"),
            Err(err) => {
                failures += 1;
                println!("  FAIL  {id}: {err}");
            }
        }
    }

    match manager.stats().await {
        Ok(stats) => print_stats(&stats),
        Err(err) => warn!(error = %err, "could not read final stats"),
    }

    manager.shutdown();
    join.await??;

    if failures > 0 {
        anyhow::bail!("{failures} of {} tasks failed", ids.len());
    }
    Ok(())
}

fn print_stats(stats: &ManagerStats) {
    println!();
    println!("stats:");
    println!("  total_tasks        = {}", stats.total_tasks);
    println!("  completed          = {}", stats.completed);
    println!("  failed             = {}", stats.failed);
    println!("  cancelled          = {}", stats.cancelled);
    println!("  retries            = {}", stats.retries);
    println!("  deadlocks_resolved = {}", stats.deadlocks_resolved);
    println!("  avg_process_time   = {:?}", stats.avg_process_time);
    println!("  throughput         = {:.2} tasks/s", stats.throughput);
}

/// Simple dry-run output: print manager settings and tasks.
fn print_dry_run(workload: &WorkloadFile) {
    let manager = &workload.manager;
    println!("swarmsched dry-run");
    println!("  manager.policy = {}", manager.policy);
    println!("  manager.workers = {}", manager.resolved_workers());
    println!("  manager.lock_timeout_ms = {}", manager.lock_timeout_ms);
    println!(
        "  manager.on_dependency_failure = {:?}",
        manager.on_dependency_failure
    );
    println!();

    println!("tasks ({}):", workload.task.len());
    for (id, task) in workload.task.iter() {
        println!("  - {id}");
        println!("      priority: {}", task.priority);
        if !task.after.is_empty() {
            println!("      after: {:?}", task.after);
        }
        if !task.shared.is_empty() {
            println!("      shared: {:?}", task.shared);
        }
        if !task.exclusive.is_empty() {
            println!("      exclusive: {:?}", task.exclusive);
        }
        if let Some(ref category) = task.category {
            println!("      category: {category}");
        }
        if let Some(ms) = task.deadline_ms {
            println!("      deadline_ms: {ms}");
        }
    }

    debug!("dry-run complete (no execution)");
}
