// tests/core_scheduling.rs

use std::time::{Duration, Instant};

use swarmsched::config::ManagerConfig;
use swarmsched::dag::{ScheduledTask, TaskOptions, TaskRegistry, TaskState};
use swarmsched::engine::{AttemptOutcome, CoreEvent, CoreRuntime, CoreStep};
use swarmsched::locks::LockTable;
use swarmsched::metrics::CategoryEstimates;
use swarmsched::pool::WorkerPool;
use swarmsched::scheduler::Scheduler;
use swarmsched::types::{DependencyFailurePolicy, SchedulingPolicy};
use swarmsched_test_utils::builders::ManagerConfigBuilder;
use swarmsched_test_utils::init_tracing;

fn core_with(config: ManagerConfig) -> (CoreRuntime, Instant) {
    let now = Instant::now();
    (CoreRuntime::new(config, now), now)
}

fn one_worker(policy: SchedulingPolicy) -> ManagerConfig {
    ManagerConfigBuilder::new().workers(1).policy(policy).build()
}

fn dispatched(step: &CoreStep) -> Vec<ScheduledTask> {
    step.dispatched().cloned().collect()
}

fn finish_ok(core: &mut CoreRuntime, task: &ScheduledTask, elapsed: Duration, now: Instant) -> CoreStep {
    core.step(CoreEvent::AttemptFinished {
        task: task.id.clone(),
        attempt: task.attempt,
        outcome: AttemptOutcome::Success,
        elapsed,
        now,
    })
}

/// Tick a single-worker core, completing each dispatched attempt right away,
/// and return the dispatch order.
fn run_one_at_a_time(core: &mut CoreRuntime, mut now: Instant, ticks: usize) -> Vec<String> {
    let mut order = Vec::new();
    for _ in 0..ticks {
        now += Duration::from_millis(10);
        let step = core.step(CoreEvent::Tick { now });
        for task in dispatched(&step) {
            order.push(task.id.clone());
            finish_ok(core, &task, Duration::from_millis(5), now);
        }
    }
    order
}

#[test]
fn priority_policy_dispatches_highest_priority_first() {
    init_tracing();
    let (mut core, t0) = core_with(one_worker(SchedulingPolicy::Priority));

    for (id, priority) in [("p1", 1), ("p5", 5), ("p3", 3)] {
        core.submit(id.to_string(), TaskOptions::new().priority(priority), t0)
            .unwrap();
    }

    let order = run_one_at_a_time(&mut core, t0, 5);
    assert_eq!(order, vec!["p5", "p3", "p1"]);
}

#[test]
fn priority_ties_fall_back_to_submission_order() {
    init_tracing();
    let (mut core, t0) = core_with(one_worker(SchedulingPolicy::Priority));

    for id in ["first", "second", "third"] {
        core.submit(id.to_string(), TaskOptions::new().priority(2), t0)
            .unwrap();
    }

    let order = run_one_at_a_time(&mut core, t0, 5);
    assert_eq!(order, vec!["first", "second", "third"]);
}

#[test]
fn fifo_policy_ignores_priority() {
    init_tracing();
    let (mut core, t0) = core_with(one_worker(SchedulingPolicy::Fifo));

    core.submit("c".into(), TaskOptions::new().priority(1), t0).unwrap();
    core.submit("a".into(), TaskOptions::new().priority(9), t0).unwrap();
    core.submit("b".into(), TaskOptions::new().priority(5), t0).unwrap();

    let order = run_one_at_a_time(&mut core, t0, 5);
    assert_eq!(order, vec!["c", "a", "b"]);
}

#[test]
fn deadline_policy_runs_tasks_without_deadline_last() {
    init_tracing();
    let (mut core, t0) = core_with(one_worker(SchedulingPolicy::Deadline));

    core.submit("none".into(), TaskOptions::new(), t0).unwrap();
    core.submit(
        "late".into(),
        TaskOptions::new().deadline(t0 + Duration::from_secs(10)),
        t0,
    )
    .unwrap();
    core.submit(
        "soon".into(),
        TaskOptions::new().deadline(t0 + Duration::from_secs(1)),
        t0,
    )
    .unwrap();

    let order = run_one_at_a_time(&mut core, t0, 5);
    assert_eq!(order, vec!["soon", "late", "none"]);
}

#[test]
fn fair_share_round_robins_over_categories() {
    init_tracing();
    let (mut core, t0) = core_with(one_worker(SchedulingPolicy::FairShare));

    core.submit("a1".into(), TaskOptions::new().category("a"), t0).unwrap();
    core.submit("a2".into(), TaskOptions::new().category("a"), t0).unwrap();
    core.submit("a3".into(), TaskOptions::new().category("a"), t0).unwrap();
    core.submit("b1".into(), TaskOptions::new().category("b"), t0).unwrap();

    let order = run_one_at_a_time(&mut core, t0, 6);
    assert_eq!(order, vec!["a1", "b1", "a2", "a3"]);
}

#[test]
fn shortest_job_prefers_category_with_lowest_mean() {
    init_tracing();
    let (mut core, t0) = core_with(one_worker(SchedulingPolicy::ShortestJob));

    // No history yet: both categories use the default estimate, so
    // submission order decides.
    core.submit("s1".into(), TaskOptions::new().category("slow"), t0).unwrap();
    core.submit("f1".into(), TaskOptions::new().category("fast"), t0).unwrap();

    let mut now = t0;
    for (expected, elapsed_ms) in [("s1", 500), ("f1", 10)] {
        now += Duration::from_millis(10);
        let tasks = dispatched(&core.step(CoreEvent::Tick { now }));
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id, expected);
        finish_ok(&mut core, &tasks[0], Duration::from_millis(elapsed_ms), now);
    }

    core.submit("s2".into(), TaskOptions::new().category("slow"), now).unwrap();
    core.submit("f2".into(), TaskOptions::new().category("fast"), now).unwrap();

    let order = run_one_at_a_time(&mut core, now, 4);
    assert_eq!(order, vec!["f2", "s2"]);
}

#[test]
fn dependency_submitted_later_in_batch_still_runs_first() {
    init_tracing();
    let (mut core, t0) = core_with(ManagerConfigBuilder::new().workers(2).build());

    core.submit_batch(
        vec![
            ("B".to_string(), TaskOptions::new().after("A")),
            ("A".to_string(), TaskOptions::new()),
        ],
        t0,
    )
    .unwrap();

    assert_eq!(core.state_of("B"), Some(TaskState::Waiting));
    assert_eq!(core.state_of("A"), Some(TaskState::Queued));

    let first = dispatched(&core.step(CoreEvent::Tick { now: t0 }));
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].id, "A");

    // A is still running: B must not be dispatched, even with a free worker.
    let now = t0 + Duration::from_millis(10);
    assert!(dispatched(&core.step(CoreEvent::Tick { now })).is_empty());
    assert_eq!(core.state_of("B"), Some(TaskState::Waiting));

    finish_ok(&mut core, &first[0], Duration::from_millis(5), now);
    assert_eq!(core.state_of("A"), Some(TaskState::Completed));
    assert_eq!(core.state_of("B"), Some(TaskState::Queued));

    let next = dispatched(&core.step(CoreEvent::Tick {
        now: now + Duration::from_millis(10),
    }));
    assert_eq!(next.len(), 1);
    assert_eq!(next[0].id, "B");
}

#[test]
fn dependency_on_completed_task_queues_immediately() {
    init_tracing();
    let (mut core, t0) = core_with(one_worker(SchedulingPolicy::Fifo));

    core.submit("base".into(), TaskOptions::new(), t0).unwrap();
    let order = run_one_at_a_time(&mut core, t0, 1);
    assert_eq!(order, vec!["base"]);

    core.submit("later".into(), TaskOptions::new().after("base"), t0)
        .unwrap();
    assert_eq!(core.state_of("later"), Some(TaskState::Queued));
}

#[test]
fn several_free_workers_each_receive_a_task_in_one_tick() {
    init_tracing();
    let (mut core, t0) = core_with(ManagerConfigBuilder::new().workers(3).build());

    for id in ["a", "b", "c", "d"] {
        core.submit(id.to_string(), TaskOptions::new(), t0).unwrap();
    }

    let tasks = dispatched(&core.step(CoreEvent::Tick { now: t0 }));
    let ids: Vec<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b", "c"]);

    let mut workers: Vec<usize> = tasks.iter().map(|t| t.worker_id).collect();
    workers.sort();
    assert_eq!(workers, vec![0, 1, 2]);

    let stats = core.stats(t0);
    assert_eq!(stats.running, 3);
    assert_eq!(stats.queued, 1);
    assert_eq!(stats.active_workers, 3);
    assert_eq!(stats.worker_utilization, 1.0);
}

#[test]
fn pool_exhaustion_is_reported_and_tasks_stay_queued() {
    init_tracing();
    let now = Instant::now();
    let mut registry = TaskRegistry::new(DependencyFailurePolicy::Cascade, 3, Duration::from_secs(30));
    let mut pool = WorkerPool::new(1, 10);
    let mut locks = LockTable::new();
    let estimates = CategoryEstimates::new(Duration::from_secs(1));
    let mut scheduler = Scheduler::new(SchedulingPolicy::Fifo, Duration::from_secs(5));

    registry.submit("a".into(), TaskOptions::new(), now).unwrap();
    registry.submit("b".into(), TaskOptions::new(), now).unwrap();

    let step = scheduler.plan_tick(&mut registry, &mut pool, &mut locks, &estimates, now);

    assert_eq!(step.newly_dispatched.len(), 1);
    assert_eq!(step.newly_dispatched[0].id, "a");
    assert!(step.pool_exhausted);
    assert!(step.resource_timeouts.is_empty());
    assert_eq!(registry.state_of("b"), Some(TaskState::Queued));
    assert!(!pool.has_free_worker());
}

#[test]
fn idle_worker_with_lower_load_is_preferred() {
    init_tracing();
    let (mut core, t0) = core_with(ManagerConfigBuilder::new().workers(2).build());

    core.submit("A".into(), TaskOptions::new(), t0).unwrap();
    let a = dispatched(&core.step(CoreEvent::Tick { now: t0 }));
    assert_eq!(a[0].worker_id, 0);

    // Two more ticks with worker 0 busy raise its load.
    let mut now = t0;
    for _ in 0..2 {
        now += Duration::from_millis(10);
        core.step(CoreEvent::Tick { now });
    }
    assert_eq!(core.pool().worker(0).unwrap().load, 20);
    assert_eq!(core.pool().worker(1).unwrap().load, 0);

    finish_ok(&mut core, &a[0], Duration::from_millis(30), now);
    let worker0 = core.pool().worker(0).unwrap();
    assert!(!worker0.busy);
    assert_eq!(worker0.total_processed, 1);
    assert_eq!(worker0.average_process_time, Duration::from_millis(30));

    core.submit("B".into(), TaskOptions::new(), now).unwrap();
    let b = dispatched(&core.step(CoreEvent::Tick {
        now: now + Duration::from_millis(10),
    }));
    assert_eq!(b.len(), 1);
    assert_eq!(b[0].worker_id, 1);
}

#[test]
fn exclusive_resource_serializes_tasks() {
    init_tracing();
    let (mut core, t0) = core_with(ManagerConfigBuilder::new().workers(2).build());

    core.submit("w1".into(), TaskOptions::new().exclusive("X"), t0).unwrap();
    core.submit("w2".into(), TaskOptions::new().exclusive("X"), t0).unwrap();

    let first = dispatched(&core.step(CoreEvent::Tick { now: t0 }));
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].id, "w1");
    assert!(core.locks().holds("w1", "X"));
    assert_eq!(core.state_of("w2"), Some(TaskState::Queued));

    let now = t0 + Duration::from_millis(10);
    assert!(dispatched(&core.step(CoreEvent::Tick { now })).is_empty());

    finish_ok(&mut core, &first[0], Duration::from_millis(5), now);
    assert!(core.locks().held_by("w1").is_empty());

    let second = dispatched(&core.step(CoreEvent::Tick {
        now: now + Duration::from_millis(10),
    }));
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].id, "w2");
    assert!(core.locks().holds("w2", "X"));
}

#[test]
fn shared_resource_admits_concurrent_readers() {
    init_tracing();
    let (mut core, t0) = core_with(ManagerConfigBuilder::new().workers(3).build());

    core.submit("r1".into(), TaskOptions::new().shared("X"), t0).unwrap();
    core.submit("r2".into(), TaskOptions::new().shared("X"), t0).unwrap();
    core.submit("w".into(), TaskOptions::new().exclusive("X"), t0).unwrap();

    let tasks = dispatched(&core.step(CoreEvent::Tick { now: t0 }));
    let ids: Vec<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
    assert_eq!(ids, vec!["r1", "r2"]);

    let lock = core.locks().lock("X").unwrap();
    assert!(!lock.is_exclusive());
    assert_eq!(lock.readers(), vec!["r1", "r2"]);
    assert_eq!(core.state_of("w"), Some(TaskState::Queued));
}

#[test]
fn resources_are_planned_in_lexicographic_order() {
    init_tracing();
    let (mut core, t0) = core_with(ManagerConfigBuilder::new().workers(1).build());

    core.submit(
        "t".into(),
        TaskOptions::new().exclusive("zeta").shared("alpha").exclusive("mid"),
        t0,
    )
    .unwrap();

    let tasks = dispatched(&core.step(CoreEvent::Tick { now: t0 }));
    let names: Vec<&str> = tasks[0].resources.iter().map(|r| r.resource.as_str()).collect();
    assert_eq!(names, vec!["alpha", "mid", "zeta"]);
    assert_eq!(core.locks().held_by("t"), vec!["alpha", "mid", "zeta"]);
}

#[test]
fn stats_track_completed_tasks() {
    init_tracing();
    let (mut core, t0) = core_with(one_worker(SchedulingPolicy::Fifo));

    for id in ["a", "b"] {
        core.submit(id.to_string(), TaskOptions::new(), t0).unwrap();
    }
    run_one_at_a_time(&mut core, t0, 3);

    let stats = core.stats(t0 + Duration::from_secs(1));
    assert_eq!(stats.total_tasks, 2);
    assert_eq!(stats.completed, 2);
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.queued, 0);
    assert_eq!(stats.running, 0);
    assert_eq!(stats.worker_count, 1);
    assert_eq!(stats.avg_process_time, Duration::from_millis(5));
    assert!((stats.throughput - 2.0).abs() < 1e-9);
}
