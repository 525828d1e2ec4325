//! Randomised workloads driven through the pure core with synthetic time.

use std::time::{Duration, Instant};

use proptest::prelude::*;
use swarmsched::dag::{ScheduledTask, TaskOptions, TaskState};
use swarmsched::engine::{AttemptOutcome, CoreEvent, CoreRuntime};
use swarmsched::errors::TaskError;
use swarmsched::types::{LockMode, SchedulingPolicy};
use swarmsched_test_utils::builders::ManagerConfigBuilder;

const RESOURCES: [&str; 3] = ["r0", "r1", "r2"];

#[derive(Debug, Clone)]
struct TaskSpec {
    /// Indices of earlier tasks.
    deps: Vec<usize>,
    /// (resource index, exclusive)
    resources: Vec<(usize, bool)>,
    /// Failing attempts before success. With one retry allowed, 2 means the
    /// task fails for good.
    failures: u32,
    priority: i64,
}

#[derive(Debug, Clone)]
struct Workload {
    workers: usize,
    policy: SchedulingPolicy,
    tasks: Vec<TaskSpec>,
}

fn task_id(index: usize) -> String {
    format!("t{index}")
}

fn task_spec(index: usize) -> impl Strategy<Value = TaskSpec> {
    (
        proptest::collection::vec(any::<bool>(), index),
        proptest::collection::vec((0usize..RESOURCES.len(), any::<bool>()), 0..3),
        0u32..3,
        -2i64..3,
    )
        .prop_map(|(picks, resources, failures, priority)| TaskSpec {
            deps: picks
                .iter()
                .enumerate()
                .filter(|(_, picked)| **picked)
                .map(|(dep, _)| dep)
                .collect(),
            resources,
            failures,
            priority,
        })
}

fn policy() -> impl Strategy<Value = SchedulingPolicy> {
    prop_oneof![
        Just(SchedulingPolicy::Fifo),
        Just(SchedulingPolicy::Priority),
        Just(SchedulingPolicy::Deadline),
        Just(SchedulingPolicy::ShortestJob),
        Just(SchedulingPolicy::FairShare),
    ]
}

fn workload() -> impl Strategy<Value = Workload> {
    (1usize..=3, policy(), 1usize..=8).prop_flat_map(|(workers, policy, n)| {
        let tasks: Vec<_> = (0..n).map(task_spec).collect();
        (Just(workers), Just(policy), tasks).prop_map(|(workers, policy, tasks)| Workload {
            workers,
            policy,
            tasks,
        })
    })
}

fn options(spec: &TaskSpec, index: usize) -> TaskOptions {
    let mut options = TaskOptions::new()
        .priority(spec.priority)
        .max_retries(1)
        .category(if index % 2 == 0 { "even" } else { "odd" });
    for dep in &spec.deps {
        options = options.after(task_id(*dep));
    }
    for (resource, exclusive) in &spec.resources {
        options = options.lock(RESOURCES[*resource], LockMode::from_exclusive(*exclusive));
    }
    options
}

/// Whether a task should end `Completed`: it succeeds within its retry budget
/// and so does everything it depends on.
fn expected_completed(tasks: &[TaskSpec]) -> Vec<bool> {
    let mut completed: Vec<bool> = Vec::with_capacity(tasks.len());
    for spec in tasks {
        let ok = spec.failures < 2 && spec.deps.iter().all(|dep| completed[*dep]);
        completed.push(ok);
    }
    completed
}

fn check_locks(core: &CoreRuntime, ids: &[String]) -> Result<(), TestCaseError> {
    let invariants = core.locks().check_invariants();
    prop_assert!(invariants.is_ok(), "{:?}", invariants);

    for id in ids {
        let terminal = core.registry().terminal(id).is_some();
        let draining = core.registry().record_any(id).is_some();
        if terminal && !draining {
            prop_assert!(
                core.locks().held_by(id).is_empty(),
                "terminal task {} still holds {:?}",
                id,
                core.locks().held_by(id)
            );
        }
    }
    Ok(())
}

fn check_dispatch(core: &CoreRuntime, task: &ScheduledTask, spec: &TaskSpec) -> Result<(), TestCaseError> {
    for dep in &spec.deps {
        prop_assert_eq!(
            core.state_of(&task_id(*dep)),
            Some(TaskState::Completed),
            "{} dispatched before dependency {}",
            &task.id,
            task_id(*dep)
        );
    }
    for request in &task.resources {
        prop_assert!(core.locks().holds(&task.id, &request.resource));
        if request.mode.is_exclusive() {
            let holder = core.locks().lock(&request.resource).and_then(|l| l.holder());
            prop_assert_eq!(holder, Some(task.id.as_str()));
        }
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn random_workloads_respect_dependencies_and_locks(workload in workload()) {
        let start = Instant::now();
        let config = ManagerConfigBuilder::new()
            .workers(workload.workers)
            .policy(workload.policy)
            .lock_timeout_ms(3_600_000)
            .build();
        let mut core = CoreRuntime::new(config, start);

        let ids: Vec<String> = (0..workload.tasks.len()).map(task_id).collect();
        let batch = workload
            .tasks
            .iter()
            .enumerate()
            .map(|(i, spec)| (task_id(i), options(spec, i)))
            .collect();
        prop_assert!(core.submit_batch(batch, start).is_ok());

        let mut attempts_made = vec![0u32; workload.tasks.len()];
        let mut now = start;
        let max_rounds = workload.tasks.len() * 3 + 5;

        for _ in 0..max_rounds {
            if ids.iter().all(|id| core.registry().terminal(id).is_some()) {
                break;
            }

            now += Duration::from_secs(1);
            let step = core.step(CoreEvent::Tick { now });
            let running: Vec<ScheduledTask> = step.dispatched().cloned().collect();
            prop_assert!(running.len() <= workload.workers);
            check_locks(&core, &ids)?;

            for task in &running {
                let index: usize = task.id[1..].parse().expect("generated id");
                check_dispatch(&core, task, &workload.tasks[index])?;
            }

            for task in running {
                let index: usize = task.id[1..].parse().expect("generated id");
                attempts_made[index] += 1;
                let outcome = if attempts_made[index] <= workload.tasks[index].failures {
                    AttemptOutcome::Failed(TaskError::ExecutionError("boom".to_string()))
                } else {
                    AttemptOutcome::Success
                };
                core.step(CoreEvent::AttemptFinished {
                    task: task.id,
                    attempt: task.attempt,
                    outcome,
                    elapsed: Duration::from_millis(10),
                    now,
                });
                check_locks(&core, &ids)?;
            }
        }

        let expected = expected_completed(&workload.tasks);
        for (i, id) in ids.iter().enumerate() {
            let want = if expected[i] { TaskState::Completed } else { TaskState::Failed };
            prop_assert_eq!(core.state_of(id), Some(want), "task {}", id);
        }
        prop_assert_eq!(core.locks().locked_count(), 0);
        prop_assert!(core.pool().has_free_worker());

        let stats = core.stats(now);
        prop_assert_eq!(stats.completed as usize, expected.iter().filter(|ok| **ok).count());
        prop_assert_eq!(stats.running, 0);
    }
}
