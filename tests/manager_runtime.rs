// tests/manager_runtime.rs

use std::error::Error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use swarmsched::dag::TaskOptions;
use swarmsched::engine::{Manager, TaskEvent, TaskSubmission};
use swarmsched::errors::TaskError;
use swarmsched::exec::work_fn;
use swarmsched::types::{LockMode, SchedulingPolicy};
use swarmsched::workload;
use swarmsched_test_utils::builders::{ManagerConfigBuilder, TaskEntryBuilder, WorkloadBuilder, fast_config};
use swarmsched_test_utils::recording_executor::{dispatched_ids, spawn_recording};
use swarmsched_test_utils::work::{
    failing_work, flaky_work, hanging_work, ok_work, recording_work, sleep_work,
};
use swarmsched_test_utils::{init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

#[tokio::test]
async fn submitted_task_result_is_returned_to_waiter() -> TestResult {
    init_tracing();
    let (manager, join) = Manager::<u32>::spawn(fast_config())?;

    let id = manager.submit("answer", ok_work(42), TaskOptions::new()).await?;
    assert_eq!(id, "answer");
    assert_eq!(with_timeout(manager.wait_for("answer")).await, Ok(42));

    // A completed result can be read again.
    assert_eq!(manager.wait_for("answer").await, Ok(42));
    assert_eq!(
        manager.wait_for("missing").await,
        Err(TaskError::UnknownTask("missing".to_string()))
    );

    manager.shutdown();
    join.await??;
    Ok(())
}

#[tokio::test]
async fn priority_order_with_one_worker() -> TestResult {
    init_tracing();
    let config = ManagerConfigBuilder::new()
        .workers(1)
        .policy(SchedulingPolicy::Priority)
        .build();
    let (manager, join, log) = spawn_recording::<&'static str>(config);

    let ids = manager
        .submit_batch(vec![
            TaskSubmission::new("p1", sleep_work(10, "one"), TaskOptions::new().priority(1)),
            TaskSubmission::new("p5", sleep_work(10, "five"), TaskOptions::new().priority(5)),
            TaskSubmission::new("p3", sleep_work(10, "three"), TaskOptions::new().priority(3)),
        ])
        .await?;

    let results = with_timeout(manager.wait_all(&ids)).await;
    assert_eq!(results, vec![Ok("one"), Ok("five"), Ok("three")]);
    assert_eq!(dispatched_ids(&log), vec!["p5", "p3", "p1"]);

    manager.shutdown();
    join.await??;
    Ok(())
}

#[tokio::test]
async fn dependent_never_starts_before_dependency_completes() -> TestResult {
    init_tracing();
    let (manager, join) = Manager::<()>::spawn(fast_config())?;
    let started = Arc::new(Mutex::new(Vec::new()));

    manager
        .submit_batch(vec![
            TaskSubmission::new("B", recording_work(Arc::clone(&started), 5, ()), TaskOptions::new().after("A")),
            TaskSubmission::new("A", recording_work(Arc::clone(&started), 40, ()), TaskOptions::new()),
        ])
        .await?;

    let results = with_timeout(manager.wait_all(["A", "B"])).await;
    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(*started.lock().unwrap(), vec!["A", "B"]);

    manager.shutdown();
    join.await??;
    Ok(())
}

#[tokio::test]
async fn flaky_work_is_retried_until_it_succeeds() -> TestResult {
    init_tracing();
    let (manager, join) = Manager::<&'static str>::spawn(fast_config())?;
    let (work, calls) = flaky_work(2, "done");

    manager
        .submit("flaky", work, TaskOptions::new().max_retries(2))
        .await?;
    assert_eq!(with_timeout(manager.wait_for("flaky")).await, Ok("done"));
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    let stats = manager.stats().await?;
    assert_eq!(stats.retries, 2);
    assert_eq!(stats.completed, 1);

    manager.shutdown();
    join.await??;
    Ok(())
}

#[tokio::test]
async fn always_failing_work_fails_after_three_attempts() -> TestResult {
    init_tracing();
    let (manager, join, log) = spawn_recording::<()>(fast_config());

    manager
        .submit("broken", failing_work("nope"), TaskOptions::new().max_retries(2))
        .await?;

    let result = with_timeout(manager.wait_for("broken")).await;
    assert_eq!(result, Err(TaskError::ExecutionError("nope".to_string())));

    let attempts: Vec<u32> = log.lock().unwrap().iter().map(|t| t.attempt).collect();
    assert_eq!(attempts, vec![1, 2, 3]);

    manager.shutdown();
    join.await??;
    Ok(())
}

#[tokio::test]
async fn slow_attempt_times_out() -> TestResult {
    init_tracing();
    let (manager, join) = Manager::<()>::spawn(fast_config())?;

    manager
        .submit(
            "slow",
            sleep_work(1_000, ()),
            TaskOptions::new()
                .timeout(Duration::from_millis(30))
                .max_retries(0),
        )
        .await?;

    assert_eq!(
        with_timeout(manager.wait_for("slow")).await,
        Err(TaskError::ExecutionTimeout(Duration::from_millis(30)))
    );

    manager.shutdown();
    join.await??;
    Ok(())
}

#[tokio::test]
async fn panicking_work_is_an_execution_error() -> TestResult {
    init_tracing();
    let (manager, join) = Manager::<()>::spawn(fast_config())?;

    let work = work_fn(|_ctx| async move {
        if true {
            panic!("kaboom");
        }
        Ok(())
    });
    manager
        .submit("panics", work, TaskOptions::new().max_retries(0))
        .await?;

    match with_timeout(manager.wait_for("panics")).await {
        Err(TaskError::ExecutionError(msg)) => assert!(msg.contains("kaboom"), "{msg}"),
        other => panic!("expected ExecutionError, got {other:?}"),
    }

    manager.shutdown();
    join.await??;
    Ok(())
}

#[tokio::test]
async fn one_failure_does_not_affect_other_waiters() -> TestResult {
    init_tracing();
    let (manager, join) = Manager::<u8>::spawn(fast_config())?;

    manager
        .submit_batch(vec![
            TaskSubmission::new("good", ok_work(1), TaskOptions::new()),
            TaskSubmission::new("bad", failing_work("bad"), TaskOptions::new().max_retries(0)),
            TaskSubmission::new("also-good", ok_work(2), TaskOptions::new()),
        ])
        .await?;

    let results = with_timeout(manager.wait_all(["good", "bad", "also-good"])).await;
    assert_eq!(results[0], Ok(1));
    assert_eq!(results[1], Err(TaskError::ExecutionError("bad".to_string())));
    assert_eq!(results[2], Ok(2));

    manager.shutdown();
    join.await??;
    Ok(())
}

#[tokio::test]
async fn failed_dependency_cascades_to_waiters() -> TestResult {
    init_tracing();
    let (manager, join) = Manager::<()>::spawn(fast_config())?;

    manager
        .submit_batch(vec![
            TaskSubmission::new("root", failing_work("root down"), TaskOptions::new().max_retries(0)),
            TaskSubmission::new("leaf", ok_work(()), TaskOptions::new().after("root")),
        ])
        .await?;

    assert_eq!(
        with_timeout(manager.wait_for("leaf")).await,
        Err(TaskError::DependencyFailed("root".to_string()))
    );

    manager.shutdown();
    join.await??;
    Ok(())
}

#[tokio::test]
async fn cancelling_running_task_wakes_waiter_with_cancelled() -> TestResult {
    init_tracing();
    let (manager, join) = Manager::<()>::spawn(fast_config())?;

    manager
        .submit("forever", hanging_work(), TaskOptions::new().exclusive("X"))
        .await?;

    // Wait for it to be dispatched.
    with_timeout(async {
        while manager.stats().await.map(|s| s.running).unwrap_or(0) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;

    assert!(manager.cancel("forever").await);
    assert_eq!(
        with_timeout(manager.wait_for("forever")).await,
        Err(TaskError::Cancelled)
    );
    assert!(!manager.cancel("forever").await);

    // The cancelled attempt drains and frees its lock.
    with_timeout(async {
        while !manager.acquire_resource("someone", "X", LockMode::Exclusive).await {}
    })
    .await;

    manager.shutdown();
    join.await??;
    Ok(())
}

#[tokio::test]
async fn crossed_dynamic_locks_are_broken_by_the_deadlock_detector() -> TestResult {
    init_tracing();
    let config = ManagerConfigBuilder::new().workers(2).lock_timeout_ms(2_000).build();
    let (manager, join) = Manager::<&'static str>::spawn(config)?;

    let crossed = |other: &'static str, value: &'static str| {
        work_fn(move |ctx| async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            ctx.acquire(other, LockMode::Exclusive).await?;
            Ok(value)
        })
    };

    manager
        .submit_batch(vec![
            TaskSubmission::new("T1", crossed("R2", "t1"), TaskOptions::new().exclusive("R1")),
            TaskSubmission::new("T2", crossed("R1", "t2"), TaskOptions::new().exclusive("R2")),
        ])
        .await?;

    let results = with_timeout(manager.wait_all(["T1", "T2"])).await;
    assert_eq!(results[0], Ok("t1"));
    assert_eq!(results[1], Err(TaskError::DeadlockCancelled));

    let stats = manager.stats().await?;
    assert_eq!(stats.deadlocks_resolved, 1);
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.cancelled, 1);

    manager.shutdown();
    join.await??;
    Ok(())
}

#[tokio::test]
async fn second_exclusive_acquire_waits_for_release() -> TestResult {
    init_tracing();
    let (manager, join) = Manager::<()>::spawn(fast_config())?;

    assert!(manager.acquire_resource("a", "X", LockMode::Exclusive).await);

    let contender = manager.clone();
    let second = tokio::spawn(async move { contender.acquire_resource("b", "X", LockMode::Exclusive).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!second.is_finished());

    assert!(manager.release_resource("a", "X").await);
    assert!(with_timeout(second).await?);
    assert_eq!(manager.release_all_resources("b").await, vec!["X"]);

    let refused = manager
        .lock_client()
        .acquire_with_timeout("c", "Y", LockMode::Shared, Duration::ZERO)
        .await;
    assert_eq!(refused, Ok(()));

    manager.shutdown();
    join.await??;
    Ok(())
}

#[tokio::test]
async fn lock_granted_after_requester_gave_up_is_released() -> TestResult {
    init_tracing();
    let (manager, join) = Manager::<()>::spawn(fast_config())?;

    assert!(manager.acquire_resource("a", "X", LockMode::Exclusive).await);

    let abandoned = tokio::time::timeout(
        Duration::from_millis(20),
        manager.acquire_resource("m", "X", LockMode::Exclusive),
    )
    .await;
    assert!(abandoned.is_err());

    assert!(manager.release_resource("a", "X").await);

    let taken = manager
        .lock_client()
        .acquire_with_timeout("z", "X", LockMode::Exclusive, Duration::ZERO)
        .await;
    assert_eq!(taken, Ok(()));
    assert!(manager.release_all_resources("m").await.is_empty());
    assert_eq!(manager.release_all_resources("z").await, vec!["X"]);

    manager.shutdown();
    join.await??;
    Ok(())
}

#[tokio::test]
async fn subscribers_see_task_events() -> TestResult {
    init_tracing();
    let (manager, join) = Manager::<()>::spawn(fast_config())?;
    let mut events = manager.subscribe();

    manager.submit("evented", ok_work(()), TaskOptions::new()).await?;
    with_timeout(manager.wait_for("evented")).await?;

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert!(seen.iter().any(|e| matches!(e, TaskEvent::Dispatched { task, attempt: 1, .. } if task == "evented")));
    assert!(seen.contains(&TaskEvent::Completed {
        task: "evented".to_string()
    }));

    manager.shutdown();
    join.await??;
    Ok(())
}

#[tokio::test]
async fn forget_allows_reusing_an_id() -> TestResult {
    init_tracing();
    let (manager, join) = Manager::<u8>::spawn(fast_config())?;

    manager.submit("job", ok_work(1), TaskOptions::new()).await?;
    with_timeout(manager.wait_for("job")).await?;

    assert_eq!(
        manager.submit("job", ok_work(2), TaskOptions::new()).await,
        Err(TaskError::DuplicateTaskId("job".to_string()))
    );
    assert!(manager.forget("job").await);

    manager.submit("job", ok_work(2), TaskOptions::new()).await?;
    assert_eq!(with_timeout(manager.wait_for("job")).await, Ok(2));

    manager.shutdown();
    join.await??;
    Ok(())
}

#[tokio::test]
async fn shutdown_aborts_work_that_ignores_cancellation() -> TestResult {
    init_tracing();
    let (manager, join) = Manager::<()>::spawn(fast_config())?;
    let finished = Arc::new(AtomicBool::new(false));

    let flag = Arc::clone(&finished);
    let work = work_fn(move |_ctx| {
        let flag = Arc::clone(&flag);
        async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            flag.store(true, Ordering::SeqCst);
            Ok(())
        }
    });
    manager.submit("stubborn", work, TaskOptions::new()).await?;
    tokio::time::sleep(Duration::from_millis(30)).await;

    manager.shutdown();
    join.await??;

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!finished.load(Ordering::SeqCst));
    Ok(())
}

#[tokio::test]
async fn shutdown_wakes_pending_waiters() -> TestResult {
    init_tracing();
    let (manager, join) = Manager::<()>::spawn(fast_config())?;

    manager.submit("stuck", hanging_work(), TaskOptions::new()).await?;
    let waiter = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.wait_for("stuck").await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    manager.shutdown();
    assert!(manager.is_shut_down());
    assert_eq!(with_timeout(waiter).await?, Err(TaskError::ManagerShutdown));
    join.await??;

    assert_eq!(
        manager.submit("late", ok_work(()), TaskOptions::new()).await,
        Err(TaskError::ManagerShutdown)
    );
    Ok(())
}

#[tokio::test]
async fn workload_file_tasks_run_to_completion() -> TestResult {
    init_tracing();
    let workload = WorkloadBuilder::new()
        .with_task("fetch", TaskEntryBuilder::new().duration_ms(10).exclusive("net").build())
        .with_task(
            "render",
            TaskEntryBuilder::new()
                .after("fetch")
                .shared("mesh")
                .fail_attempts(1)
                .max_retries(1)
                .duration_ms(10)
                .build(),
        )
        .build();

    let (manager, join) = Manager::<String>::spawn(workload.manager.clone())?;
    let ids = manager
        .submit_batch(workload::submissions(&workload, std::time::Instant::now()))
        .await?;
    assert_eq!(ids, vec!["fetch", "render"]);

    let results = with_timeout(manager.wait_all(&ids)).await;
    assert_eq!(results[0], Ok("fetch finished on attempt 1".to_string()));
    assert_eq!(results[1], Ok("render finished on attempt 2".to_string()));

    manager.shutdown();
    join.await??;
    Ok(())
}

#[tokio::test]
async fn work_error_wrapping_task_error_keeps_its_kind() -> TestResult {
    init_tracing();
    let (manager, join) = Manager::<()>::spawn(fast_config())?;

    let work = work_fn(|_ctx| async move { Err(anyhow!(TaskError::UnknownTask("dep".to_string()))) });
    manager.submit("wrapped", work, TaskOptions::new()).await?;

    assert_eq!(
        with_timeout(manager.wait_for("wrapped")).await,
        Err(TaskError::UnknownTask("dep".to_string()))
    );

    manager.shutdown();
    join.await??;
    Ok(())
}
