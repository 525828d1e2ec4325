use std::error::Error;
use std::io::Write;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::{Duration, Instant};

use swarmsched::config::{ManagerConfig, load_and_validate, load_from_path};
use swarmsched::errors::SwarmError;
use swarmsched::locks::ResourceRequest;
use swarmsched::types::{DependencyFailurePolicy, LockMode, SchedulingPolicy};
use swarmsched_test_utils::builders::{ManagerConfigBuilder, TaskEntryBuilder, WorkloadBuilder};
use tempfile::NamedTempFile;

type TestResult = Result<(), Box<dyn Error>>;

fn workload_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("create temp file");
    file.write_all(contents.as_bytes()).expect("write temp file");
    file
}

fn config_error(contents: &str) -> String {
    let file = workload_file(contents);
    match load_and_validate(file.path()) {
        Err(SwarmError::ConfigError(msg)) => msg,
        other => panic!("expected ConfigError, got {other:?}"),
    }
}

#[test]
fn pipeline_workload_loads() -> TestResult {
    let manifest = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let workload = load_and_validate(manifest.join("workloads/pipeline.toml"))?;

    assert_eq!(workload.manager.policy, SchedulingPolicy::Priority);
    assert_eq!(workload.manager.workers, 2);
    assert_eq!(workload.manager.lock_timeout(), Duration::from_secs(2));
    assert_eq!(
        workload.task.keys().map(String::as_str).collect::<Vec<_>>(),
        vec!["compose", "fetch", "mesh-a", "mesh-b", "preview"]
    );

    let compose = &workload.task["compose"];
    assert_eq!(compose.after, vec!["mesh-a", "mesh-b"]);
    assert_eq!(compose.exclusive, vec!["scene"]);
    assert_eq!(compose.timeout_ms, Some(5000));

    Ok(())
}

#[test]
fn fair_share_workload_loads() -> TestResult {
    let manifest = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let workload = load_and_validate(manifest.join("workloads/fair-share.toml"))?;

    assert_eq!(workload.manager.policy, SchedulingPolicy::FairShare);
    assert_eq!(workload.manager.resolved_workers(), 1);
    assert_eq!(workload.task["beta-1"].category.as_deref(), Some("beta"));
    Ok(())
}

#[test]
fn missing_manager_section_uses_defaults() -> TestResult {
    let file = workload_file(
        r#"
[task.only]
duration_ms = 5
"#,
    );
    let workload = load_and_validate(file.path())?;
    let manager = &workload.manager;

    assert_eq!(manager.policy, SchedulingPolicy::Fifo);
    assert_eq!(manager.tick_interval(), Duration::from_millis(100));
    assert_eq!(manager.deadlock_interval(), Duration::from_secs(1));
    assert_eq!(manager.lock_timeout(), Duration::from_secs(5));
    assert_eq!(manager.default_timeout(), Duration::from_secs(30));
    assert_eq!(manager.default_max_retries, 3);
    assert_eq!(manager.on_dependency_failure, DependencyFailurePolicy::Cascade);
    assert!(manager.resolved_workers() >= 1);

    let only = &workload.task["only"];
    assert_eq!(only.priority, 0);
    assert!(only.after.is_empty());
    assert_eq!(only.max_retries, None);
    Ok(())
}

#[test]
fn dependency_cycle_is_rejected() {
    let msg = config_error(
        r#"
[task.a]
after = ["c"]

[task.b]
after = ["a"]

[task.c]
after = ["b"]
"#,
    );
    assert!(
        msg.contains("cycle detected in task dependencies involving task"),
        "{msg}"
    );
}

#[test]
fn unknown_dependency_is_rejected() {
    let msg = config_error(
        r#"
[task.a]
after = ["ghost"]
"#,
    );
    assert!(msg.contains("unknown dependency 'ghost'"), "{msg}");
}

#[test]
fn self_dependency_is_rejected() {
    let msg = config_error(
        r#"
[task.a]
after = ["a"]
"#,
    );
    assert!(msg.contains("cannot depend on itself"), "{msg}");
}

#[test]
fn resource_in_both_modes_is_rejected() {
    let msg = config_error(
        r#"
[task.a]
shared = ["db"]
exclusive = ["db"]
"#,
    );
    assert!(msg.contains("both shared and exclusive"), "{msg}");
}

#[test]
fn empty_workload_is_rejected() {
    let msg = config_error(
        r#"
[manager]
workers = 1
"#,
    );
    assert!(msg.contains("at least one"), "{msg}");
}

#[test]
fn unusable_manager_settings_are_rejected() {
    let zero_tick = ManagerConfigBuilder::new().build();
    let zero_tick = ManagerConfig {
        tick_interval_ms: 0,
        ..zero_tick
    };
    assert!(matches!(zero_tick.validate(), Err(SwarmError::ConfigError(msg)) if msg.contains("tick_interval_ms")));

    for load_step in [0, 101] {
        let cfg = ManagerConfig {
            load_step,
            ..ManagerConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(SwarmError::ConfigError(msg)) if msg.contains("load_step")));
    }

    let inverted = ManagerConfigBuilder::new().retry_delay_ms(500, 100).build();
    assert!(matches!(inverted.validate(), Err(SwarmError::ConfigError(msg)) if msg.contains("max_retry_delay_ms")));

    let msg = config_error(
        r#"
[manager]
lock_timeout_ms = 0

[task.a]
"#,
    );
    assert!(msg.contains("lock_timeout_ms"), "{msg}");
}

#[test]
fn malformed_toml_is_a_toml_error() {
    let file = workload_file("[task.a\nafter = ");
    assert!(matches!(load_from_path(file.path()), Err(SwarmError::TomlError(_))));

    let file = workload_file(
        r#"
[manager]
policy = "round_robin"
"#,
    );
    assert!(matches!(load_and_validate(file.path()), Err(SwarmError::TomlError(_))));
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let result = load_and_validate(dir.path().join("nope.toml"));
    assert!(matches!(result, Err(SwarmError::IoError(_))));
}

#[test]
fn task_entry_maps_onto_options() {
    let now = Instant::now();
    let entry = TaskEntryBuilder::new()
        .priority(7)
        .after("fetch")
        .shared("assets")
        .exclusive("scene")
        .category("cpu")
        .max_retries(4)
        .build();
    let entry = swarmsched::config::TaskEntry {
        deadline_ms: Some(250),
        timeout_ms: Some(1500),
        ..entry
    };

    let options = entry.to_options(now);
    assert_eq!(options.priority, 7);
    assert_eq!(options.dependencies, vec!["fetch"]);
    assert_eq!(
        options.resources,
        vec![ResourceRequest::shared("assets"), ResourceRequest::exclusive("scene")]
    );
    assert_eq!(options.category.as_deref(), Some("cpu"));
    assert_eq!(options.max_retries, Some(4));
    assert_eq!(options.timeout, Some(Duration::from_millis(1500)));
    assert_eq!(options.deadline, Some(now + Duration::from_millis(250)));
}

#[test]
fn builder_workload_validates_like_a_file() {
    let raw = WorkloadBuilder::new()
        .with_task("a", TaskEntryBuilder::new().after("b").build())
        .with_task("b", TaskEntryBuilder::new().after("a").build())
        .raw();

    let result = swarmsched::config::WorkloadFile::try_from(raw);
    assert!(matches!(result, Err(SwarmError::ConfigError(msg)) if msg.contains("cycle")));
}

#[test]
fn policy_names_parse() {
    assert_eq!(SchedulingPolicy::from_str("fifo"), Ok(SchedulingPolicy::Fifo));
    assert_eq!(SchedulingPolicy::from_str("Priority"), Ok(SchedulingPolicy::Priority));
    assert_eq!(SchedulingPolicy::from_str("edf"), Ok(SchedulingPolicy::Deadline));
    assert_eq!(SchedulingPolicy::from_str("shortest-job"), Ok(SchedulingPolicy::ShortestJob));
    assert_eq!(SchedulingPolicy::from_str("fair_share"), Ok(SchedulingPolicy::FairShare));
    assert!(SchedulingPolicy::from_str("lottery").is_err());
    assert_eq!(SchedulingPolicy::ShortestJob.to_string(), "shortest_job");

    assert_eq!(
        DependencyFailurePolicy::from_str("block"),
        Ok(DependencyFailurePolicy::Block)
    );
    assert!(DependencyFailurePolicy::from_str("ignore").is_err());

    assert_eq!(LockMode::from_exclusive(true), LockMode::Exclusive);
    assert_eq!(LockMode::Shared.to_string(), "shared");
}

#[test]
fn cli_log_levels_map_onto_filters() {
    use swarmsched::cli::LogLevel;
    use tracing::level_filters::LevelFilter;

    assert_eq!(LevelFilter::from(LogLevel::Warn), LevelFilter::WARN);
    assert_eq!(LevelFilter::from(LogLevel::Trace), LevelFilter::TRACE);
}
