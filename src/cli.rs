// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

use crate::types::SchedulingPolicy;

/// Command-line arguments for `swarmsched`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "swarmsched",
    version,
    about = "Run a task workload with dependencies, resource locks and deadlock recovery.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the workload file (TOML).
    ///
    /// Default: `Swarm.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value = "Swarm.toml")]
    pub workload: String,

    /// Override `[manager] policy`.
    #[arg(long, value_enum, value_name = "POLICY")]
    pub policy: Option<PolicyArg>,

    /// Override `[manager] workers` (0 = available parallelism).
    #[arg(long, value_name = "N")]
    pub workers: Option<usize>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `SWARMSCHED_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print the workload, but don't run anything.
    #[arg(long)]
    pub dry_run: bool,
}

/// Scheduling policy as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum PolicyArg {
    Fifo,
    Priority,
    Deadline,
    ShortestJob,
    FairShare,
}

impl From<PolicyArg> for SchedulingPolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::Fifo => SchedulingPolicy::Fifo,
            PolicyArg::Priority => SchedulingPolicy::Priority,
            PolicyArg::Deadline => SchedulingPolicy::Deadline,
            PolicyArg::ShortestJob => SchedulingPolicy::ShortestJob,
            PolicyArg::FairShare => SchedulingPolicy::FairShare,
        }
    }
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
