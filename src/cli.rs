// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

use crate::types::SchedulingPolicy;

/// Command-line arguments for `taskdag`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "taskdag",
    version,
    about = "Run a dependency graph of shell tasks with a bounded, pluggable scheduler.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    #[arg(long, value_name = "PATH", default_value = "Taskdag.toml")]
    pub config: String,

    /// Scheduling strategy, overriding `[scheduler].strategy`.
    ///
    /// One of fifo, priority, round_robin, preemptive_priority,
    /// shortest_job_first. Shell commands never yield, so round_robin
    /// and preemptive_priority order dispatch like fifo and priority and
    /// never interrupt a running command.
    #[arg(long, value_name = "STRATEGY")]
    pub strategy: Option<SchedulingPolicy>,

    /// Maximum number of tasks running at once, overriding
    /// `[scheduler].concurrency`.
    #[arg(long, value_name = "N")]
    pub concurrency: Option<usize>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `TASKDAG_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print the graph, but don't execute any commands.
    #[arg(long)]
    pub dry_run: bool,

    /// Print the final task snapshot and statistics as JSON.
    #[arg(long)]
    pub json: bool,
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
