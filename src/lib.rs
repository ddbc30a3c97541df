// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod types;

use std::sync::Arc;

use anyhow::{bail, ensure, Context, Result};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::loader::load_and_validate;
use crate::config::model::ConfigFile;
use crate::dag::Task;
use crate::engine::{Driver, DriverConfig, SchedulerStats};
use crate::exec::CommandExecutor;
use crate::types::TaskStatus;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading and CLI overrides
/// - the driver with the shell-command executor
/// - Ctrl-C handling (cancel everything, then report)
/// - the final summary
pub async fn run(args: CliArgs) -> Result<()> {
    let cfg = load_and_validate(&args.config)
        .with_context(|| format!("loading config from '{}'", args.config))?;

    let mut driver_cfg = cfg.driver_config();
    if let Some(strategy) = args.strategy {
        driver_cfg.policy = strategy;
    }
    if let Some(concurrency) = args.concurrency {
        ensure!(concurrency >= 1, "--concurrency must be >= 1 (got 0)");
        driver_cfg.concurrency = concurrency;
    }

    if args.dry_run {
        print_dry_run(&cfg, &driver_cfg);
        return Ok(());
    }

    let (driver, handle) = Driver::new(driver_cfg, Arc::new(CommandExecutor::new()));
    let driver_task = driver.spawn();

    let ids = handle.submit_graph(cfg.to_graph()).await?;
    info!(tasks = ids.len(), "task graph submitted");

    tokio::select! {
        idle = handle.wait_idle() => idle?,
        signal = tokio::signal::ctrl_c() => {
            signal.context("listening for Ctrl-C")?;
            warn!("Ctrl-C received; cancelling unfinished tasks");
            let cancelled = handle.cancel_all().await?;
            info!(cancelled, "tasks cancelled");
            handle.wait_idle().await?;
        }
    }

    let tasks = handle.snapshot().await?;
    let stats = handle.stats().await?;
    handle.shutdown().await?;
    driver_task.await.context("driver task panicked")??;

    if args.json {
        let report = json!({ "tasks": tasks, "stats": stats });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&tasks, &stats);
    }

    let failed = tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Failed)
        .count();
    if failed > 0 {
        bail!("{failed} task(s) failed");
    }
    Ok(())
}

/// One line per task, then the aggregate numbers.
fn print_summary(tasks: &[Task], stats: &SchedulerStats) {
    println!("taskdag run ({} strategy)", stats.strategy);
    for task in tasks {
        let detail = match (&task.error, task.status) {
            (Some(err), _) => err.to_string(),
            (None, TaskStatus::Completed) => format!("{:?}", task.run_time),
            _ => String::new(),
        };
        println!(
            "  {:<5} {:<20} {:<24} {}",
            task.id.to_string(),
            task.name,
            task.status.as_str(),
            detail
        );
    }
    println!();
    println!(
        "completed: {}  failed: {}  cancelled: {}  total: {}",
        stats.completed, stats.failed, stats.cancelled, stats.total
    );
    if let Some(wait) = stats.average_wait_time {
        println!("average wait: {wait:?}");
    }
    if let Some(exec) = stats.average_execution_time {
        println!("average execution: {exec:?}");
    }
}

/// Simple dry-run output: print scheduler settings and tasks.
fn print_dry_run(cfg: &ConfigFile, driver: &DriverConfig) {
    println!("taskdag dry-run");
    println!("  scheduler.strategy = {}", driver.policy);
    println!("  scheduler.concurrency = {}", driver.concurrency);
    println!("  scheduler.time_slice = {:?}", driver.time_slice);
    println!("  scheduler.aggregation = {:?}", driver.aggregation);
    println!();

    println!("tasks ({}):", cfg.task.len());
    for (name, task) in cfg.task.iter() {
        println!("  - {name}");
        println!("      cmd: {}", task.cmd);
        if let Some(ref kind) = task.kind {
            println!("      kind: {kind}");
        }
        if task.priority != 0 {
            println!("      priority: {}", task.priority);
        }
        if let Some(estimate) = task.estimated_time {
            println!("      estimated_time: {estimate}");
        }
        if let Some(timeout) = task.timeout_ms {
            println!("      timeout_ms: {timeout}");
        }
        if task.optional {
            println!("      optional: true");
        }
        if !task.after.is_empty() {
            println!("      after: {:?}", task.after);
        }
        if !task.tags.is_empty() {
            println!("      tags: {:?}", task.tags);
        }
    }

    debug!("dry-run complete (no execution)");
}
