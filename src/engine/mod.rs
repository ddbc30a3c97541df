// src/engine/mod.rs

//! Orchestration engine for taskdag.
//!
//! This module ties together:
//! - the task store and its resolver
//! - the concurrency gate and the active scheduling strategy
//! - the parent/child coordinator
//! - the driver loop that reacts to:
//!   - executor completions
//!   - slice and deadline timers
//!   - submissions, queries and cancellations from [`SchedulerHandle`]s
//!
//! The pure core state machine lives in [`core`]; the async/IO shell is
//! implemented in [`runtime`].

use std::time::Duration;

use serde_json::Value;

use crate::dag::SubtaskSpec;
use crate::types::{AggregationPolicy, SchedulingPolicy, TaskId};

/// What an executor (or planner) reports for one dispatch.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// The task finished; `result` is opaque to the scheduler.
    Success(Value),
    /// The task turned into a parent of the described subtasks.
    Decomposition(Vec<SubtaskSpec>),
    /// The task failed; the message ends up on the task's error record.
    Failure(String),
    /// The executor gave its slot back after a yield request. Any partial
    /// progress is kept by the executor.
    Yielded,
}

/// Driver configuration.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Gate capacity (clamped to at least 1).
    pub concurrency: usize,
    pub policy: SchedulingPolicy,
    /// Slice granted per dispatch under round-robin.
    pub time_slice: Duration,
    pub aggregation: AggregationPolicy,
    /// Stop the driver as soon as no task is unfinished and nothing is in
    /// flight.
    pub exit_when_idle: bool,
    /// Size of the handle -> driver mailbox.
    pub event_buffer: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            policy: SchedulingPolicy::default(),
            time_slice: Duration::from_millis(1000),
            aggregation: AggregationPolicy::default(),
            exit_when_idle: false,
            event_buffer: 64,
        }
    }
}

/// Events consumed by the pure core.
///
/// `dispatch` identifies the dispatch an event belongs to; events for a
/// dispatch that is no longer in flight are discarded.
#[derive(Debug, Clone)]
pub enum CoreEvent {
    ExecutionFinished {
        task: TaskId,
        dispatch: u64,
        outcome: Outcome,
    },
    SliceExpired {
        task: TaskId,
        dispatch: u64,
    },
    DeadlineExpired {
        task: TaskId,
        dispatch: u64,
    },
    /// Graceful shutdown requested.
    ShutdownRequested,
}

pub mod core;
pub mod handle;
pub mod runtime;
pub mod stats;

pub use core::{CoreCommand, CoreRuntime, CoreStep, Dispatch};
pub use handle::SchedulerHandle;
pub use runtime::Driver;
pub use stats::SchedulerStats;
