// src/errors.rs

//! Crate-wide error types.
//!
//! [`SchedulerError`] is what API calls return synchronously (admission,
//! transitions, configuration, a stopped driver). Failures that happen *to a
//! task* while it is being scheduled are not errors of any call; they are
//! recorded on the task itself as a [`TaskError`].

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{TaskId, TaskStatus};

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("task '{task}' has unknown dependency '{dependency}'")]
    UnknownDependency { task: String, dependency: String },

    #[error("duplicate task key '{0}' in graph")]
    DuplicateKey(String),

    #[error("cycle detected in task graph involving '{0}'")]
    CycleDetected(String),

    #[error("invalid transition for task {id}: {from} -> {to}")]
    InvalidTransition {
        id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("concurrency gate exhausted ({capacity} slots in use)")]
    GateExhausted { capacity: usize },

    #[error("scheduler driver is not running")]
    DriverStopped,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, SchedulerError>;

/// Why a task ended up `FAILED` or `CANCELLED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// A critical dependency (or, under fail-fast, a sibling) failed.
    DependencyFailed,
    /// The executor reported a failure.
    ExecutionError,
    /// The task exceeded its execution budget.
    Timeout,
    /// The task, an ancestor, or a dependency was cancelled.
    CancellationRequested,
    /// The executor or planner returned a decomposition that could not be
    /// admitted (unknown local reference, duplicate key, cycle).
    InvalidDecomposition,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::DependencyFailed => "DependencyFailed",
            FailureKind::ExecutionError => "ExecutionError",
            FailureKind::Timeout => "Timeout",
            FailureKind::CancellationRequested => "CancellationRequested",
            FailureKind::InvalidDecomposition => "InvalidDecomposition",
        };
        f.write_str(s)
    }
}

/// Error record attached to a terminal task. The message is never empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    pub kind: FailureKind,
    pub message: String,
}

impl TaskError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        let message = message.into();
        let message = if message.trim().is_empty() {
            format!("{kind} (no further detail)")
        } else {
            message
        };
        Self { kind, message }
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}
