// src/dag/task.rs

//! Task records and the descriptors used to create them.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;

use crate::errors::TaskError;
use crate::types::{TaskId, TaskStatus};

/// Type tag used when a descriptor does not name one.
pub const DEFAULT_KIND: &str = "task";

/// Type tag of root tasks created from a goal; these are routed to the
/// planner instead of the executor.
pub const GOAL_KIND: &str = "goal";

/// One status change in a task's history.
///
/// `seq` comes from a store-wide counter, so changes of different tasks can
/// be merged into a single linear order.
#[derive(Debug, Clone, Serialize)]
pub struct StatusChange {
    pub seq: u64,
    pub from: TaskStatus,
    pub to: TaskStatus,
    pub at: DateTime<Utc>,
}

/// The atomic unit of schedulable work.
///
/// Only the store mutates a `Task`; everything outside of it sees clones.
#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    /// Opaque type tag, only used to route the payload.
    pub kind: String,
    pub status: TaskStatus,
    /// Tasks that must be `COMPLETED` before this one may become `READY`.
    pub dependencies: Vec<TaskId>,
    pub parent_id: Option<TaskId>,
    /// Filled in when this task decomposes.
    pub children: Vec<TaskId>,
    pub payload: Value,
    /// Lower value = more urgent.
    pub priority: i64,
    pub estimated_time: Option<f64>,
    /// Slice granted on the current dispatch (round-robin only).
    pub time_slice_remaining: Option<Duration>,
    /// Budget of Gate-held time before the task is failed with a timeout.
    pub timeout: Option<Duration>,
    /// A failed optional task does not block its dependents and does not
    /// trigger fail-fast on its parent.
    pub optional: bool,
    pub tags: Vec<String>,
    pub result: Option<Value>,
    pub error: Option<TaskError>,

    /// Position in the ready order; bumped every time the task (re)enters
    /// `READY`, so a requeued task goes to the back.
    pub ready_seq: u64,
    pub dispatch_count: u32,
    /// Accumulated time spent `RUNNING` (i.e. holding a gate slot).
    pub run_time: Duration,
    #[serde(skip)]
    pub(crate) running_since: Option<Instant>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub history: Vec<StatusChange>,
}

impl Task {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether this task, once terminal, lets its dependents proceed.
    pub fn satisfies_dependents(&self) -> bool {
        match self.status {
            TaskStatus::Completed => true,
            TaskStatus::Failed => self.optional,
            _ => false,
        }
    }

    /// Time between creation and the first dispatch.
    pub fn wait_time(&self) -> Option<Duration> {
        let started = self.started_at?;
        (started - self.created_at).to_std().ok()
    }

    /// Sequence number of the first change *into* `status`, if any.
    pub fn first_entered(&self, status: TaskStatus) -> Option<u64> {
        self.history
            .iter()
            .find(|change| change.to == status)
            .map(|change| change.seq)
    }

    /// How many times the task went `RUNNING -> READY`.
    pub fn requeue_count(&self) -> usize {
        self.history
            .iter()
            .filter(|c| c.from == TaskStatus::Running && c.to == TaskStatus::Ready)
            .count()
    }
}

/// Descriptor for a task to be created.
///
/// `dependencies` may only refer to tasks that already exist in the store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskSpec {
    pub name: String,
    pub kind: String,
    pub payload: Value,
    pub priority: i64,
    pub estimated_time: Option<f64>,
    pub timeout_ms: Option<u64>,
    pub optional: bool,
    pub tags: Vec<String>,
    pub dependencies: Vec<TaskId>,
}

impl TaskSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    pub fn payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn estimated_time(mut self, estimate: f64) -> Self {
        self.estimated_time = Some(estimate);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn optional(mut self, optional: bool) -> Self {
        self.optional = optional;
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn depends_on(mut self, id: TaskId) -> Self {
        if !self.dependencies.contains(&id) {
            self.dependencies.push(id);
        }
        self
    }
}

/// Descriptor for one member of a graph submitted in a single batch, either
/// by a caller or as the outcome of a decomposition.
///
/// Siblings reference each other through their local `key` in `after`; the
/// store resolves those to freshly minted ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtaskSpec {
    pub key: String,
    #[serde(flatten)]
    pub task: TaskSpec,
    #[serde(default)]
    pub after: Vec<String>,
}

impl SubtaskSpec {
    pub fn new(key: impl Into<String>, task: TaskSpec) -> Self {
        Self {
            key: key.into(),
            task,
            after: Vec::new(),
        }
    }

    pub fn after(mut self, key: impl Into<String>) -> Self {
        self.after.push(key.into());
        self
    }
}
