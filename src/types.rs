// src/types.rs

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Unique, immutable task identifier minted by the store.
///
/// Ids are handed out from a monotonically increasing counter, so comparing
/// two ids also compares their submission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Created,
    WaitingForDependencies,
    Ready,
    Running,
    WaitingForSubtasks,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Every status a task can be in, in lifecycle order.
    pub const ALL: [TaskStatus; 8] = [
        TaskStatus::Created,
        TaskStatus::WaitingForDependencies,
        TaskStatus::Ready,
        TaskStatus::Running,
        TaskStatus::WaitingForSubtasks,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Cancelled,
    ];

    /// Statuses from which no further transition occurs.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Whether the lifecycle state machine has an edge `self -> to`.
    ///
    /// `Running -> Ready` is the only edge that revisits an earlier state
    /// (round-robin expiry and preemption). Cancellation is reachable from
    /// every non-terminal state.
    pub fn can_transition_to(self, to: TaskStatus) -> bool {
        use TaskStatus::*;

        if to == Cancelled {
            return !self.is_terminal();
        }

        matches!(
            (self, to),
            (Created, WaitingForDependencies)
                | (Created, Ready)
                | (WaitingForDependencies, Ready)
                | (WaitingForDependencies, Failed)
                | (Ready, Running)
                | (Running, Ready)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, WaitingForSubtasks)
                | (WaitingForSubtasks, Completed)
                | (WaitingForSubtasks, Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Created => "CREATED",
            TaskStatus::WaitingForDependencies => "WAITING_FOR_DEPENDENCIES",
            TaskStatus::Ready => "READY",
            TaskStatus::Running => "RUNNING",
            TaskStatus::WaitingForSubtasks => "WAITING_FOR_SUBTASKS",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which ordering function the driver applies to ready tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulingPolicy {
    Fifo,
    Priority,
    RoundRobin,
    PreemptivePriority,
    ShortestJobFirst,
}

impl Default for SchedulingPolicy {
    fn default() -> Self {
        SchedulingPolicy::Priority
    }
}

impl FromStr for SchedulingPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "fifo" => Ok(SchedulingPolicy::Fifo),
            "priority" | "priority_based" => Ok(SchedulingPolicy::Priority),
            "round_robin" | "rr" => Ok(SchedulingPolicy::RoundRobin),
            "preemptive_priority" | "preemptive" => Ok(SchedulingPolicy::PreemptivePriority),
            "shortest_job_first" | "sjf" => Ok(SchedulingPolicy::ShortestJobFirst),
            other => Err(format!(
                "invalid scheduling strategy: {other} (expected \"fifo\", \"priority\", \
                 \"round_robin\", \"preemptive_priority\" or \"shortest_job_first\")"
            )),
        }
    }
}

impl fmt::Display for SchedulingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SchedulingPolicy::Fifo => "fifo",
            SchedulingPolicy::Priority => "priority",
            SchedulingPolicy::RoundRobin => "round_robin",
            SchedulingPolicy::PreemptivePriority => "preemptive_priority",
            SchedulingPolicy::ShortestJobFirst => "shortest_job_first",
        };
        f.write_str(s)
    }
}

/// How a decomposing parent reacts to the outcomes of its children.
///
/// - `FailFast`: the first failed (or cancelled) critical child fails the
///   parent and cancels every sibling that has not finished yet.
/// - `BestEffort`: the parent completes once all children are terminal and
///   carries the per-child outcomes in its aggregated result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationPolicy {
    FailFast,
    BestEffort,
}

impl Default for AggregationPolicy {
    fn default() -> Self {
        AggregationPolicy::FailFast
    }
}

impl FromStr for AggregationPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "fail_fast" => Ok(AggregationPolicy::FailFast),
            "best_effort" => Ok(AggregationPolicy::BestEffort),
            other => Err(format!(
                "invalid aggregation policy: {other} (expected \"fail_fast\" or \"best_effort\")"
            )),
        }
    }
}
