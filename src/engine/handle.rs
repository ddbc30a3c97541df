// src/engine/handle.rs

//! Submission and query interface of a running driver.

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::dag::{SubtaskSpec, Task, TaskSpec};
use crate::engine::stats::SchedulerStats;
use crate::errors::{Result, SchedulerError};
use crate::types::{SchedulingPolicy, TaskId};

/// Requests a handle sends to the driver. Every request except
/// `Shutdown` carries the sender for its reply.
#[derive(Debug)]
pub(crate) enum Request {
    Submit {
        spec: TaskSpec,
        reply: oneshot::Sender<Result<TaskId>>,
    },
    SubmitGraph {
        specs: Vec<SubtaskSpec>,
        reply: oneshot::Sender<Result<Vec<TaskId>>>,
    },
    SubmitGoal {
        name: String,
        goal: Value,
        reply: oneshot::Sender<Result<TaskId>>,
    },
    Cancel {
        task: TaskId,
        reply: oneshot::Sender<Result<bool>>,
    },
    CancelAll {
        reply: oneshot::Sender<usize>,
    },
    SetStrategy {
        policy: SchedulingPolicy,
        reply: oneshot::Sender<()>,
    },
    Task {
        task: TaskId,
        reply: oneshot::Sender<Result<Task>>,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<Task>>,
    },
    Stats {
        reply: oneshot::Sender<SchedulerStats>,
    },
    WaitFor {
        task: TaskId,
        reply: oneshot::Sender<Result<Task>>,
    },
    WaitIdle {
        reply: oneshot::Sender<()>,
    },
    Shutdown,
}

/// Cloneable handle to a [`Driver`](super::Driver).
///
/// Every call is a message to the driver, so results reflect a single
/// consistent view of the store. Once the driver has stopped, calls fail
/// with [`SchedulerError::DriverStopped`].
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    tx: mpsc::Sender<Request>,
}

impl SchedulerHandle {
    pub(crate) fn new(tx: mpsc::Sender<Request>) -> Self {
        Self { tx }
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Request) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| SchedulerError::DriverStopped)?;
        rx.await.map_err(|_| SchedulerError::DriverStopped)
    }

    /// Submit one task. Its dependencies must already exist.
    pub async fn submit(&self, spec: TaskSpec) -> Result<TaskId> {
        self.request(|reply| Request::Submit { spec, reply }).await?
    }

    /// Submit a graph whose members refer to each other by key. Nothing is
    /// created if the graph is invalid.
    pub async fn submit_graph(&self, specs: Vec<SubtaskSpec>) -> Result<Vec<TaskId>> {
        self.request(|reply| Request::SubmitGraph { specs, reply })
            .await?
    }

    /// Submit a goal for the planner to decompose. Returns the root id.
    pub async fn submit_goal(&self, name: impl Into<String>, goal: Value) -> Result<TaskId> {
        let name = name.into();
        self.request(|reply| Request::SubmitGoal { name, goal, reply })
            .await?
    }

    /// Cancel a task and its descendants. `Ok(false)` if it was already
    /// terminal.
    pub async fn cancel(&self, task: TaskId) -> Result<bool> {
        self.request(|reply| Request::Cancel { task, reply }).await?
    }

    /// Cancel every unfinished task.
    pub async fn cancel_all(&self) -> Result<usize> {
        self.request(|reply| Request::CancelAll { reply }).await
    }

    pub async fn set_strategy(&self, policy: SchedulingPolicy) -> Result<()> {
        self.request(|reply| Request::SetStrategy { policy, reply })
            .await
    }

    /// Snapshot of one task.
    pub async fn task(&self, task: TaskId) -> Result<Task> {
        self.request(|reply| Request::Task { task, reply }).await?
    }

    /// Snapshot of the whole store, in id order.
    pub async fn snapshot(&self) -> Result<Vec<Task>> {
        self.request(|reply| Request::Snapshot { reply }).await
    }

    pub async fn stats(&self) -> Result<SchedulerStats> {
        self.request(|reply| Request::Stats { reply }).await
    }

    /// Resolve once `task` is terminal, with its final snapshot.
    pub async fn wait_for(&self, task: TaskId) -> Result<Task> {
        self.request(|reply| Request::WaitFor { task, reply }).await?
    }

    /// Resolve once no task is unfinished and nothing is in flight.
    pub async fn wait_idle(&self) -> Result<()> {
        self.request(|reply| Request::WaitIdle { reply }).await
    }

    /// Stop the driver. In-flight executions are asked to cancel.
    pub async fn shutdown(&self) -> Result<()> {
        self.tx
            .send(Request::Shutdown)
            .await
            .map_err(|_| SchedulerError::DriverStopped)
    }
}
