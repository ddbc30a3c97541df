// src/exec/backend.rs

//! Pluggable executor and planner abstractions.
//!
//! The driver never performs work itself. Every dispatch hands a snapshot of
//! the task plus an [`ExecutionContext`] to an [`Executor`] (or, for goal
//! tasks, to a [`Planner`]) and reacts to the returned [`Outcome`] when the
//! future resolves.
//!
//! - [`CommandExecutor`](super::command::CommandExecutor) runs shell commands
//!   and is what the `taskdag` binary uses.
//! - Tests provide their own implementations that script outcomes.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::dag::{SubtaskSpec, Task};
use crate::engine::Outcome;
use crate::errors::Error;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Performs one unit of work per dispatch.
///
/// Called at most once per dispatch; the driver never retries. A task that
/// yields is dispatched again later with a new context.
pub trait Executor: Send + Sync {
    fn execute(&self, task: Task, ctx: ExecutionContext) -> BoxFuture<'_, Outcome>;
}

/// Turns a goal into the first decomposition of a root task.
pub trait Planner: Send + Sync {
    fn plan(&self, goal: Value) -> BoxFuture<'_, Result<Vec<SubtaskSpec>, Error>>;
}

/// Per-dispatch handle shared between the driver and the executor.
///
/// Both signals are cooperative:
/// - *cancel*: the task was cancelled or timed out; its slot is already
///   released and any outcome returned afterwards is discarded.
/// - *yield*: the driver wants the slot back (slice expiry or preemption).
///   An executor that can pause returns [`Outcome::Yielded`] and keeps its
///   own progress; one that cannot simply runs to completion.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Identifies this dispatch; unique per driver.
    pub dispatch: u64,
    /// 1 for the first dispatch of a task, incremented on every requeue.
    pub attempt: u32,
    pub time_slice: Option<Duration>,
    cancel: CancellationToken,
    yield_request: CancellationToken,
}

impl ExecutionContext {
    pub fn new(dispatch: u64, attempt: u32, time_slice: Option<Duration>) -> Self {
        Self {
            dispatch,
            attempt,
            time_slice,
            cancel: CancellationToken::new(),
            yield_request: CancellationToken::new(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once cancellation has been requested.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    pub fn yield_requested(&self) -> bool {
        self.yield_request.is_cancelled()
    }

    /// Resolves once the driver has asked this dispatch to yield.
    pub async fn yield_signal(&self) {
        self.yield_request.cancelled().await
    }

    pub fn request_cancel(&self) {
        self.cancel.cancel();
    }

    pub fn request_yield(&self) {
        self.yield_request.cancel();
    }
}
