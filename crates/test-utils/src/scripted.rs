use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::time::Instant;

use taskdag::dag::{SubtaskSpec, Task};
use taskdag::engine::Outcome;
use taskdag::errors::Error;
use taskdag::exec::{BoxFuture, ExecutionContext, Executor, Planner};

/// What the scripted executor does when a task with a given name runs.
#[derive(Debug, Clone)]
pub enum Behaviour {
    /// Sleep, then succeed with `result`.
    Succeed { after: Duration, result: Value },
    /// Sleep, then fail with `message`.
    Fail { after: Duration, message: String },
    /// Sleep, then decompose into `specs`.
    Decompose {
        after: Duration,
        specs: Vec<SubtaskSpec>,
    },
    /// Needs `total` of run time. Honours yield requests and resumes where it
    /// stopped on the next dispatch.
    Work { total: Duration },
    /// Never finishes on its own; only returns once cancelled.
    Hang,
}

impl Behaviour {
    pub fn succeed_after(after: Duration) -> Self {
        Behaviour::Succeed {
            after,
            result: Value::Null,
        }
    }

    pub fn fail(message: &str) -> Self {
        Behaviour::Fail {
            after: Duration::ZERO,
            message: message.to_string(),
        }
    }

    pub fn fail_after(after: Duration, message: &str) -> Self {
        Behaviour::Fail {
            after,
            message: message.to_string(),
        }
    }

    pub fn decompose(specs: Vec<SubtaskSpec>) -> Self {
        Behaviour::Decompose {
            after: Duration::ZERO,
            specs,
        }
    }

    pub fn work(total: Duration) -> Self {
        Behaviour::Work { total }
    }
}

/// Executor whose outcome per task name is scripted up front.
///
/// Unscripted tasks succeed immediately with `{"name": <task name>}`.
/// Records the order tasks were started in and the peak number of
/// simultaneous executions.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    script: Mutex<HashMap<String, Behaviour>>,
    remaining: Mutex<HashMap<String, Duration>>,
    started: Mutex<Vec<String>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, name: &str, behaviour: Behaviour) -> Self {
        self.script
            .lock()
            .unwrap()
            .insert(name.to_string(), behaviour);
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Names in the order their executions started (one entry per dispatch).
    pub fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }

    /// Largest number of executions in progress at the same time.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn behaviour_for(&self, name: &str) -> Option<Behaviour> {
        self.script.lock().unwrap().get(name).cloned()
    }

    async fn perform(&self, task: &Task, ctx: &ExecutionContext) -> Outcome {
        let Some(behaviour) = self.behaviour_for(&task.name) else {
            return Outcome::Success(json!({ "name": task.name }));
        };

        match behaviour {
            Behaviour::Succeed { after, result } => {
                tokio::select! {
                    _ = tokio::time::sleep(after) => Outcome::Success(result),
                    _ = ctx.cancelled() => Outcome::Failure("cancelled".to_string()),
                }
            }
            Behaviour::Fail { after, message } => {
                tokio::select! {
                    _ = tokio::time::sleep(after) => Outcome::Failure(message),
                    _ = ctx.cancelled() => Outcome::Failure("cancelled".to_string()),
                }
            }
            Behaviour::Decompose { after, specs } => {
                tokio::select! {
                    _ = tokio::time::sleep(after) => Outcome::Decomposition(specs),
                    _ = ctx.cancelled() => Outcome::Failure("cancelled".to_string()),
                }
            }
            Behaviour::Work { total } => self.work(task, ctx, total).await,
            Behaviour::Hang => {
                ctx.cancelled().await;
                Outcome::Failure("cancelled".to_string())
            }
        }
    }

    async fn work(&self, task: &Task, ctx: &ExecutionContext, total: Duration) -> Outcome {
        let left = *self
            .remaining
            .lock()
            .unwrap()
            .entry(task.name.clone())
            .or_insert(total);
        let started = Instant::now();

        tokio::select! {
            biased;
            _ = tokio::time::sleep(left) => {
                self.remaining.lock().unwrap().remove(&task.name);
                Outcome::Success(json!({ "name": task.name }))
            }
            _ = ctx.yield_signal() => {
                let still_left = left.saturating_sub(started.elapsed());
                if still_left.is_zero() {
                    self.remaining.lock().unwrap().remove(&task.name);
                    Outcome::Success(json!({ "name": task.name }))
                } else {
                    self.remaining
                        .lock()
                        .unwrap()
                        .insert(task.name.clone(), still_left);
                    Outcome::Yielded
                }
            }
            _ = ctx.cancelled() => Outcome::Failure("cancelled".to_string()),
        }
    }
}

impl Executor for ScriptedExecutor {
    fn execute(&self, task: Task, ctx: ExecutionContext) -> BoxFuture<'_, Outcome> {
        Box::pin(async move {
            self.started.lock().unwrap().push(task.name.clone());
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            let outcome = self.perform(&task, &ctx).await;

            self.active.fetch_sub(1, Ordering::SeqCst);
            outcome
        })
    }
}

/// Planner that answers every goal with the same decomposition, or with
/// an error.
#[derive(Debug, Clone)]
pub struct StaticPlanner {
    plan: Result<Vec<SubtaskSpec>, String>,
    goals: Arc<Mutex<Vec<Value>>>,
}

impl StaticPlanner {
    pub fn new(specs: Vec<SubtaskSpec>) -> Self {
        Self {
            plan: Ok(specs),
            goals: Arc::default(),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            plan: Err(message.to_string()),
            goals: Arc::default(),
        }
    }

    /// Goals received so far.
    pub fn goals(&self) -> Vec<Value> {
        self.goals.lock().unwrap().clone()
    }
}

impl Planner for StaticPlanner {
    fn plan(&self, goal: Value) -> BoxFuture<'_, Result<Vec<SubtaskSpec>, Error>> {
        Box::pin(async move {
            self.goals.lock().unwrap().push(goal);
            self.plan.clone().map_err(Error::msg)
        })
    }
}
