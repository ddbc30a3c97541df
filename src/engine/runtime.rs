// src/engine/runtime.rs

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::dag::{Aggregator, Task, GOAL_KIND};
use crate::errors::{Result, SchedulerError};
use crate::exec::{ExecutionContext, Executor, Planner};
use crate::types::{TaskId, TaskStatus};

use super::core::{CoreCommand, CoreRuntime, CoreStep, Dispatch};
use super::handle::{Request, SchedulerHandle};
use super::{CoreEvent, DriverConfig, Outcome};

/// Book-keeping for one execution the shell has started.
struct InFlight {
    dispatch: u64,
    ctx: ExecutionContext,
    timers: Vec<JoinHandle<()>>,
}

impl InFlight {
    fn stop_timers(&self) {
        for timer in &self.timers {
            timer.abort();
        }
    }
}

/// Drives the core in response to handle requests and execution events,
/// and delegates the actual work to an [`Executor`] (or a [`Planner`] for
/// goal tasks).
///
/// This is an IO shell around [`CoreRuntime`], which contains all the
/// scheduling semantics. This struct reads from the channels, spawns the
/// executor calls and timers, and answers waiters.
pub struct Driver {
    core: CoreRuntime,
    requests: mpsc::Receiver<Request>,
    requests_open: bool,
    events_tx: mpsc::UnboundedSender<CoreEvent>,
    events_rx: mpsc::UnboundedReceiver<CoreEvent>,
    executor: Arc<dyn Executor>,
    planner: Option<Arc<dyn Planner>>,
    running: HashMap<TaskId, InFlight>,
    task_waiters: Vec<(TaskId, oneshot::Sender<Result<Task>>)>,
    idle_waiters: Vec<oneshot::Sender<()>>,
}

impl fmt::Debug for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Driver")
            .field("core", &self.core)
            .field("running", &self.running.len())
            .finish_non_exhaustive()
    }
}

impl Driver {
    /// Build a driver and the handle used to talk to it.
    pub fn new(config: DriverConfig, executor: Arc<dyn Executor>) -> (Self, SchedulerHandle) {
        let core = CoreRuntime::new(&config);
        Self::with_core(core, config.event_buffer, executor)
    }

    /// Build a driver around a core that may already hold tasks.
    pub fn with_core(
        core: CoreRuntime,
        event_buffer: usize,
        executor: Arc<dyn Executor>,
    ) -> (Self, SchedulerHandle) {
        let (tx, requests) = mpsc::channel(event_buffer.max(1));
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let driver = Self {
            core,
            requests,
            requests_open: true,
            events_tx,
            events_rx,
            executor,
            planner: None,
            running: HashMap::new(),
            task_waiters: Vec::new(),
            idle_waiters: Vec::new(),
        };
        (driver, SchedulerHandle::new(tx))
    }

    /// Route goal tasks to `planner`.
    pub fn with_planner(mut self, planner: Arc<dyn Planner>) -> Self {
        self.planner = Some(planner);
        self
    }

    pub fn with_aggregator(mut self, aggregator: Arc<dyn Aggregator>) -> Self {
        self.core = self.core.with_aggregator(aggregator);
        self
    }

    /// Run the driver on its own tokio task.
    pub fn spawn(self) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run())
    }

    /// Main event loop.
    ///
    /// - Consumes handle requests and execution events.
    /// - Feeds them into the core.
    /// - Executes the commands returned by the core.
    ///
    /// Returns when a handle requests shutdown, when the core asks to exit
    /// (`exit_when_idle`), or when every handle is gone and the store has
    /// settled.
    pub async fn run(mut self) -> Result<()> {
        info!(
            strategy = %self.core.policy(),
            "taskdag driver started"
        );

        let step = self.core.advance();
        let mut keep_running = self.apply(step);

        while keep_running {
            self.resolve_waiters();

            if !self.requests_open && self.core.is_idle() {
                info!("all handles dropped and no work left");
                break;
            }

            keep_running = tokio::select! {
                Some(event) = self.events_rx.recv() => {
                    debug!(?event, "driver received event");
                    let step = self.core.step(event);
                    self.apply(step)
                }
                request = self.requests.recv(), if self.requests_open => match request {
                    Some(request) => self.handle_request(request),
                    None => {
                        debug!("request channel closed");
                        self.requests_open = false;
                        true
                    }
                },
                else => false,
            };
        }

        self.resolve_waiters();
        self.stop_all();
        info!("driver exiting");
        Ok(())
    }

    fn handle_request(&mut self, request: Request) -> bool {
        match request {
            Request::Submit { spec, reply } => {
                let _ = reply.send(self.core.submit(spec));
            }
            Request::SubmitGraph { specs, reply } => {
                let _ = reply.send(self.core.submit_graph(&specs));
            }
            Request::SubmitGoal { name, goal, reply } => {
                let _ = reply.send(self.core.submit_goal(&name, goal));
            }
            Request::Cancel { task, reply } => {
                let _ = reply.send(self.core.cancel(task));
            }
            Request::CancelAll { reply } => {
                let _ = reply.send(self.core.cancel_all());
            }
            Request::SetStrategy { policy, reply } => {
                self.core.set_strategy(policy);
                let _ = reply.send(());
            }
            Request::Task { task, reply } => {
                let _ = reply.send(self.core.task(task).cloned());
                return true;
            }
            Request::Snapshot { reply } => {
                let _ = reply.send(self.core.snapshot());
                return true;
            }
            Request::Stats { reply } => {
                let _ = reply.send(self.core.stats());
                return true;
            }
            Request::WaitFor { task, reply } => {
                match self.core.task(task) {
                    Ok(_) => self.task_waiters.push((task, reply)),
                    Err(err) => {
                        let _ = reply.send(Err(err));
                    }
                }
                return true;
            }
            Request::WaitIdle { reply } => {
                self.idle_waiters.push(reply);
                return true;
            }
            Request::Shutdown => {
                info!("shutdown requested");
                let step = self.core.step(CoreEvent::ShutdownRequested);
                self.apply(step);
                return false;
            }
        }

        let step = self.core.advance();
        self.apply(step)
    }

    /// Execute the commands of one core step. Returns `keep_running`.
    fn apply(&mut self, step: CoreStep) -> bool {
        for command in step.commands {
            match command {
                CoreCommand::Dispatch(dispatch) => self.start(dispatch),
                CoreCommand::RequestYield { task, dispatch } => {
                    if let Some(flight) = self.flight(task, dispatch) {
                        flight.ctx.request_yield();
                    }
                }
                CoreCommand::Abort { task, dispatch } => {
                    if self.flight(task, dispatch).is_some() {
                        if let Some(flight) = self.running.remove(&task) {
                            flight.stop_timers();
                            flight.ctx.request_cancel();
                            debug!(task = %task, dispatch, "in-flight execution aborted");
                        }
                    }
                }
                CoreCommand::RequestExit => {
                    info!("core issued RequestExit command");
                }
            }
        }
        step.keep_running
    }

    fn flight(&self, task: TaskId, dispatch: u64) -> Option<&InFlight> {
        self.running
            .get(&task)
            .filter(|flight| flight.dispatch == dispatch)
    }

    /// Spawn the executor (or planner) call and its timers.
    fn start(&mut self, dispatch: Dispatch) {
        let Dispatch {
            task,
            dispatch,
            attempt,
            time_slice,
            deadline,
        } = dispatch;
        let id = task.id;
        let ctx = ExecutionContext::new(dispatch, attempt, time_slice);

        let mut timers = Vec::new();
        if let Some(slice) = time_slice {
            timers.push(self.timer(slice, CoreEvent::SliceExpired { task: id, dispatch }));
        }
        if let Some(budget) = deadline {
            timers.push(self.timer(budget, CoreEvent::DeadlineExpired { task: id, dispatch }));
        }

        let events = self.events_tx.clone();
        let call_ctx = ctx.clone();

        if task.kind == GOAL_KIND {
            let planner = self.planner.clone();
            tokio::spawn(async move {
                let outcome = match planner {
                    Some(planner) => match planner.plan(task.payload.clone()).await {
                        Ok(specs) => Outcome::Decomposition(specs),
                        Err(err) => Outcome::Failure(format!("planning failed: {err:#}")),
                    },
                    None => Outcome::Failure("no planner configured for goal tasks".to_string()),
                };
                let _ = events.send(CoreEvent::ExecutionFinished {
                    task: id,
                    dispatch,
                    outcome,
                });
            });
        } else {
            let executor = Arc::clone(&self.executor);
            tokio::spawn(async move {
                let outcome = executor.execute(task, call_ctx).await;
                let _ = events.send(CoreEvent::ExecutionFinished {
                    task: id,
                    dispatch,
                    outcome,
                });
            });
        }

        if let Some(previous) = self.running.insert(
            id,
            InFlight {
                dispatch,
                ctx,
                timers,
            },
        ) {
            // Superseded dispatch: the core already dropped it.
            previous.stop_timers();
        }
    }

    fn timer(&self, after: Duration, event: CoreEvent) -> JoinHandle<()> {
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = events.send(event);
        })
    }

    /// Forget shell state for executions the core no longer tracks and
    /// answer every waiter whose condition holds.
    fn resolve_waiters(&mut self) {
        let core = &self.core;
        self.running.retain(|id, flight| {
            let alive = core
                .store()
                .get(*id)
                .is_some_and(|t| t.status == TaskStatus::Running);
            if !alive {
                flight.stop_timers();
            }
            alive
        });

        let mut pending = Vec::new();
        for (id, reply) in self.task_waiters.drain(..) {
            match self.core.task(id) {
                Ok(task) if task.is_terminal() => {
                    let _ = reply.send(Ok(task.clone()));
                }
                Ok(_) => pending.push((id, reply)),
                Err(err) => {
                    let _ = reply.send(Err(err));
                }
            }
        }
        self.task_waiters = pending;

        if self.core.is_idle() {
            for reply in self.idle_waiters.drain(..) {
                let _ = reply.send(());
            }
        }
    }

    /// Ask every outstanding execution to cancel and drop the waiters that
    /// can no longer be answered.
    fn stop_all(&mut self) {
        for (id, flight) in self.running.drain() {
            flight.stop_timers();
            flight.ctx.request_cancel();
            debug!(task = %id, "cancelling in-flight execution on shutdown");
        }

        for (id, reply) in self.task_waiters.drain(..) {
            warn!(task = %id, "driver stopped before task finished");
            let _ = reply.send(Err(SchedulerError::DriverStopped));
        }
        self.idle_waiters.clear();
    }
}
