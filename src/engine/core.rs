// src/engine/core.rs

//! Pure core of the driver.
//!
//! This module contains a synchronous, deterministic state machine that owns
//! the task store, the concurrency gate and the active strategy. It consumes
//! [`CoreEvent`]s (and direct API calls such as submissions) and produces:
//! - an updated store
//! - a list of [`CoreCommand`]s describing what the IO shell should do next
//!
//! The async shell (`engine::runtime::Driver`) is responsible for:
//! - running executor and planner calls
//! - arming slice and deadline timers
//! - answering handle requests
//!
//! Because the core is the single writer of the store, every check followed
//! by a transition below happens without any interleaving.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::dag::coordinator::{self, apply_decomposition};
use crate::dag::resolver::{find_blocked, find_ready};
use crate::dag::{
    strategy_for, Aggregator, ChildSummary, ConcurrencyGate, ParentVerdict, SchedulingStrategy,
    SubtaskSpec, Task, TaskSpec, TaskStore, TransitionUpdate, GOAL_KIND,
};
use crate::engine::stats::SchedulerStats;
use crate::engine::{CoreEvent, DriverConfig, Outcome};
use crate::errors::{FailureKind, Result, TaskError};
use crate::types::{AggregationPolicy, SchedulingPolicy, TaskId, TaskStatus};

const NON_TERMINAL: [TaskStatus; 5] = [
    TaskStatus::Created,
    TaskStatus::WaitingForDependencies,
    TaskStatus::Ready,
    TaskStatus::Running,
    TaskStatus::WaitingForSubtasks,
];

/// Everything the shell needs to start one execution.
#[derive(Debug, Clone)]
pub struct Dispatch {
    /// Snapshot taken right after the `READY -> RUNNING` transition.
    pub task: Task,
    pub dispatch: u64,
    pub attempt: u32,
    /// Arm a slice timer for this long, if set.
    pub time_slice: Option<Duration>,
    /// Remaining timeout budget, if the task has one.
    pub deadline: Option<Duration>,
}

/// Command produced by the pure core, to be executed by the outer IO shell.
#[derive(Debug, Clone)]
pub enum CoreCommand {
    /// Start executing a task.
    Dispatch(Dispatch),
    /// Ask an in-flight execution to give its slot back.
    RequestYield { task: TaskId, dispatch: u64 },
    /// The task was stopped (cancelled, timed out, or cancelled by
    /// fail-fast) while in flight. Its slot is already released; cancel the
    /// call and drop its timers.
    Abort { task: TaskId, dispatch: u64 },
    /// Request that the driver exits (used with `exit_when_idle`).
    RequestExit,
}

/// Decision returned by the core after handling an event or API call.
#[derive(Debug, Clone)]
pub struct CoreStep {
    pub commands: Vec<CoreCommand>,
    pub keep_running: bool,
}

pub struct CoreRuntime {
    store: TaskStore,
    gate: ConcurrencyGate,
    strategy: Box<dyn SchedulingStrategy>,
    time_slice: Duration,
    aggregation: AggregationPolicy,
    aggregator: Arc<dyn Aggregator>,
    /// Dispatch id of every task currently holding a slot.
    in_flight: HashMap<TaskId, u64>,
    /// In-flight tasks already asked to yield.
    yield_requested: HashSet<TaskId>,
    next_dispatch: u64,
    exit_when_idle: bool,
    outbox: Vec<CoreCommand>,
}

impl std::fmt::Debug for CoreRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreRuntime")
            .field("tasks", &self.store.len())
            .field("strategy", &self.strategy.policy())
            .field("in_flight", &self.in_flight)
            .field("capacity", &self.gate.capacity())
            .finish_non_exhaustive()
    }
}

impl CoreRuntime {
    pub fn new(config: &DriverConfig) -> Self {
        Self {
            store: TaskStore::new(),
            gate: ConcurrencyGate::new(config.concurrency),
            strategy: strategy_for(config.policy, config.time_slice),
            time_slice: config.time_slice,
            aggregation: config.aggregation,
            aggregator: Arc::new(ChildSummary),
            in_flight: HashMap::new(),
            yield_requested: HashSet::new(),
            next_dispatch: 0,
            exit_when_idle: config.exit_when_idle,
            outbox: Vec::new(),
        }
    }

    /// Replace the function that builds a parent's result from its children.
    pub fn with_aggregator(mut self, aggregator: Arc<dyn Aggregator>) -> Self {
        self.aggregator = aggregator;
        self
    }

    pub fn store(&self) -> &TaskStore {
        &self.store
    }

    pub fn task(&self, id: TaskId) -> Result<&Task> {
        self.store.task(id)
    }

    pub fn snapshot(&self) -> Vec<Task> {
        self.store.snapshot()
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats::collect(&self.store, self.strategy.policy(), &self.gate)
    }

    pub fn policy(&self) -> SchedulingPolicy {
        self.strategy.policy()
    }

    /// No task is unfinished and no execution is outstanding.
    pub fn is_idle(&self) -> bool {
        self.in_flight.is_empty() && !self.store.has_unfinished()
    }

    /// Admit a single task.
    pub fn submit(&mut self, spec: TaskSpec) -> Result<TaskId> {
        let id = self.store.create(spec)?;
        info!(task = %id, "task submitted");
        Ok(id)
    }

    /// Admit a whole graph; ids are returned in descriptor order.
    pub fn submit_graph(&mut self, specs: &[SubtaskSpec]) -> Result<Vec<TaskId>> {
        let ids = self.store.create_graph(specs, None)?;
        info!(tasks = ids.len(), "task graph submitted");
        Ok(ids)
    }

    /// Admit a root task whose decomposition comes from the planner.
    pub fn submit_goal(&mut self, name: &str, goal: Value) -> Result<TaskId> {
        let id = self
            .store
            .create(TaskSpec::new(name).kind(GOAL_KIND).payload(goal))?;
        info!(task = %id, name = %name, "goal submitted");
        Ok(id)
    }

    /// Swap the ordering function. Queued and running tasks are untouched.
    pub fn set_strategy(&mut self, policy: SchedulingPolicy) {
        let previous = self.strategy.policy();
        self.strategy = strategy_for(policy, self.time_slice);
        info!(from = %previous, to = %policy, "scheduling strategy switched");
    }

    /// Cancel `id` (and its descendants). Returns `false` if the task had
    /// already reached a terminal state.
    pub fn cancel(&mut self, id: TaskId) -> Result<bool> {
        if self.store.task(id)?.is_terminal() {
            return Ok(false);
        }

        let error = TaskError::new(FailureKind::CancellationRequested, "cancelled on request");
        let cancelled = self.cancel_tree(id, &error);
        info!(task = %id, cancelled = cancelled.len(), "cancellation applied");
        self.settle(cancelled);
        Ok(true)
    }

    /// Cancel every unfinished task. Returns how many were cancelled.
    pub fn cancel_all(&mut self) -> usize {
        let roots: Vec<TaskId> = self
            .store
            .query(|t| !t.is_terminal())
            .into_iter()
            .map(|t| t.id)
            .collect();

        let error = TaskError::new(FailureKind::CancellationRequested, "scheduler cancelled");
        let mut cancelled = Vec::new();
        for id in roots {
            cancelled.extend(self.cancel_tree(id, &error));
        }
        self.settle(cancelled.iter().copied());
        cancelled.len()
    }

    /// Run the dispatch loop and hand back everything the shell has to do.
    pub fn advance(&mut self) -> CoreStep {
        self.pump();
        let mut commands = std::mem::take(&mut self.outbox);

        let mut keep_running = true;
        if self.exit_when_idle && self.is_idle() {
            info!("all tasks settled; requesting exit");
            commands.push(CoreCommand::RequestExit);
            keep_running = false;
        }

        CoreStep {
            commands,
            keep_running,
        }
    }

    /// Handle a single event, then advance.
    pub fn step(&mut self, event: CoreEvent) -> CoreStep {
        match event {
            CoreEvent::ExecutionFinished {
                task,
                dispatch,
                outcome,
            } => self.on_finished(task, dispatch, outcome),
            CoreEvent::SliceExpired { task, dispatch } => self.on_slice_expired(task, dispatch),
            CoreEvent::DeadlineExpired { task, dispatch } => {
                self.on_deadline_expired(task, dispatch)
            }
            CoreEvent::ShutdownRequested => {
                return CoreStep {
                    commands: std::mem::take(&mut self.outbox),
                    keep_running: false,
                };
            }
        }

        self.advance()
    }

    // ---------------------------------------------------------------------
    // Event handlers
    // ---------------------------------------------------------------------

    fn on_finished(&mut self, id: TaskId, dispatch: u64, outcome: Outcome) {
        if self.in_flight.get(&id) != Some(&dispatch) {
            debug!(task = %id, dispatch, "discarding outcome of a stopped dispatch");
            return;
        }
        self.in_flight.remove(&id);
        self.yield_requested.remove(&id);
        self.gate.release(id);

        match outcome {
            Outcome::Success(result) => {
                info!(task = %id, "task completed");
                self.finish(id, TaskStatus::Completed, TransitionUpdate::result(result));
            }
            Outcome::Failure(message) => {
                warn!(task = %id, error = %message, "task failed");
                let error = TaskError::new(FailureKind::ExecutionError, message);
                self.finish(id, TaskStatus::Failed, TransitionUpdate::error(error));
            }
            Outcome::Yielded => {
                if let Err(err) = self.store.transition(
                    id,
                    &[TaskStatus::Running],
                    TaskStatus::Ready,
                    TransitionUpdate::none(),
                ) {
                    warn!(task = %id, error = %err, "could not requeue yielded task");
                } else {
                    info!(task = %id, "task yielded; requeued");
                }
            }
            Outcome::Decomposition(specs) => self.decompose(id, &specs),
        }
    }

    fn on_slice_expired(&mut self, id: TaskId, dispatch: u64) {
        if self.in_flight.get(&id) != Some(&dispatch) {
            return;
        }
        if self.yield_requested.insert(id) {
            debug!(task = %id, dispatch, "time slice expired; requesting yield");
            self.outbox.push(CoreCommand::RequestYield { task: id, dispatch });
        }
    }

    fn on_deadline_expired(&mut self, id: TaskId, dispatch: u64) {
        if self.in_flight.get(&id) != Some(&dispatch) {
            return;
        }

        let budget = self
            .store
            .get(id)
            .and_then(|t| t.timeout)
            .unwrap_or_default();
        warn!(task = %id, ?budget, "task timed out");

        let error = TaskError::new(
            FailureKind::Timeout,
            format!("task exceeded its timeout of {budget:?}"),
        );
        if self.force_stop(id, TaskStatus::Failed, error) {
            self.settle([id]);
        }
    }

    fn decompose(&mut self, id: TaskId, specs: &[SubtaskSpec]) {
        match apply_decomposition(&mut self.store, id, specs) {
            Ok(children) if children.is_empty() => {
                debug!(task = %id, "empty decomposition; completing parent");
                let mut work = VecDeque::new();
                self.evaluate_parent(id, &mut work);
                self.drain(work);
            }
            Ok(_) => {}
            Err(err) => {
                warn!(task = %id, error = %err, "decomposition rejected");
                let error = TaskError::new(FailureKind::InvalidDecomposition, err.to_string());
                self.finish(id, TaskStatus::Failed, TransitionUpdate::error(error));
            }
        }
    }

    // ---------------------------------------------------------------------
    // Dispatch
    // ---------------------------------------------------------------------

    fn pump(&mut self) {
        loop {
            let mut changed = false;

            for id in find_ready(&self.store) {
                if self
                    .store
                    .transition(
                        id,
                        &[TaskStatus::WaitingForDependencies],
                        TaskStatus::Ready,
                        TransitionUpdate::none(),
                    )
                    .is_ok()
                {
                    changed = true;
                }
            }

            let blocked = find_blocked(&self.store);
            for (task, culprit) in blocked {
                if let Some((to, error)) = self.dependency_verdict(culprit) {
                    if self
                        .store
                        .transition(
                            task,
                            &[TaskStatus::WaitingForDependencies],
                            to,
                            TransitionUpdate::error(error),
                        )
                        .is_ok()
                    {
                        self.settle([task]);
                        changed = true;
                    }
                }
            }

            if !changed {
                break;
            }
        }

        self.dispatch_ready();
        self.preempt();
    }

    fn dispatch_ready(&mut self) {
        while self.gate.available() > 0 {
            let picks = {
                let ready = self.store.with_status(TaskStatus::Ready);
                if ready.is_empty() {
                    break;
                }
                self.strategy.select_next(&ready, self.gate.available())
            };

            let mut dispatched = false;
            for id in picks {
                match self.dispatch(id) {
                    Ok(()) => dispatched = true,
                    Err(err) => warn!(task = %id, error = %err, "dispatch failed"),
                }
            }
            if !dispatched {
                break;
            }
        }
    }

    fn dispatch(&mut self, id: TaskId) -> Result<()> {
        self.gate.try_acquire(id)?;

        let slice = self.strategy.time_slice();
        let task = match self.store.transition(
            id,
            &[TaskStatus::Ready],
            TaskStatus::Running,
            TransitionUpdate::time_slice(slice),
        ) {
            Ok(task) => task.clone(),
            Err(err) => {
                self.gate.release(id);
                return Err(err);
            }
        };

        self.next_dispatch += 1;
        let dispatch = self.next_dispatch;
        self.in_flight.insert(id, dispatch);

        let deadline = task.timeout.map(|t| t.saturating_sub(task.run_time));
        info!(
            task = %id,
            name = %task.name,
            dispatch,
            attempt = task.dispatch_count,
            "dispatching task"
        );

        self.outbox.push(CoreCommand::Dispatch(Dispatch {
            attempt: task.dispatch_count,
            task,
            dispatch,
            time_slice: slice,
            deadline,
        }));
        Ok(())
    }

    /// While the gate is full, ask the strategy whether a running task
    /// should make room for a ready one.
    fn preempt(&mut self) {
        if !self.gate.is_full() {
            return;
        }

        loop {
            let victim = {
                let contenders = self.store.with_status(TaskStatus::Ready);
                if contenders.len() <= self.yield_requested.len() {
                    break;
                }
                let running: Vec<&Task> = self
                    .store
                    .with_status(TaskStatus::Running)
                    .into_iter()
                    .filter(|t| !self.yield_requested.contains(&t.id))
                    .collect();
                self.strategy.preemption_victim(&contenders, &running)
            };

            let Some(victim) = victim else { break };
            let Some(&dispatch) = self.in_flight.get(&victim) else {
                break;
            };

            self.yield_requested.insert(victim);
            info!(task = %victim, dispatch, "preempting task for a more urgent one");
            self.outbox.push(CoreCommand::RequestYield {
                task: victim,
                dispatch,
            });
        }
    }

    // ---------------------------------------------------------------------
    // Settling
    // ---------------------------------------------------------------------

    /// Transition a running task to a terminal state and propagate.
    fn finish(&mut self, id: TaskId, to: TaskStatus, update: TransitionUpdate) {
        let transitioned = self
            .store
            .transition(id, &[TaskStatus::Running], to, update)
            .map(|_| ());
        match transitioned {
            Ok(()) => self.settle([id]),
            Err(err) => warn!(task = %id, error = %err, "could not finish task"),
        }
    }

    /// Move any non-terminal task to `to`, releasing its slot if it held
    /// one. Returns whether the transition happened.
    fn force_stop(&mut self, id: TaskId, to: TaskStatus, error: TaskError) -> bool {
        let was_running = self
            .store
            .get(id)
            .is_some_and(|t| t.status == TaskStatus::Running);

        if let Err(err) = self
            .store
            .transition(id, &NON_TERMINAL, to, TransitionUpdate::error(error))
        {
            debug!(task = %id, error = %err, "task not stopped");
            return false;
        }

        if was_running {
            self.gate.release(id);
            self.yield_requested.remove(&id);
            if let Some(dispatch) = self.in_flight.remove(&id) {
                self.outbox.push(CoreCommand::Abort { task: id, dispatch });
            }
        }
        true
    }

    /// Cancel `id` and every unfinished descendant, children first.
    /// Returns the ids that were cancelled.
    fn cancel_tree(&mut self, id: TaskId, error: &TaskError) -> Vec<TaskId> {
        let children = self
            .store
            .get(id)
            .map(|t| t.children.clone())
            .unwrap_or_default();

        let mut cancelled = Vec::new();
        for child in children {
            cancelled.extend(self.cancel_tree(child, error));
        }
        if self.force_stop(id, TaskStatus::Cancelled, error.clone()) {
            cancelled.push(id);
        }
        cancelled
    }

    /// What a dependent of `culprit` becomes, if `culprit` blocks it.
    fn dependency_verdict(&self, culprit: TaskId) -> Option<(TaskStatus, TaskError)> {
        let dep = self.store.get(culprit)?;
        if !dep.is_terminal() || dep.satisfies_dependents() {
            return None;
        }

        Some(if dep.status == TaskStatus::Cancelled {
            (
                TaskStatus::Cancelled,
                TaskError::new(
                    FailureKind::CancellationRequested,
                    format!("dependency {} ('{}') was cancelled", dep.id, dep.name),
                ),
            )
        } else {
            (
                TaskStatus::Failed,
                TaskError::new(
                    FailureKind::DependencyFailed,
                    format!("dependency {} ('{}') failed", dep.id, dep.name),
                ),
            )
        })
    }

    /// Propagate terminal transitions of `ids` to dependents and parents.
    fn settle(&mut self, ids: impl IntoIterator<Item = TaskId>) {
        self.drain(ids.into_iter().collect());
    }

    fn drain(&mut self, mut work: VecDeque<TaskId>) {
        while let Some(id) = work.pop_front() {
            let Some(task) = self.store.get(id) else {
                continue;
            };
            let parent = task.parent_id;

            if let Some((to, error)) = self.dependency_verdict(id) {
                let dependents = self.store.dependents_of(id).to_vec();
                for dependent in dependents {
                    if self
                        .store
                        .transition(
                            dependent,
                            &[TaskStatus::WaitingForDependencies],
                            to,
                            TransitionUpdate::error(error.clone()),
                        )
                        .is_ok()
                    {
                        debug!(task = %dependent, dependency = %id, status = %to, "dependency cascade");
                        work.push_back(dependent);
                    }
                }
            }

            if let Some(parent) = parent {
                self.evaluate_parent(parent, &mut work);
            }
        }
    }

    fn evaluate_parent(&mut self, parent: TaskId, work: &mut VecDeque<TaskId>) {
        let verdict = coordinator::evaluate_parent(
            &self.store,
            parent,
            self.aggregation,
            self.aggregator.as_ref(),
        );

        match verdict {
            None | Some(ParentVerdict::Waiting) => {}
            Some(ParentVerdict::FailFast { siblings, error }) => {
                let stop = TaskError::new(
                    FailureKind::CancellationRequested,
                    format!("sibling failed; parent {parent} is failing fast"),
                );
                for sibling in siblings {
                    work.extend(self.cancel_tree(sibling, &stop));
                }

                info!(task = %parent, error = %error, "parent failed fast");
                if self
                    .store
                    .transition(
                        parent,
                        &[TaskStatus::WaitingForSubtasks],
                        TaskStatus::Failed,
                        TransitionUpdate::error(error),
                    )
                    .is_ok()
                {
                    work.push_back(parent);
                }
            }
            Some(ParentVerdict::Complete { result }) => {
                info!(task = %parent, "all subtasks finished; parent completed");
                if self
                    .store
                    .transition(
                        parent,
                        &[TaskStatus::WaitingForSubtasks],
                        TaskStatus::Completed,
                        TransitionUpdate::result(result),
                    )
                    .is_ok()
                {
                    work.push_back(parent);
                }
            }
        }
    }
}
