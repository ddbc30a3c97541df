// src/dag/store.rs

//! Authoritative in-memory registry of tasks.
//!
//! The store is the only place a [`Task`] is ever mutated. It is owned by a
//! single writer (the driver core), so `&mut self` on [`TaskStore::transition`]
//! is what makes every transition atomic: the expected-status check and the
//! write cannot interleave with any other reader or writer.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::time::Instant;
use tracing::debug;

use crate::dag::graph::{ensure_acyclic, DagGraph};
use crate::dag::task::{StatusChange, SubtaskSpec, Task, TaskSpec, DEFAULT_KIND};
use crate::errors::{FailureKind, Result, SchedulerError, TaskError};
use crate::types::{TaskId, TaskStatus};

/// Fields written together with a status change.
///
/// Which fields are honoured depends on the target status: `result` and
/// `error` only on terminal transitions, `children` only when entering
/// `WAITING_FOR_SUBTASKS`, `time_slice` only when entering `RUNNING`.
#[derive(Debug, Clone, Default)]
pub struct TransitionUpdate {
    pub result: Option<Value>,
    pub error: Option<TaskError>,
    pub children: Option<Vec<TaskId>>,
    pub time_slice: Option<Duration>,
}

impl TransitionUpdate {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn result(result: Value) -> Self {
        Self {
            result: Some(result),
            ..Self::default()
        }
    }

    pub fn error(error: TaskError) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }

    pub fn children(children: Vec<TaskId>) -> Self {
        Self {
            children: Some(children),
            ..Self::default()
        }
    }

    pub fn time_slice(slice: Option<Duration>) -> Self {
        Self {
            time_slice: slice,
            ..Self::default()
        }
    }
}

#[derive(Debug, Default)]
pub struct TaskStore {
    tasks: BTreeMap<TaskId, Task>,
    graph: DagGraph,
    next_id: u64,
    next_ready_seq: u64,
    next_change_seq: u64,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a single task whose dependencies already exist.
    ///
    /// A lone task can only reference ids minted before it, so it can never
    /// close a cycle; unknown ids are rejected instead.
    pub fn create(&mut self, spec: TaskSpec) -> Result<TaskId> {
        let key = display_name(&spec, "task");
        self.ensure_known(&key, &spec.dependencies)?;

        let id = self.mint_id();
        let deps = dedup(spec.dependencies.clone());
        self.insert(id, &spec, deps, None)?;
        Ok(id)
    }

    /// Admit a batch of tasks that reference each other by local key.
    ///
    /// The whole batch is validated before any id is minted: duplicate keys,
    /// unknown references and cycles all reject the batch and leave the store
    /// untouched. Returned ids follow descriptor order.
    pub fn create_graph(
        &mut self,
        specs: &[SubtaskSpec],
        parent: Option<TaskId>,
    ) -> Result<Vec<TaskId>> {
        if let Some(parent) = parent {
            self.task(parent)?;
        }

        let mut index: HashMap<&str, usize> = HashMap::new();
        for (i, spec) in specs.iter().enumerate() {
            if index.insert(spec.key.as_str(), i).is_some() {
                return Err(SchedulerError::DuplicateKey(spec.key.clone()));
            }
        }

        let mut edges = Vec::new();
        for spec in specs {
            for dep in &spec.after {
                if !index.contains_key(dep.as_str()) {
                    return Err(SchedulerError::UnknownDependency {
                        task: spec.key.clone(),
                        dependency: dep.clone(),
                    });
                }
                edges.push((dep.as_str(), spec.key.as_str()));
            }
            self.ensure_known(&spec.key, &spec.task.dependencies)?;
            if let Some(parent) = parent {
                self.ensure_not_waiting_on(parent, &spec.key, &spec.task.dependencies)?;
            }
        }

        ensure_acyclic(specs.iter().map(|s| s.key.as_str()), edges)?;

        let ids: Vec<TaskId> = specs.iter().map(|_| self.mint_id()).collect();

        for (spec, id) in specs.iter().zip(&ids) {
            let mut deps = spec.task.dependencies.clone();
            deps.extend(spec.after.iter().map(|key| ids[index[key.as_str()]]));
            let mut task = spec.task.clone();
            if task.name.is_empty() {
                task.name = spec.key.clone();
            }
            self.insert(*id, &task, dedup(deps), parent)?;
        }

        Ok(ids)
    }

    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(&id)
    }

    /// Like [`get`](Self::get) but reports unknown ids as an error.
    pub fn task(&self, id: TaskId) -> Result<&Task> {
        self.tasks.get(&id).ok_or(SchedulerError::TaskNotFound(id))
    }

    /// The single mutation primitive.
    ///
    /// Succeeds only if the task's current status is one of `from` and the
    /// lifecycle has an edge to `to`; otherwise nothing changes and
    /// `InvalidTransition` is returned.
    pub fn transition(
        &mut self,
        id: TaskId,
        from: &[TaskStatus],
        to: TaskStatus,
        update: TransitionUpdate,
    ) -> Result<&Task> {
        let task = self
            .tasks
            .get_mut(&id)
            .ok_or(SchedulerError::TaskNotFound(id))?;
        let current = task.status;

        if !from.contains(&current) || !current.can_transition_to(to) {
            return Err(SchedulerError::InvalidTransition {
                id,
                from: current,
                to,
            });
        }

        let now = Utc::now();
        let instant = Instant::now();

        if current == TaskStatus::Running {
            if let Some(since) = task.running_since.take() {
                let elapsed = instant.saturating_duration_since(since);
                task.run_time += elapsed;
                task.time_slice_remaining = task
                    .time_slice_remaining
                    .map(|slice| slice.saturating_sub(elapsed));
            }
        }

        match to {
            TaskStatus::Ready => {
                task.ready_seq = self.next_ready_seq;
                self.next_ready_seq += 1;
            }
            TaskStatus::Running => {
                task.running_since = Some(instant);
                task.dispatch_count += 1;
                task.time_slice_remaining = update.time_slice;
                task.started_at.get_or_insert(now);
            }
            TaskStatus::WaitingForSubtasks => {
                if let Some(children) = update.children {
                    task.children = children;
                }
            }
            _ => {}
        }

        if to.is_terminal() {
            task.completed_at = Some(now);
            task.result = update.result;
            task.error = match to {
                TaskStatus::Failed => Some(update.error.unwrap_or_else(|| {
                    TaskError::new(FailureKind::ExecutionError, "task failed")
                })),
                TaskStatus::Cancelled => Some(update.error.unwrap_or_else(|| {
                    TaskError::new(FailureKind::CancellationRequested, "task cancelled")
                })),
                _ => None,
            };
        }

        task.status = to;
        task.updated_at = now;
        task.history.push(StatusChange {
            seq: self.next_change_seq,
            from: current,
            to,
            at: now,
        });
        self.next_change_seq += 1;

        debug!(task = %id, name = %task.name, from = %current, to = %to, "task transition");

        Ok(&*task)
    }

    /// All tasks matching `predicate`, in id (= submission) order.
    pub fn query<F>(&self, predicate: F) -> Vec<&Task>
    where
        F: Fn(&Task) -> bool,
    {
        self.tasks.values().filter(|t| predicate(t)).collect()
    }

    pub fn with_status(&self, status: TaskStatus) -> Vec<&Task> {
        self.query(|t| t.status == status)
    }

    pub fn count(&self, status: TaskStatus) -> usize {
        self.tasks.values().filter(|t| t.status == status).count()
    }

    pub fn dependents_of(&self, id: TaskId) -> &[TaskId] {
        self.graph.dependents_of(id)
    }

    /// Whether any task has not reached a terminal state yet.
    pub fn has_unfinished(&self) -> bool {
        self.tasks.values().any(|t| !t.is_terminal())
    }

    /// Point-in-time copy of every task.
    pub fn snapshot(&self) -> Vec<Task> {
        self.tasks.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    fn mint_id(&mut self) -> TaskId {
        self.next_id += 1;
        TaskId(self.next_id)
    }

    fn ensure_known(&self, task: &str, deps: &[TaskId]) -> Result<()> {
        match deps.iter().find(|dep| !self.tasks.contains_key(dep)) {
            Some(missing) => Err(SchedulerError::UnknownDependency {
                task: task.to_string(),
                dependency: missing.to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Reject external dependencies of a new child of `parent` that would
    /// close a cycle through the parent-completion edge.
    ///
    /// The child is waited on by `parent` and every ancestor above it. Any
    /// unfinished task that (through dependencies or its own children) waits
    /// on one of those ancestors would therefore wait on the child.
    fn ensure_not_waiting_on(&self, parent: TaskId, key: &str, deps: &[TaskId]) -> Result<()> {
        let mut ancestors = HashSet::new();
        let mut cursor = Some(parent);
        while let Some(id) = cursor {
            if !ancestors.insert(id) {
                break;
            }
            cursor = self.tasks.get(&id).and_then(|t| t.parent_id);
        }

        let mut seen = HashSet::new();
        let mut stack: Vec<TaskId> = deps.to_vec();
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            if ancestors.contains(&id) {
                return Err(SchedulerError::CycleDetected(key.to_string()));
            }
            if let Some(task) = self.tasks.get(&id) {
                if task.is_terminal() {
                    continue;
                }
                stack.extend(task.dependencies.iter().copied());
                stack.extend(task.children.iter().copied());
            }
        }
        Ok(())
    }

    /// Register a task as `CREATED` and immediately admit it.
    fn insert(
        &mut self,
        id: TaskId,
        spec: &TaskSpec,
        dependencies: Vec<TaskId>,
        parent_id: Option<TaskId>,
    ) -> Result<()> {
        let now = Utc::now();
        let kind = if spec.kind.is_empty() {
            DEFAULT_KIND.to_string()
        } else {
            spec.kind.clone()
        };

        let task = Task {
            id,
            name: display_name(spec, &kind),
            kind,
            status: TaskStatus::Created,
            dependencies: dependencies.clone(),
            parent_id,
            children: Vec::new(),
            payload: spec.payload.clone(),
            priority: spec.priority,
            estimated_time: spec.estimated_time,
            time_slice_remaining: None,
            timeout: spec.timeout_ms.map(Duration::from_millis),
            optional: spec.optional,
            tags: spec.tags.clone(),
            result: None,
            error: None,
            ready_seq: 0,
            dispatch_count: 0,
            run_time: Duration::ZERO,
            running_since: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            history: Vec::new(),
        };

        self.tasks.insert(id, task);
        self.graph.add_task(id, &dependencies);

        let admitted = if dependencies.is_empty() {
            TaskStatus::Ready
        } else {
            TaskStatus::WaitingForDependencies
        };
        self.transition(id, &[TaskStatus::Created], admitted, TransitionUpdate::none())?;
        Ok(())
    }
}

fn display_name(spec: &TaskSpec, fallback: &str) -> String {
    if spec.name.is_empty() {
        fallback.to_string()
    } else {
        spec.name.clone()
    }
}

fn dedup(ids: Vec<TaskId>) -> Vec<TaskId> {
    let mut seen = HashSet::new();
    ids.into_iter().filter(|id| seen.insert(*id)).collect()
}
