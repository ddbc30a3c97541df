// src/dag/coordinator.rs

//! Parent/child coordination for decomposing tasks.
//!
//! A decomposition turns a running task into a parent waiting on freshly
//! created children. The coordinator decides what happens to the parent
//! each time one of its children settles; the driver core applies that
//! decision (it owns the gate and the in-flight executions).

use serde_json::{json, Value};
use tracing::{debug, info};

use crate::dag::store::{TaskStore, TransitionUpdate};
use crate::dag::task::{SubtaskSpec, Task};
use crate::errors::{FailureKind, Result, TaskError};
use crate::types::{AggregationPolicy, TaskId, TaskStatus};

/// Builds a parent's result out of its terminal children.
///
/// Supplied by whoever understands the payloads (the executor/planner side);
/// the coordinator only decides *when* to call it.
pub trait Aggregator: Send + Sync {
    fn aggregate(&self, parent: &Task, children: &[&Task]) -> Value;
}

/// Default aggregator: one entry per child with its status and outcome.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChildSummary;

impl Aggregator for ChildSummary {
    fn aggregate(&self, _parent: &Task, children: &[&Task]) -> Value {
        let entries: Vec<Value> = children
            .iter()
            .map(|child| {
                json!({
                    "id": child.id,
                    "name": child.name,
                    "status": child.status,
                    "result": child.result,
                    "error": child.error,
                })
            })
            .collect();

        let completed = children
            .iter()
            .filter(|c| c.status == TaskStatus::Completed)
            .count();

        json!({
            "children": entries,
            "completed": completed,
            "total": children.len(),
        })
    }
}

/// What should happen to a parent after one of its children settled.
#[derive(Debug, Clone)]
pub enum ParentVerdict {
    /// Some children are still unfinished.
    Waiting,
    /// Fail-fast tripped: stop `siblings`, then fail the parent.
    FailFast {
        siblings: Vec<TaskId>,
        error: TaskError,
    },
    /// Every child is terminal; complete the parent with `result`.
    Complete { result: Value },
}

/// Create the children described by `specs` under `parent` and park the
/// parent in `WAITING_FOR_SUBTASKS`.
///
/// The sub-graph is validated as a whole first; on error nothing is created
/// and the parent is left `RUNNING` for the caller to fail.
pub fn apply_decomposition(
    store: &mut TaskStore,
    parent: TaskId,
    specs: &[SubtaskSpec],
) -> Result<Vec<TaskId>> {
    let children = store.create_graph(specs, Some(parent))?;

    store.transition(
        parent,
        &[TaskStatus::Running],
        TaskStatus::WaitingForSubtasks,
        TransitionUpdate::children(children.clone()),
    )?;

    info!(task = %parent, children = children.len(), "task decomposed into subtasks");
    Ok(children)
}

/// Decide the parent's fate once `parent`'s children may have changed.
///
/// Returns `None` if `parent` is not waiting on subtasks (it may already have
/// been failed by fail-fast or cancelled).
pub fn evaluate_parent(
    store: &TaskStore,
    parent: TaskId,
    policy: AggregationPolicy,
    aggregator: &dyn Aggregator,
) -> Option<ParentVerdict> {
    let parent_task = store.get(parent)?;
    if parent_task.status != TaskStatus::WaitingForSubtasks {
        return None;
    }

    let children: Vec<&Task> = parent_task
        .children
        .iter()
        .filter_map(|id| store.get(*id))
        .collect();

    if policy == AggregationPolicy::FailFast {
        let culprit = children.iter().find(|c| {
            c.status == TaskStatus::Cancelled || (c.status == TaskStatus::Failed && !c.optional)
        });

        if let Some(culprit) = culprit {
            let siblings = children
                .iter()
                .filter(|c| !c.is_terminal())
                .map(|c| c.id)
                .collect();
            let detail = culprit
                .error
                .as_ref()
                .map(|e| e.message.clone())
                .unwrap_or_default();
            let error = TaskError::new(
                FailureKind::DependencyFailed,
                format!(
                    "subtask {} ('{}') ended {}: {}",
                    culprit.id, culprit.name, culprit.status, detail
                ),
            );
            debug!(task = %parent, culprit = %culprit.id, "fail-fast tripped");
            return Some(ParentVerdict::FailFast { siblings, error });
        }
    }

    if children.iter().all(|c| c.is_terminal()) {
        let result = aggregator.aggregate(parent_task, &children);
        return Some(ParentVerdict::Complete { result });
    }

    Some(ParentVerdict::Waiting)
}
