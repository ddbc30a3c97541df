// src/dag/graph.rs

use std::collections::HashMap;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::errors::{Result, SchedulerError};
use crate::types::TaskId;

/// Reverse dependency index: for each task, the tasks that list it in their
/// `dependencies`.
///
/// Forward edges live on the tasks themselves; this index only exists so
/// that failure cascades and re-evaluation after a completion do not have to
/// scan the whole store.
#[derive(Debug, Clone, Default)]
pub struct DagGraph {
    dependents: HashMap<TaskId, Vec<TaskId>>,
}

impl DagGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly admitted task and its direct dependencies.
    pub fn add_task(&mut self, id: TaskId, deps: &[TaskId]) {
        self.dependents.entry(id).or_default();
        for dep in deps {
            self.dependents.entry(*dep).or_default().push(id);
        }
    }

    /// Immediate dependents of a task.
    pub fn dependents_of(&self, id: TaskId) -> &[TaskId] {
        self.dependents
            .get(&id)
            .map(|d| d.as_slice())
            .unwrap_or(&[])
    }
}

/// Verify that a batch of locally keyed tasks forms a DAG.
///
/// `edges` are `(dependency, dependent)` pairs. Tasks that already exist in
/// the store can never depend on ids minted by this batch, so the only
/// cycles adding the batch can introduce are among its own members.
///
/// Returns the members in a topological order (dependencies first).
pub fn ensure_acyclic<'a>(
    keys: impl IntoIterator<Item = &'a str>,
    edges: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> Result<Vec<&'a str>> {
    // Edge direction: dep -> task. For B after A we add A -> B.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for key in keys {
        graph.add_node(key);
    }
    for (dep, task) in edges {
        graph.add_edge(dep, task, ());
    }

    // A topological sort fails exactly when there is a cycle (self loops
    // included).
    toposort(&graph, None)
        .map_err(|cycle| SchedulerError::CycleDetected(cycle.node_id().to_string()))
}
