// src/dag/resolver.rs

//! Dependency resolution over a consistent view of the store.
//!
//! Both functions take `&TaskStore`, so every status they read comes from
//! the same snapshot: a dependency can never be observed half-way through a
//! transition while its dependents are being evaluated.

use tracing::{debug, warn};

use crate::dag::store::TaskStore;
use crate::dag::task::Task;
use crate::types::{TaskId, TaskStatus};

/// Tasks in `WAITING_FOR_DEPENDENCIES` whose every dependency is satisfied.
///
/// A dependency is satisfied once it is `COMPLETED`, or `FAILED` while
/// marked optional. Results are in id order.
pub fn find_ready(store: &TaskStore) -> Vec<TaskId> {
    store
        .with_status(TaskStatus::WaitingForDependencies)
        .into_iter()
        .filter(|task| deps_satisfied(store, task))
        .map(|task| {
            debug!(task = %task.id, name = %task.name, "dependencies satisfied");
            task.id
        })
        .collect()
}

/// Waiting tasks that can never become ready because one of their
/// dependencies ended without satisfying them.
///
/// Returns `(blocked, culprit)` pairs. The failure cascade normally catches
/// these as they happen; this scan covers tasks admitted *after* their
/// dependency had already failed or been cancelled.
pub fn find_blocked(store: &TaskStore) -> Vec<(TaskId, TaskId)> {
    store
        .with_status(TaskStatus::WaitingForDependencies)
        .into_iter()
        .filter_map(|task| {
            task.dependencies
                .iter()
                .filter_map(|dep| store.get(*dep))
                .find(|dep| dep.is_terminal() && !dep.satisfies_dependents())
                .map(|dep| (task.id, dep.id))
        })
        .collect()
}

/// Whether all dependencies of `task` are satisfied.
pub fn deps_satisfied(store: &TaskStore, task: &Task) -> bool {
    task.dependencies.iter().all(|dep_id| match store.get(*dep_id) {
        Some(dep) => dep.satisfies_dependents(),
        None => {
            // Admission rejects unknown ids, so this means store corruption.
            warn!(task = %task.id, dep = %dep_id, "dependency missing from store");
            false
        }
    })
}
