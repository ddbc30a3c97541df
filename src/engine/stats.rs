// src/engine/stats.rs

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;

use crate::dag::{ConcurrencyGate, TaskStore};
use crate::types::{SchedulingPolicy, TaskStatus};

/// Point-in-time scheduler statistics.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStats {
    pub total: usize,
    /// Task count per status, keyed by the status name.
    pub by_status: BTreeMap<String, usize>,
    /// Tasks waiting for dependencies or ready to run.
    pub queued: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Mean time from creation to first dispatch over dispatched tasks.
    pub average_wait_time: Option<Duration>,
    /// Mean gate-held time over tasks that ran at all.
    pub average_execution_time: Option<Duration>,
    pub strategy: SchedulingPolicy,
    pub capacity: usize,
    pub slots_in_use: usize,
}

impl SchedulerStats {
    pub fn collect(store: &TaskStore, strategy: SchedulingPolicy, gate: &ConcurrencyGate) -> Self {
        let by_status: BTreeMap<String, usize> = TaskStatus::ALL
            .iter()
            .map(|status| (status.as_str().to_string(), store.count(*status)))
            .collect();

        let waits: Vec<Duration> = store
            .query(|t| t.started_at.is_some())
            .into_iter()
            .filter_map(|t| t.wait_time())
            .collect();

        let runs: Vec<Duration> = store
            .query(|t| t.dispatch_count > 0)
            .into_iter()
            .map(|t| t.run_time)
            .collect();

        Self {
            total: store.len(),
            queued: store.count(TaskStatus::WaitingForDependencies)
                + store.count(TaskStatus::Ready),
            running: store.count(TaskStatus::Running),
            completed: store.count(TaskStatus::Completed),
            failed: store.count(TaskStatus::Failed),
            cancelled: store.count(TaskStatus::Cancelled),
            by_status,
            average_wait_time: mean(&waits),
            average_execution_time: mean(&runs),
            strategy,
            capacity: gate.capacity(),
            slots_in_use: gate.in_use(),
        }
    }
}

fn mean(samples: &[Duration]) -> Option<Duration> {
    let count = u128::try_from(samples.len()).ok().filter(|n| *n > 0)?;
    let total: u128 = samples.iter().map(Duration::as_nanos).sum();
    Some(Duration::from_nanos(u64::try_from(total / count).unwrap_or(u64::MAX)))
}

