// src/dag/strategy.rs

//! Pluggable dispatch ordering.
//!
//! A strategy is a pure function over a snapshot of ready (and, for
//! preemption, running) tasks. It never touches the store; swapping one out
//! only changes how the next dispatch decision is ordered.

use std::cmp::Ordering;
use std::fmt;
use std::time::Duration;

use crate::dag::task::Task;
use crate::types::{SchedulingPolicy, TaskId};

pub trait SchedulingStrategy: Send + Sync + fmt::Debug {
    fn policy(&self) -> SchedulingPolicy;

    /// Compare two ready tasks; `Less` dispatches first.
    fn compare(&self, a: &Task, b: &Task) -> Ordering;

    /// Up to `capacity` ready tasks to dispatch, in dispatch order.
    fn select_next(&self, ready: &[&Task], capacity: usize) -> Vec<TaskId> {
        let mut ordered: Vec<&Task> = ready.to_vec();
        ordered.sort_by(|a, b| self.compare(a, b));
        ordered.into_iter().take(capacity).map(|t| t.id).collect()
    }

    /// Slice granted on every dispatch, if the strategy time-slices.
    fn time_slice(&self) -> Option<Duration> {
        None
    }

    /// A running task to requeue so that the best of `contenders` can run.
    ///
    /// Only consulted while the gate is full.
    fn preemption_victim(&self, _contenders: &[&Task], _running: &[&Task]) -> Option<TaskId> {
        None
    }
}

/// Build the strategy for `policy`. `time_slice` only matters for
/// round-robin.
pub fn strategy_for(policy: SchedulingPolicy, time_slice: Duration) -> Box<dyn SchedulingStrategy> {
    match policy {
        SchedulingPolicy::Fifo => Box::new(Fifo),
        SchedulingPolicy::Priority => Box::new(PriorityOrder),
        SchedulingPolicy::RoundRobin => Box::new(RoundRobin::new(time_slice)),
        SchedulingPolicy::PreemptivePriority => Box::new(PreemptivePriority),
        SchedulingPolicy::ShortestJobFirst => Box::new(ShortestJobFirst),
    }
}

/// Submission order. Ids are minted monotonically, so they double as the
/// creation timestamp without clock ties.
fn by_submission(a: &Task, b: &Task) -> Ordering {
    a.id.cmp(&b.id)
}

fn by_priority(a: &Task, b: &Task) -> Ordering {
    a.priority
        .cmp(&b.priority)
        .then_with(|| by_submission(a, b))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Fifo;

impl SchedulingStrategy for Fifo {
    fn policy(&self) -> SchedulingPolicy {
        SchedulingPolicy::Fifo
    }

    fn compare(&self, a: &Task, b: &Task) -> Ordering {
        by_submission(a, b)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PriorityOrder;

impl SchedulingStrategy for PriorityOrder {
    fn policy(&self) -> SchedulingPolicy {
        SchedulingPolicy::Priority
    }

    fn compare(&self, a: &Task, b: &Task) -> Ordering {
        by_priority(a, b)
    }
}

/// FIFO over the ready queue, with a slice per dispatch. A task that yields
/// when its slice runs out re-enters `READY` with a fresh `ready_seq` and so
/// lands behind everything already waiting.
#[derive(Debug, Clone, Copy)]
pub struct RoundRobin {
    slice: Duration,
}

impl RoundRobin {
    pub fn new(slice: Duration) -> Self {
        Self { slice }
    }
}

impl SchedulingStrategy for RoundRobin {
    fn policy(&self) -> SchedulingPolicy {
        SchedulingPolicy::RoundRobin
    }

    fn compare(&self, a: &Task, b: &Task) -> Ordering {
        a.ready_seq
            .cmp(&b.ready_seq)
            .then_with(|| by_submission(a, b))
    }

    fn time_slice(&self) -> Option<Duration> {
        Some(self.slice)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PreemptivePriority;

impl SchedulingStrategy for PreemptivePriority {
    fn policy(&self) -> SchedulingPolicy {
        SchedulingPolicy::PreemptivePriority
    }

    fn compare(&self, a: &Task, b: &Task) -> Ordering {
        by_priority(a, b)
    }

    /// The least urgent running task (latest submitted among equals), but
    /// only if the best contender is strictly more urgent than it.
    fn preemption_victim(&self, contenders: &[&Task], running: &[&Task]) -> Option<TaskId> {
        let best = contenders.iter().min_by(|a, b| by_priority(a, b))?;
        let victim = running.iter().max_by(|a, b| by_priority(a, b))?;

        (best.priority < victim.priority).then_some(victim.id)
    }
}

/// Ascending estimate; a missing estimate sorts after every known one.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShortestJobFirst;

impl SchedulingStrategy for ShortestJobFirst {
    fn policy(&self) -> SchedulingPolicy {
        SchedulingPolicy::ShortestJobFirst
    }

    fn compare(&self, a: &Task, b: &Task) -> Ordering {
        let a_est = a.estimated_time.unwrap_or(f64::INFINITY);
        let b_est = b.estimated_time.unwrap_or(f64::INFINITY);
        a_est
            .total_cmp(&b_est)
            .then_with(|| by_submission(a, b))
    }
}
