// src/dag/gate.rs

//! Bounded concurrency gate.
//!
//! Slots are `tokio::sync::Semaphore` permits keyed by the task holding
//! them, so "a slot is held" and "the task is RUNNING" can be checked
//! against each other, and a slot can only be released by naming its task.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::{debug, warn};

use crate::errors::{Result, SchedulerError};
use crate::types::TaskId;

#[derive(Debug)]
pub struct ConcurrencyGate {
    capacity: usize,
    semaphore: Arc<Semaphore>,
    held: HashMap<TaskId, OwnedSemaphorePermit>,
}

impl ConcurrencyGate {
    /// Create a gate with `capacity` slots (clamped to at least 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            semaphore: Arc::new(Semaphore::new(capacity)),
            held: HashMap::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of free slots.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn in_use(&self) -> usize {
        self.held.len()
    }

    pub fn is_full(&self) -> bool {
        self.available() == 0
    }

    pub fn holds(&self, task: TaskId) -> bool {
        self.held.contains_key(&task)
    }

    /// Take a slot for `task` without waiting.
    ///
    /// This is what the driver uses: it only dispatches after checking
    /// [`available`](Self::available), so waiting would mean a bookkeeping
    /// bug rather than contention.
    pub fn try_acquire(&mut self, task: TaskId) -> Result<()> {
        if self.held.contains_key(&task) {
            return Ok(());
        }

        match Arc::clone(&self.semaphore).try_acquire_owned() {
            Ok(permit) => {
                self.held.insert(task, permit);
                debug!(task = %task, in_use = self.held.len(), "gate slot acquired");
                Ok(())
            }
            Err(TryAcquireError::NoPermits) | Err(TryAcquireError::Closed) => {
                Err(SchedulerError::GateExhausted {
                    capacity: self.capacity,
                })
            }
        }
    }

    /// Wait until a slot is free, then take it for `task`.
    ///
    /// Single-owner helper: the wait holds `&mut self`, so no slot can be
    /// released through this gate while it is pending. Use it only where
    /// another owner of the permits (or a timeout) ends the wait. The driver
    /// never calls it.
    pub async fn acquire(&mut self, task: TaskId) -> Result<()> {
        if self.held.contains_key(&task) {
            return Ok(());
        }

        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| SchedulerError::GateExhausted {
                capacity: self.capacity,
            })?;
        self.held.insert(task, permit);
        debug!(task = %task, in_use = self.held.len(), "gate slot acquired");
        Ok(())
    }

    /// Return the slot held by `task`. Returns `false` if it held none.
    pub fn release(&mut self, task: TaskId) -> bool {
        match self.held.remove(&task) {
            Some(permit) => {
                drop(permit);
                debug!(task = %task, in_use = self.held.len(), "gate slot released");
                true
            }
            None => {
                warn!(task = %task, "release requested for a task holding no slot");
                false
            }
        }
    }
}
