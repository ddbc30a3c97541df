// src/dag/mod.rs

//! Task graph bookkeeping.
//!
//! - [`task`] defines tasks and the descriptors used to create them.
//! - [`graph`] keeps the reverse dependency index and the acyclicity check.
//! - [`store`] is the authoritative registry and its transition primitive.
//! - [`resolver`] finds tasks whose dependencies are satisfied.
//! - [`gate`] bounds how many tasks run at once.
//! - [`strategy`] orders ready tasks for dispatch.
//! - [`coordinator`] handles decomposition and parent aggregation.

pub mod coordinator;
pub mod gate;
pub mod graph;
pub mod resolver;
pub mod store;
pub mod strategy;
pub mod task;

pub use coordinator::{Aggregator, ChildSummary, ParentVerdict};
pub use gate::ConcurrencyGate;
pub use graph::DagGraph;
pub use store::{TaskStore, TransitionUpdate};
pub use strategy::{strategy_for, SchedulingStrategy};
pub use task::{StatusChange, SubtaskSpec, Task, TaskSpec, DEFAULT_KIND, GOAL_KIND};
