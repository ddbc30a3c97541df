// src/exec/mod.rs

//! Execution layer.
//!
//! This module defines what the driver expects from the collaborators that
//! actually perform work, and ships the process-based executor used by the
//! `taskdag` binary.
//!
//! - [`backend`] holds the [`Executor`] / [`Planner`] traits and the
//!   per-dispatch [`ExecutionContext`].
//! - [`command`] runs task payloads as shell commands.

pub mod backend;
pub mod command;

pub use backend::{BoxFuture, ExecutionContext, Executor, Planner};
pub use command::{CommandExecutor, PLAN_KIND};
