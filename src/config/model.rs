// src/config/model.rs

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;

use crate::dag::{SubtaskSpec, TaskSpec};
use crate::engine::DriverConfig;
use crate::types::{AggregationPolicy, SchedulingPolicy};

/// Configuration exactly as read from a TOML file:
///
/// ```toml
/// [scheduler]
/// concurrency = 3
/// strategy = "round_robin"
/// time_slice_ms = 500
///
/// [task.fetch]
/// cmd = "curl -s example.org"
/// priority = 1
///
/// [task.report]
/// cmd = "echo done"
/// after = ["fetch"]
/// ```
///
/// All sections except `[task.*]` are optional. Turn it into a validated
/// [`ConfigFile`] with `ConfigFile::try_from`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub scheduler: SchedulerSection,

    /// All tasks from `[task.<name>]`, keyed by name.
    #[serde(default)]
    pub task: BTreeMap<String, TaskConfig>,
}

/// A configuration that passed validation.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub scheduler: SchedulerSection,
    pub task: BTreeMap<String, TaskConfig>,
}

/// `[scheduler]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerSection {
    /// Gate capacity: how many tasks may run at once.
    pub concurrency: usize,
    /// Dispatch order for ready tasks.
    ///
    /// Slices and preemption only ask a running task to yield. Shell
    /// commands never do, so with them `round_robin` behaves like `fifo`
    /// and `preemptive_priority` like `priority`.
    pub strategy: SchedulingPolicy,
    /// Slice per dispatch under round-robin.
    pub time_slice_ms: u64,
    pub aggregation: AggregationPolicy,
    /// Capacity of the handle -> driver mailbox.
    pub event_buffer: usize,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            concurrency: 4,
            strategy: SchedulingPolicy::default(),
            time_slice_ms: 1000,
            aggregation: AggregationPolicy::default(),
            event_buffer: 64,
        }
    }
}

/// `[task.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskConfig {
    /// Shell command to execute.
    pub cmd: String,

    /// Type tag; `"plan"` makes stdout a list of subtasks.
    #[serde(default)]
    pub kind: Option<String>,

    /// Lower value = more urgent.
    #[serde(default)]
    pub priority: i64,

    /// Used by `shortest_job_first`.
    #[serde(default)]
    pub estimated_time: Option<f64>,

    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// Failure does not block dependents.
    #[serde(default)]
    pub optional: bool,

    /// Tasks that must complete before this one may run.
    #[serde(default)]
    pub after: Vec<String>,

    #[serde(default)]
    pub tags: Vec<String>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        scheduler: SchedulerSection,
        task: BTreeMap<String, TaskConfig>,
    ) -> Self {
        Self { scheduler, task }
    }

    /// Driver settings derived from `[scheduler]`.
    pub fn driver_config(&self) -> DriverConfig {
        DriverConfig {
            concurrency: self.scheduler.concurrency,
            policy: self.scheduler.strategy,
            time_slice: Duration::from_millis(self.scheduler.time_slice_ms),
            aggregation: self.scheduler.aggregation,
            exit_when_idle: false,
            event_buffer: self.scheduler.event_buffer,
        }
    }

    /// Every task as a graph descriptor, in name order.
    pub fn to_graph(&self) -> Vec<SubtaskSpec> {
        self.task
            .iter()
            .map(|(name, cfg)| SubtaskSpec {
                key: name.clone(),
                task: cfg.to_spec(name),
                after: cfg.after.clone(),
            })
            .collect()
    }
}

impl TaskConfig {
    fn to_spec(&self, name: &str) -> TaskSpec {
        TaskSpec {
            name: name.to_string(),
            kind: self.kind.clone().unwrap_or_default(),
            payload: json!({ "cmd": self.cmd }),
            priority: self.priority,
            estimated_time: self.estimated_time,
            timeout_ms: self.timeout_ms,
            optional: self.optional,
            tags: self.tags.clone(),
            dependencies: Vec::new(),
        }
    }
}
