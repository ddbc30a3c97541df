#![allow(dead_code)]

use std::collections::BTreeMap;
use std::time::Duration;

use taskdag::config::{ConfigFile, RawConfigFile, SchedulerSection, TaskConfig};
use taskdag::dag::{SubtaskSpec, TaskSpec};
use taskdag::engine::DriverConfig;
use taskdag::types::{AggregationPolicy, SchedulingPolicy};

/// Driver settings for tests: the given strategy and capacity, a 10ms
/// slice and fail-fast aggregation.
pub fn driver_config(policy: SchedulingPolicy, concurrency: usize) -> DriverConfig {
    DriverConfig {
        concurrency,
        policy,
        time_slice: Duration::from_millis(10),
        aggregation: AggregationPolicy::FailFast,
        exit_when_idle: false,
        event_buffer: 16,
    }
}

/// Builder for a graph of locally keyed task descriptors.
///
/// ```ignore
/// let graph = GraphBuilder::new()
///     .node("A", &[])
///     .node("B", &[])
///     .node("C", &["A", "B"])
///     .build();
/// ```
#[derive(Debug, Default)]
pub struct GraphBuilder {
    specs: Vec<SubtaskSpec>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a task named after its key.
    pub fn node(self, key: &str, after: &[&str]) -> Self {
        self.node_with(key, TaskSpec::new(key), after)
    }

    /// Add a task with a custom descriptor.
    pub fn node_with(mut self, key: &str, spec: TaskSpec, after: &[&str]) -> Self {
        let mut node = SubtaskSpec::new(key, spec);
        for dep in after {
            node = node.after(*dep);
        }
        self.specs.push(node);
        self
    }

    pub fn build(self) -> Vec<SubtaskSpec> {
        self.specs
    }
}

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile {
                scheduler: SchedulerSection::default(),
                task: BTreeMap::new(),
            },
        }
    }

    pub fn with_task(mut self, name: &str, task: TaskConfig) -> Self {
        self.config.task.insert(name.to_string(), task);
        self
    }

    pub fn with_strategy(mut self, strategy: SchedulingPolicy) -> Self {
        self.config.scheduler.strategy = strategy;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.config.scheduler.concurrency = concurrency;
        self
    }

    pub fn build_raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `TaskConfig`.
pub struct TaskConfigBuilder {
    task: TaskConfig,
}

impl TaskConfigBuilder {
    pub fn new(cmd: &str) -> Self {
        Self {
            task: TaskConfig {
                cmd: cmd.to_string(),
                kind: None,
                priority: 0,
                estimated_time: None,
                timeout_ms: None,
                optional: false,
                after: vec![],
                tags: vec![],
            },
        }
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.task.after.push(dep.to_string());
        self
    }

    pub fn priority(mut self, priority: i64) -> Self {
        self.task.priority = priority;
        self
    }

    pub fn kind(mut self, kind: &str) -> Self {
        self.task.kind = Some(kind.to_string());
        self
    }

    pub fn optional(mut self) -> Self {
        self.task.optional = true;
        self
    }

    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.task.timeout_ms = Some(ms);
        self
    }

    pub fn build(self) -> TaskConfig {
        self.task
    }
}
