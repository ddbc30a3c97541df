// src/config/validate.rs

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::dag::graph::ensure_acyclic;
use crate::errors::{Result, SchedulerError};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = SchedulerError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw.scheduler, raw.task))
    }
}

/// Semantic checks that deserialization alone cannot express.
pub fn validate_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_tasks(cfg)?;
    validate_scheduler_section(cfg)?;
    validate_task_dependencies(cfg)?;
    validate_dag(cfg)?;
    Ok(())
}

fn ensure_has_tasks(cfg: &RawConfigFile) -> Result<()> {
    if cfg.task.is_empty() {
        return Err(SchedulerError::ConfigError(
            "config must contain at least one [task.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_scheduler_section(cfg: &RawConfigFile) -> Result<()> {
    // strategy and aggregation are strongly typed and rejected during
    // deserialization.
    let s = &cfg.scheduler;

    if s.concurrency == 0 {
        return Err(SchedulerError::ConfigError(
            "[scheduler].concurrency must be >= 1 (got 0)".to_string(),
        ));
    }
    if s.time_slice_ms == 0 {
        return Err(SchedulerError::ConfigError(
            "[scheduler].time_slice_ms must be >= 1 (got 0)".to_string(),
        ));
    }
    if s.event_buffer == 0 {
        return Err(SchedulerError::ConfigError(
            "[scheduler].event_buffer must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

fn validate_task_dependencies(cfg: &RawConfigFile) -> Result<()> {
    for (name, task) in cfg.task.iter() {
        if task.cmd.trim().is_empty() {
            return Err(SchedulerError::ConfigError(format!(
                "task '{name}' has an empty `cmd`"
            )));
        }
        for dep in task.after.iter() {
            if dep == name {
                return Err(SchedulerError::ConfigError(format!(
                    "task '{name}' cannot depend on itself in `after`"
                )));
            }
            if !cfg.task.contains_key(dep) {
                return Err(SchedulerError::ConfigError(format!(
                    "task '{name}' has unknown dependency '{dep}' in `after`"
                )));
            }
        }
    }
    Ok(())
}

fn validate_dag(cfg: &RawConfigFile) -> Result<()> {
    let keys = cfg.task.keys().map(String::as_str);
    let edges = cfg.task.iter().flat_map(|(name, task)| {
        task.after
            .iter()
            .map(move |dep| (dep.as_str(), name.as_str()))
    });

    ensure_acyclic(keys, edges).map(|_order| ())
}
