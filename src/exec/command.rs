// src/exec/command.rs

use std::process::Stdio;

use anyhow::{anyhow, Context, Result};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, error, info};

use crate::dag::{SubtaskSpec, Task};
use crate::engine::Outcome;
use crate::exec::backend::{BoxFuture, ExecutionContext, Executor};

/// Task kind whose stdout is a JSON array of subtask descriptors.
pub const PLAN_KIND: &str = "plan";

/// Runs `payload.cmd` through the platform shell.
///
/// - exit status 0 → `Success { stdout, exit_code }`
/// - any other exit status → `Failure`
/// - kind `plan` → stdout parsed as `[SubtaskSpec]` → `Decomposition`
///
/// A process cannot be paused, so yield requests are ignored and the call
/// runs to completion. Cancellation kills the process.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandExecutor;

impl CommandExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl Executor for CommandExecutor {
    fn execute(&self, task: Task, ctx: ExecutionContext) -> BoxFuture<'_, Outcome> {
        Box::pin(async move {
            match run_command(&task, &ctx).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    error!(task = %task.id, name = %task.name, error = %err, "task execution error");
                    Outcome::Failure(format!("{err:#}"))
                }
            }
        })
    }
}

async fn run_command(task: &Task, ctx: &ExecutionContext) -> Result<Outcome> {
    let cmd_line = task
        .payload
        .get("cmd")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("task '{}' has no `cmd` string in its payload", task.name))?;

    info!(
        task = %task.id,
        name = %task.name,
        cmd = %cmd_line,
        attempt = ctx.attempt,
        "starting task process"
    );

    // Build a shell command appropriate for the platform.
    let mut cmd = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(cmd_line);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(cmd_line);
        c
    };

    cmd.stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning process for task '{}'", task.name))?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let stdout_reader = tokio::spawn(async move {
        let mut buf = String::new();
        if let Some(mut out) = stdout {
            out.read_to_string(&mut buf).await?;
        }
        Ok::<_, std::io::Error>(buf)
    });

    // Always consume stderr so buffers don't fill; log at debug and keep the
    // last line for the failure message.
    let stderr_name = task.name.clone();
    let stderr_reader = tokio::spawn(async move {
        let mut last = None;
        if let Some(err) = stderr {
            let mut lines = BufReader::new(err).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(task = %stderr_name, "stderr: {}", line);
                last = Some(line);
            }
        }
        last
    });

    let status = tokio::select! {
        status = child.wait() => status
            .with_context(|| format!("waiting for process of task '{}'", task.name))?,
        _ = ctx.cancelled() => {
            info!(task = %task.id, name = %task.name, "cancellation requested; killing process");
            return Ok(Outcome::Failure("process killed on cancellation".to_string()));
        }
    };

    let stdout = stdout_reader
        .await
        .context("joining stdout reader")?
        .context("reading task stdout")?;
    let last_stderr = stderr_reader.await.unwrap_or(None);

    let code = status.code().unwrap_or(-1);
    info!(
        task = %task.id,
        name = %task.name,
        exit_code = code,
        success = status.success(),
        "task process exited"
    );

    if !status.success() {
        let detail = last_stderr.unwrap_or_else(|| "no stderr output".to_string());
        return Ok(Outcome::Failure(format!(
            "command exited with code {code}: {detail}"
        )));
    }

    if task.kind == PLAN_KIND {
        let specs: Vec<SubtaskSpec> = serde_json::from_str(stdout.trim()).with_context(|| {
            format!("parsing subtask descriptors from stdout of task '{}'", task.name)
        })?;
        return Ok(Outcome::Decomposition(specs));
    }

    Ok(Outcome::Success(json!({
        "stdout": stdout,
        "exit_code": code,
    })))
}
