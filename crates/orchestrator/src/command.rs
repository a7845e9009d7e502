//! Process-backed stage handler.

use std::collections::HashMap;
use std::process::Stdio;
use anyhow::Context;
use async_trait::async_trait;
use serde::Serialize;
use taskflow_core::{ContextBundle, Stage, Task, Workspace};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};
use crate::{StageHandler, StageInvocation, StageOutput};

/// Runs an external program as the stage handler.
///
/// The program runs with the workspace root as its working directory. It
/// gets the invocation as JSON on stdin and may print a JSON [`StageOutput`]
/// on stdout. A non-zero exit is a `failure` result; a zero exit with empty
/// stdout is a `success`. The child is killed when the deadline fires.
#[derive(Debug, Clone)]
pub struct CommandStageHandler {
    program: String,
    args: Vec<String>,
    env: HashMap<String, String>,
}

#[derive(Serialize)]
struct Payload<'a> {
    task: &'a Task,
    workspace: &'a Workspace,
    bundle: &'a ContextBundle,
    attempt: u32,
    deadline_ms: u64,
}

impl CommandStageHandler {
    /// Handler running `program`.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: HashMap::new(),
        }
    }

    /// Set the arguments.
    pub fn with_args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Add an environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    fn command(&self, task_id: &str, stage: Stage, workspace: &Workspace) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .current_dir(&workspace.root)
            .env("TASKFLOW_TASK_ID", task_id)
            .env("TASKFLOW_STAGE", stage.as_str())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (k, v) in &self.env {
            cmd.env(k, v);
        }
        cmd
    }
}

#[async_trait]
impl StageHandler for CommandStageHandler {
    async fn handle(&self, invocation: StageInvocation) -> anyhow::Result<StageOutput> {
        let stage = invocation.stage();
        let payload = serde_json::to_vec(&Payload {
            task: &invocation.task,
            workspace: &invocation.workspace,
            bundle: &invocation.bundle,
            attempt: invocation.attempt,
            deadline_ms: invocation.deadline.remaining().as_millis() as u64,
        })?;

        let mut child = self
            .command(&invocation.task.id.to_string(), stage, &invocation.workspace)
            .spawn()
            .with_context(|| format!("failed to spawn {}", self.program))?;
        debug!(program = %self.program, stage = %stage, pid = ?child.id(), "spawned stage command");

        // Feed stdin alongside the wait so a child that writes before it
        // reads cannot fill its pipes against us.
        let writer = child.stdin.take().map(|mut stdin| {
            tokio::spawn(async move {
                stdin.write_all(&payload).await?;
                stdin.shutdown().await
            })
        });

        let output = tokio::select! {
            output = child.wait_with_output() => output.context("failed to wait for stage command")?,
            _ = invocation.deadline.cancelled() => {
                // Dropping the wait future drops the child, which kills it.
                if let Some(writer) = &writer {
                    writer.abort();
                }
                warn!(program = %self.program, stage = %stage, "stage command cancelled");
                anyhow::bail!("{} cancelled at deadline", self.program);
            }
        };

        if let Some(writer) = writer {
            match writer.await {
                // A program that ignores its input may exit before reading it.
                Ok(Err(e)) if e.kind() != std::io::ErrorKind::BrokenPipe => {
                    return Err(e).context("failed to write invocation to stdin");
                }
                Err(e) if e.is_panic() => anyhow::bail!("stdin writer panicked"),
                _ => {}
            }
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            let code = output.status.code().unwrap_or(-1);
            let detail = stderr.trim();
            let summary = if detail.is_empty() {
                format!("{} exited with {}", self.program, code)
            } else {
                format!("{} exited with {}: {}", self.program, code, detail)
            };
            return Ok(StageOutput::failure(summary));
        }

        if stdout.trim().is_empty() {
            return Ok(StageOutput::success(format!("{} completed", self.program)));
        }
        serde_json::from_str(stdout.trim())
            .with_context(|| format!("{} printed an invalid stage output", self.program))
    }
}
