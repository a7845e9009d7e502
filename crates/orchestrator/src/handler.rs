//! Stage handler seam.
//!
//! A stage handler is the pluggable logic that does the work of one stage.
//! The orchestrator hands it a [`StageInvocation`] and records whatever it
//! returns; errors, panics and timeouts are all turned into failed results.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use taskflow_core::{Artifact, ContextBundle, Outcome, Stage, Task, Workspace};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Point in time by which a handler must finish, plus the signal that is
/// fired when it passes.
#[derive(Debug, Clone)]
pub struct Deadline {
    at: Instant,
    token: CancellationToken,
}

impl Deadline {
    /// Deadline `timeout` from now.
    pub fn new(timeout: Duration) -> Self {
        Self {
            at: Instant::now() + timeout,
            token: CancellationToken::new(),
        }
    }

    /// Time left, zero once expired.
    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    /// Whether the deadline has passed.
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.at
    }

    /// Cancellation token fired by the orchestrator on expiry.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Resolves once the invocation has been cancelled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Whether the invocation has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Everything a handler gets for one run of one stage.
#[derive(Debug, Clone)]
pub struct StageInvocation {
    /// Task as of the start of the attempt
    pub task: Task,

    /// The task's isolated workspace
    pub workspace: Workspace,

    /// Retrieval context, conflict warnings and the stage contract
    pub bundle: ContextBundle,

    /// When the handler must be done
    pub deadline: Deadline,

    /// 1-based attempt number within this `advance_stage` call
    pub attempt: u32,
}

impl StageInvocation {
    /// Stage being run.
    pub fn stage(&self) -> Stage {
        self.task.stage
    }
}

/// What a handler reports back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageOutput {
    /// `success` or `failure`; `skipped` is rejected
    pub outcome: Outcome,

    /// Free-form summary
    pub summary: String,

    /// Artifacts produced
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
}

impl StageOutput {
    /// Successful output.
    pub fn success(summary: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::Success,
            summary: summary.into(),
            artifacts: Vec::new(),
        }
    }

    /// Failed output. The handler ran but could not do the stage's work.
    pub fn failure(summary: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::Failure,
            summary: summary.into(),
            artifacts: Vec::new(),
        }
    }

    /// Add an artifact.
    pub fn with_artifact(mut self, kind: impl Into<String>, path: impl Into<String>) -> Self {
        self.artifacts.push(Artifact::new(kind, path));
        self
    }
}

/// Pluggable stage logic.
#[async_trait]
pub trait StageHandler: Send + Sync {
    /// Run the stage.
    ///
    /// Should watch `invocation.deadline` and stop early once cancelled; the
    /// orchestrator stops waiting at the deadline either way.
    async fn handle(&self, invocation: StageInvocation) -> anyhow::Result<StageOutput>;
}

struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> StageHandler for FnHandler<F>
where
    F: Fn(StageInvocation) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<StageOutput>> + Send + 'static,
{
    async fn handle(&self, invocation: StageInvocation) -> anyhow::Result<StageOutput> {
        (self.f)(invocation).await
    }
}

/// Wrap an async closure as a handler.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn StageHandler>
where
    F: Fn(StageInvocation) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<StageOutput>> + Send + 'static,
{
    Arc::new(FnHandler { f })
}

/// Handlers keyed by stage, with an optional catch-all.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<Stage, Arc<dyn StageHandler>>,
    fallback: Option<Arc<dyn StageHandler>>,
}

impl HandlerRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for a stage, replacing any previous one.
    pub fn with_handler(mut self, stage: Stage, handler: Arc<dyn StageHandler>) -> Self {
        self.handlers.insert(stage, handler);
        self
    }

    /// Handler used for stages without their own.
    pub fn with_fallback(mut self, handler: Arc<dyn StageHandler>) -> Self {
        self.fallback = Some(handler);
        self
    }

    /// Handler for a stage. Terminal stages never have one.
    pub fn get(&self, stage: Stage) -> Option<Arc<dyn StageHandler>> {
        if !stage.has_handler() {
            return None;
        }
        self.handlers
            .get(&stage)
            .or(self.fallback.as_ref())
            .cloned()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut stages: Vec<_> = self.handlers.keys().copied().collect();
        stages.sort();
        f.debug_struct("HandlerRegistry")
            .field("stages", &stages)
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}
