//! Task model - the core unit of work in taskflow.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use crate::conflict::ConflictRecord;
use crate::id::TaskId;
use crate::stage::Stage;
use crate::stage_result::{Outcome, StageFailure, StageResult};
use crate::workspace::{Workspace, WorkspaceState};
use crate::Time;

/// A task represents a unit of work moving through the stage pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier
    pub id: TaskId,

    /// Task title
    pub title: String,

    /// Detailed description
    pub description: String,

    /// Current stage
    pub stage: Stage,

    /// Status within the current stage
    pub status: TaskStatus,

    /// Stage the task entered the pipeline at
    pub initial_stage: Stage,

    /// Declared file/module footprint (path globs)
    pub footprint: Vec<String>,

    /// Base reference for the workspace, if not the configured default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_ref: Option<String>,

    /// Opaque parameters for stage handlers
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_json::Value>,

    /// Workspace handle, once allocated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<Workspace>,

    /// Append-only stage history
    pub history: Vec<StageResult>,

    /// Creation timestamp
    pub created_at: Time,

    /// Last update timestamp
    pub updated_at: Time,
}

impl Task {
    /// Create a task from a draft.
    pub fn new(draft: TaskDraft) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: TaskId::new(),
            title: draft.title,
            description: draft.description,
            stage: draft.initial_stage,
            status: TaskStatus::Pending,
            initial_stage: draft.initial_stage,
            footprint: draft.footprint,
            base_ref: draft.base_ref,
            parameters: draft.parameters,
            workspace: None,
            history: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the task is `Done` or `Abandoned`.
    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }

    /// Non-superseded history, in order.
    pub fn live_history(&self) -> impl DoubleEndedIterator<Item = &StageResult> {
        self.history.iter().filter(|r| !r.superseded)
    }

    /// Most recent non-superseded result for a stage.
    pub fn latest_result_for(&self, stage: Stage) -> Option<&StageResult> {
        self.live_history().filter(|r| r.stage == stage).last()
    }

    /// Most recent result of any stage.
    pub fn last_result(&self) -> Option<&StageResult> {
        self.history.last()
    }

    /// Whether the task has left its first stage.
    ///
    /// Footprint and workspace are frozen from that point on unless
    /// explicitly reset.
    pub fn has_left_first_stage(&self) -> bool {
        self.stage != self.initial_stage
            || self
                .live_history()
                .any(|r| r.stage == self.initial_stage && r.outcome == Outcome::Success)
    }

    /// Union of artifact paths recorded in the live history.
    pub fn artifact_paths(&self) -> Vec<String> {
        self.live_history()
            .flat_map(|r| r.artifacts.iter().map(|a| a.path.clone()))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Number of failures since the last success at the current stage.
    pub fn consecutive_failures(&self) -> usize {
        self.live_history()
            .rev()
            .take_while(|r| r.stage == self.stage && r.outcome == Outcome::Failure)
            .count()
    }

    /// Build a snapshot for callers.
    pub fn snapshot(&self, conflict_warnings: Vec<ConflictRecord>) -> TaskSnapshot {
        TaskSnapshot {
            id: self.id,
            title: self.title.clone(),
            stage: self.stage,
            status: self.status,
            last_result: self.last_result().map(ResultSummary::from),
            conflict_warnings,
            workspace_state: self.workspace.as_ref().map(|w| w.state),
            history_len: self.history.len(),
        }
    }

    /// Bump `updated_at`.
    pub fn touch(&mut self) {
        self.updated_at = chrono::Utc::now();
    }
}

/// Status within the current stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for the stage to run
    Pending,
    /// A stage handler is running
    InProgress,
    /// Last attempt failed; needs a successful retry or abandonment
    Blocked,
    /// Reached `Done`
    Completed,
    /// Abandoned
    Failed,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => f.write_str("pending"),
            TaskStatus::InProgress => f.write_str("in_progress"),
            TaskStatus::Blocked => f.write_str("blocked"),
            TaskStatus::Completed => f.write_str("completed"),
            TaskStatus::Failed => f.write_str("failed"),
        }
    }
}

/// Specification for creating a task.
#[derive(Debug, Clone)]
pub struct TaskDraft {
    /// Title
    pub title: String,
    /// Description
    pub description: String,
    /// Declared footprint
    pub footprint: Vec<String>,
    /// Workspace base reference override
    pub base_ref: Option<String>,
    /// Opaque handler parameters
    pub parameters: BTreeMap<String, serde_json::Value>,
    /// `Requirements` (default) or `Backlog`
    pub initial_stage: Stage,
}

impl TaskDraft {
    /// Draft entering at `Requirements`.
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            footprint: Vec::new(),
            base_ref: None,
            parameters: BTreeMap::new(),
            initial_stage: Stage::Requirements,
        }
    }

    /// Set the declared footprint.
    pub fn with_footprint<I, P>(mut self, footprint: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        self.footprint = footprint.into_iter().map(Into::into).collect();
        self
    }

    /// Set the workspace base reference.
    pub fn with_base_ref(mut self, base_ref: impl Into<String>) -> Self {
        self.base_ref = Some(base_ref.into());
        self
    }

    /// Add an opaque parameter.
    pub fn with_parameter(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    /// Enter the pipeline at `Backlog`.
    pub fn in_backlog(mut self) -> Self {
        self.initial_stage = Stage::Backlog;
        self
    }
}

/// Filter for querying tasks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskFilter {
    /// Filter by stage
    pub stages: Option<Vec<Stage>>,

    /// Filter by status
    pub statuses: Option<Vec<TaskStatus>>,

    /// Exclude `Done` and `Abandoned` tasks
    pub active_only: bool,
}

impl TaskFilter {
    /// Non-terminal tasks only.
    pub fn active() -> Self {
        Self {
            active_only: true,
            ..Default::default()
        }
    }

    /// Whether a task matches.
    pub fn matches(&self, task: &Task) -> bool {
        if self.active_only && task.is_terminal() {
            return false;
        }
        if let Some(stages) = &self.stages {
            if !stages.contains(&task.stage) {
                return false;
            }
        }
        if let Some(statuses) = &self.statuses {
            if !statuses.contains(&task.status) {
                return false;
            }
        }
        true
    }
}

/// What callers of the orchestrator see.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    /// Task id
    pub id: TaskId,
    /// Title
    pub title: String,
    /// Current stage
    pub stage: Stage,
    /// Current status
    pub status: TaskStatus,
    /// Most recent result
    pub last_result: Option<ResultSummary>,
    /// Advisory conflicts
    pub conflict_warnings: Vec<ConflictRecord>,
    /// Workspace lifecycle state
    pub workspace_state: Option<WorkspaceState>,
    /// Number of history records
    pub history_len: usize,
}

/// Summary of a stage result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultSummary {
    /// Stage
    pub stage: Stage,
    /// Outcome
    pub outcome: Outcome,
    /// Summary text
    pub summary: String,
    /// Failure details
    pub failure: Option<StageFailure>,
    /// Degraded context flag
    pub degraded_context: bool,
    /// Finish time
    pub finished_at: Time,
}

impl From<&StageResult> for ResultSummary {
    fn from(result: &StageResult) -> Self {
        Self {
            stage: result.stage,
            outcome: result.outcome,
            summary: result.summary.clone(),
            failure: result.failure.clone(),
            degraded_context: result.degraded_context,
            finished_at: result.finished_at,
        }
    }
}
