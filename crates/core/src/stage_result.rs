//! Stage result model - the immutable record of one stage execution.

use serde::{Deserialize, Serialize};
use crate::id::ResultId;
use crate::stage::Stage;
use crate::Time;

/// Record of one stage execution.
///
/// Created only by the orchestrator (or the state machine for reopen/abandon
/// markers) and appended to a task's history. The only change ever made to a
/// stored record is setting `superseded` when an earlier stage is reopened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    /// Unique identifier
    pub id: ResultId,

    /// Stage this result belongs to
    pub stage: Stage,

    /// Attempt number within the current retry round (1-based)
    pub attempt: u32,

    /// When execution started
    pub started_at: Time,

    /// When execution finished
    pub finished_at: Time,

    /// Outcome
    pub outcome: Outcome,

    /// Free-form summary
    pub summary: String,

    /// Artifacts produced (paths, not content)
    pub artifacts: Vec<Artifact>,

    /// Typed failure details, set when `outcome` is `Failure`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<StageFailure>,

    /// The context bundle was assembled without (part of) retrieval
    #[serde(default)]
    pub degraded_context: bool,

    /// Lifecycle marker for records not produced by a handler
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marker: Option<ResultMarker>,

    /// Set when a later reopen invalidated this record
    #[serde(default)]
    pub superseded: bool,
}

impl StageResult {
    /// Create a result for a stage.
    pub fn new(
        stage: Stage,
        outcome: Outcome,
        started_at: Time,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            id: ResultId::new(),
            stage,
            attempt: 1,
            started_at,
            finished_at: chrono::Utc::now(),
            outcome,
            summary: summary.into(),
            artifacts: Vec::new(),
            failure: None,
            degraded_context: false,
            marker: None,
            superseded: false,
        }
    }

    /// Successful result finishing now.
    pub fn success(stage: Stage, started_at: Time, summary: impl Into<String>) -> Self {
        Self::new(stage, Outcome::Success, started_at, summary)
    }

    /// Failed result finishing now.
    pub fn failure(stage: Stage, started_at: Time, failure: StageFailure) -> Self {
        let summary = failure.to_string();
        let mut result = Self::new(stage, Outcome::Failure, started_at, summary);
        result.failure = Some(failure);
        result
    }

    /// Set artifacts.
    pub fn with_artifacts(mut self, artifacts: Vec<Artifact>) -> Self {
        self.artifacts = artifacts;
        self
    }

    /// Set the attempt number.
    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    /// Mark the context as degraded.
    pub fn with_degraded_context(mut self, degraded: bool) -> Self {
        self.degraded_context = degraded;
        self
    }

    /// Set a lifecycle marker.
    pub fn with_marker(mut self, marker: ResultMarker) -> Self {
        self.marker = Some(marker);
        self
    }

    /// Whether this is a successful, non-superseded record.
    pub fn is_live_success(&self) -> bool {
        !self.superseded && self.outcome == Outcome::Success
    }

    /// Artifact kinds, for contract checks.
    pub fn artifact_kinds(&self) -> Vec<&str> {
        self.artifacts.iter().map(|a| a.kind.as_str()).collect()
    }
}

/// Overall outcome of a stage execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Stage completed
    Success,
    /// Stage failed; the task stays at this stage
    Failure,
    /// Stage did not run (abandon / reopen markers)
    Skipped,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Success => f.write_str("success"),
            Outcome::Failure => f.write_str("failure"),
            Outcome::Skipped => f.write_str("skipped"),
        }
    }
}

/// An artifact reference produced by a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Artifact kind (matched against stage contracts)
    pub kind: String,

    /// Path relative to the workspace root
    pub path: String,
}

impl Artifact {
    /// Create an artifact reference.
    pub fn new(kind: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            path: path.into(),
        }
    }
}

/// Why a stage execution failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct StageFailure {
    /// Failure kind
    pub kind: FailureKind,

    /// Captured error summary
    pub message: String,
}

impl StageFailure {
    /// Create a failure.
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Kinds of stage failure.
///
/// Everything except `HandlerReportedFailure` is a `StageExecutionFailed`
/// condition: the handler could not produce a result at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Handler exceeded its deadline
    Timeout,
    /// Handler returned an error
    HandlerError,
    /// Handler panicked or its task was aborted
    HandlerPanicked,
    /// Handler reported success without a declared output
    ContractViolation,
    /// Handler ran and reported a failure outcome itself
    HandlerReportedFailure,
}

impl FailureKind {
    /// Whether this is a `StageExecutionFailed` condition.
    pub fn is_execution_failure(self) -> bool {
        matches!(
            self,
            FailureKind::Timeout | FailureKind::HandlerError | FailureKind::HandlerPanicked
        )
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureKind::Timeout => "stage execution failed (timeout)",
            FailureKind::HandlerError => "stage execution failed (handler error)",
            FailureKind::HandlerPanicked => "stage execution failed (handler panicked)",
            FailureKind::ContractViolation => "contract violation",
            FailureKind::HandlerReportedFailure => "handler reported failure",
        };
        f.write_str(s)
    }
}

/// Marker for records appended by lifecycle operations rather than handlers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum ResultMarker {
    /// The task was reopened at this stage
    Reopened {
        /// Stage the task was at before the reopen
        from: Stage,
    },
    /// The task was abandoned while at this stage
    Abandoned {
        /// Reason given by the caller
        reason: String,
    },
}
