//! taskflow core data models.
//!
//! This crate defines the data structures shared by the orchestration core:
//! tasks and their stage history, workspaces, conflict records and the
//! per-invocation context bundle.

#![warn(missing_docs)]

// Core identities
mod id;

// Lifecycle
mod stage;
mod stage_result;
mod task;

// Isolation and coordination
mod workspace;
mod conflict;
mod context;

// Re-exports
pub use id::*;

pub use stage::{ParseStageError, Stage, StageContract, StageRegistry};
pub use stage_result::{Artifact, FailureKind, Outcome, ResultMarker, StageFailure, StageResult};
pub use task::{ResultSummary, Task, TaskDraft, TaskFilter, TaskSnapshot, TaskStatus};
pub use workspace::{Workspace, WorkspaceState};
pub use conflict::{ConflictRecord, ConflictReport, ConflictSeverity};
pub use context::{CodeSnippet, ContextBundle, SimilarTask};

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;
