//! Orchestrator errors.
//!
//! These are the errors returned synchronously to callers. Stage handler
//! failures never appear here; they are recorded as failed stage results.

use taskflow_conflict::ConflictError;
use taskflow_core::{ConflictRecord, Stage, TaskId};
use taskflow_state::StateError;
use taskflow_storage::StorageError;
use taskflow_workspace::WorkspaceError;

/// Result type for orchestrator operations.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Errors returned by the orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// The task does not exist
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    /// The task is `Done` or `Abandoned`
    #[error("task {0} is terminal")]
    TerminalTask(TaskId),

    /// The transition is not legal from the current state
    #[error("illegal transition for task {task_id} at {stage}: {reason}")]
    IllegalTransition {
        /// Task
        task_id: TaskId,
        /// Stage the task is at
        stage: Stage,
        /// What was wrong
        reason: String,
    },

    /// Reopen target is ahead of the current stage
    #[error("cannot reopen task {task_id} at {target}: task is at {current}")]
    IllegalReopen {
        /// Task
        task_id: TaskId,
        /// Stage the task is at
        current: Stage,
        /// Requested stage
        target: Stage,
    },

    /// A high-severity conflict prevents the stage from running
    #[error("task {task_id} blocked by {} high-severity conflict(s)", .records.len())]
    ConflictBlocked {
        /// Task
        task_id: TaskId,
        /// The blocking records
        records: Vec<ConflictRecord>,
    },

    /// A workspace already exists for the task
    #[error("workspace already exists for task {0}")]
    WorkspaceConflict(TaskId),

    /// The base reference does not resolve
    #[error("base ref not found: {0}")]
    BaseRefNotFound(String),

    /// The footprint is frozen
    #[error("footprint of task {0} is locked")]
    FootprintLocked(TaskId),

    /// No handler is registered for the stage
    #[error("no stage handler registered for {0}")]
    NoHandler(Stage),

    /// Other workspace failure
    #[error("Workspace error: {0}")]
    Workspace(WorkspaceError),

    /// State machine failure not covered above
    #[error("State error: {0}")]
    State(StateError),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<StateError> for OrchestratorError {
    fn from(e: StateError) -> Self {
        match e {
            StateError::TaskNotFound(id) => OrchestratorError::TaskNotFound(id),
            StateError::TerminalTask(id) => OrchestratorError::TerminalTask(id),
            StateError::IllegalTransition { task_id, stage, reason } => {
                OrchestratorError::IllegalTransition { task_id, stage, reason }
            }
            StateError::IllegalReopen { task_id, current, target } => {
                OrchestratorError::IllegalReopen { task_id, current, target }
            }
            StateError::FootprintLocked(id) => OrchestratorError::FootprintLocked(id),
            StateError::Storage(e) => OrchestratorError::Storage(e),
            other => OrchestratorError::State(other),
        }
    }
}

impl From<WorkspaceError> for OrchestratorError {
    fn from(e: WorkspaceError) -> Self {
        match e {
            WorkspaceError::WorkspaceConflict(id) => OrchestratorError::WorkspaceConflict(id),
            WorkspaceError::BaseRefNotFound(r) => OrchestratorError::BaseRefNotFound(r),
            WorkspaceError::Storage(e) => OrchestratorError::Storage(e),
            other => OrchestratorError::Workspace(other),
        }
    }
}

impl From<ConflictError> for OrchestratorError {
    fn from(e: ConflictError) -> Self {
        match e {
            ConflictError::TaskNotFound(id) => OrchestratorError::TaskNotFound(id),
            ConflictError::Storage(e) => OrchestratorError::Storage(e),
        }
    }
}
