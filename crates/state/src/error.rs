//! State machine errors.

use taskflow_core::{Stage, TaskId};
use taskflow_storage::StorageError;

/// Result type for state machine operations.
pub type Result<T> = std::result::Result<T, StateError>;

/// Errors returned synchronously by the state machine. None are retried.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// The task does not exist
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    /// The task is `Done` or `Abandoned`
    #[error("task {0} is terminal")]
    TerminalTask(TaskId),

    /// The requested transition is not legal from the current state
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

    /// The footprint is frozen because the task left its first stage
    #[error("footprint of task {0} is locked")]
    FootprintLocked(TaskId),

    /// A different workspace is already bound to the task
    #[error("task {0} already has a different workspace")]
    WorkspaceLocked(TaskId),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}
