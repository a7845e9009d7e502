//! Workspace errors.

use taskflow_core::TaskId;
use taskflow_storage::StorageError;

/// Result type for workspace operations.
pub type Result<T> = std::result::Result<T, WorkspaceError>;

/// Errors that can occur while managing workspaces.
#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    /// A workspace already exists for the task
    #[error("workspace already exists for task {0}")]
    WorkspaceConflict(TaskId),

    /// The base reference does not resolve in the shared repository
    #[error("base ref not found: {0}")]
    BaseRefNotFound(String),

    /// No workspace recorded for the task
    #[error("no workspace for task {0}")]
    NotFound(TaskId),

    /// The workspace was released and cannot be used again
    #[error("workspace for task {0} has been released")]
    Released(TaskId),

    /// Git error
    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
