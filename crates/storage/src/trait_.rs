//! Storage trait abstraction.

use async_trait::async_trait;
use taskflow_core::{Task, TaskFilter, TaskId, Workspace};

/// Error type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Storage abstraction for taskflow data.
///
/// Only tasks (including their stage history) and workspace records are
/// durable. Conflict records and context bundles are always recomputed.
#[async_trait]
pub trait Storage: Send + Sync {
    // === Task operations ===

    /// Save a task (create or update).
    async fn save_task(&mut self, task: &Task) -> Result<()>;

    /// Load a task by ID.
    async fn load_task(&self, id: TaskId) -> Result<Option<Task>>;

    /// List tasks matching the filter, oldest first.
    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>>;

    // === Workspace operations ===

    /// Save a workspace record (create or update).
    async fn save_workspace(&mut self, workspace: &Workspace) -> Result<()>;

    /// Load the workspace record of a task.
    async fn load_workspace(&self, task_id: TaskId) -> Result<Option<Workspace>>;

    /// List all workspace records.
    async fn list_workspaces(&self) -> Result<Vec<Workspace>>;
}
