//! Workspace manager trait.

use async_trait::async_trait;
use taskflow_core::{TaskId, Workspace};
use crate::Result;

/// Allocates and releases isolated per-task workspaces.
///
/// Each task gets at most one workspace over its lifetime. Release keeps the
/// task's branch so committed work is never lost.
#[async_trait]
pub trait WorkspaceManager: Send + Sync {
    /// Create the workspace for a task, branched from `base_ref`.
    ///
    /// Fails with `WorkspaceConflict` if the task already has a workspace
    /// record and with `BaseRefNotFound` if `base_ref` does not resolve.
    async fn allocate(&self, task_id: TaskId, base_ref: &str) -> Result<Workspace>;

    /// Mark the workspace as used by a handler (`allocated -> active`).
    async fn activate(&self, task_id: TaskId) -> Result<Workspace>;

    /// Release the workspace. Idempotent.
    async fn release(&self, task_id: TaskId) -> Result<Workspace>;

    /// Current workspace record.
    async fn handle(&self, task_id: TaskId) -> Result<Workspace>;

    /// Whether the checkout holds changes not yet committed to its branch.
    async fn has_uncommitted_changes(&self, task_id: TaskId) -> Result<bool>;
}
