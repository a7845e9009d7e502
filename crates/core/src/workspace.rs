//! Workspace model - the isolated, branch-bound filesystem context of a task.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use crate::id::TaskId;
use crate::Time;

/// Isolated filesystem context for one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    /// Owning task
    pub task_id: TaskId,

    /// Reference in the shared repository the branch was created from
    pub base_ref: String,

    /// Commit the base reference resolved to at allocation time
    pub base_commit: String,

    /// Dedicated branch, derived from the task id
    pub branch: String,

    /// Filesystem root of the workspace
    pub root: PathBuf,

    /// Lifecycle state
    pub state: WorkspaceState,

    /// When allocated
    pub allocated_at: Time,

    /// When released
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub released_at: Option<Time>,
}

impl Workspace {
    /// Deterministic branch name for a task.
    pub fn branch_name(prefix: &str, task_id: TaskId) -> String {
        format!("{}{}", prefix, task_id.slug())
    }

    /// Whether the workspace has been released.
    pub fn is_released(&self) -> bool {
        self.state == WorkspaceState::Released
    }
}

/// Workspace lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkspaceState {
    /// Created, no handler has run in it yet
    Allocated,
    /// At least one handler has run in it
    Active,
    /// Checkout removed; branch kept
    Released,
}

impl std::fmt::Display for WorkspaceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkspaceState::Allocated => f.write_str("allocated"),
            WorkspaceState::Active => f.write_str("active"),
            WorkspaceState::Released => f.write_str("released"),
        }
    }
}
