//! Workspace configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Where workspaces come from and where they are checked out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Shared repository workspaces are branched from
    pub repository: PathBuf,

    /// Directory holding one checkout per task
    pub worktrees_dir: PathBuf,

    /// Base reference used when a task does not name one
    pub default_base_ref: String,

    /// Prefix of every task branch
    pub branch_prefix: String,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            repository: PathBuf::from("."),
            worktrees_dir: PathBuf::from(".taskflow/worktrees"),
            default_base_ref: "HEAD".to_string(),
            branch_prefix: "taskflow/".to_string(),
        }
    }
}

impl WorkspaceConfig {
    /// Config for a repository, other values default.
    pub fn new(repository: impl Into<PathBuf>) -> Self {
        Self {
            repository: repository.into(),
            ..Default::default()
        }
    }

    /// Set the checkout directory.
    pub fn with_worktrees_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.worktrees_dir = dir.into();
        self
    }

    /// Set the default base reference.
    pub fn with_default_base_ref(mut self, base_ref: impl Into<String>) -> Self {
        self.default_base_ref = base_ref.into();
        self
    }

    /// Set the branch prefix.
    pub fn with_branch_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.branch_prefix = prefix.into();
        self
    }
}
