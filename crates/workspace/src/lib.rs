//! Per-task workspace isolation for taskflow.
//!
//! Every task gets a private checkout bound to its own branch of a shared
//! repository. The git implementation uses worktrees so that checkouts share
//! one object database while keeping uncommitted changes apart.

#![warn(missing_docs)]

mod config;
mod error;
mod git;
mod manager;

pub use config::WorkspaceConfig;
pub use error::{Result, WorkspaceError};
pub use git::GitWorktreeManager;
pub use manager::WorkspaceManager;
