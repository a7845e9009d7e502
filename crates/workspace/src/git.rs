//! Git worktree backed workspaces.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use async_trait::async_trait;
use git2::{BranchType, ErrorCode, Repository, StatusOptions, WorktreeAddOptions, WorktreePruneOptions};
use taskflow_core::{TaskId, Workspace, WorkspaceState};
use taskflow_storage::Storage;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use crate::{Result, WorkspaceConfig, WorkspaceError, WorkspaceManager};

/// Workspace manager that gives each task a git worktree on its own branch.
///
/// The shared repository is only written to for branch and worktree
/// bookkeeping; those writes are serialized by an internal lock.
pub struct GitWorktreeManager<S: Storage> {
    config: WorkspaceConfig,
    storage: Arc<Mutex<S>>,
    repo_lock: Mutex<()>,
}

impl<S: Storage> GitWorktreeManager<S> {
    /// Create a manager over the configured repository.
    pub fn new(config: WorkspaceConfig, storage: Arc<Mutex<S>>) -> Self {
        Self {
            config,
            storage,
            repo_lock: Mutex::new(()),
        }
    }

    /// Configuration in use.
    pub fn config(&self) -> &WorkspaceConfig {
        &self.config
    }

    fn worktrees_root(&self) -> Result<PathBuf> {
        let dir = &self.config.worktrees_dir;
        if dir.is_absolute() {
            Ok(dir.clone())
        } else {
            Ok(std::env::current_dir()?.join(dir))
        }
    }

    fn open_repo(&self) -> std::result::Result<Repository, git2::Error> {
        Repository::open(&self.config.repository)
    }

    async fn load(&self, task_id: TaskId) -> Result<Workspace> {
        self.storage
            .lock()
            .await
            .load_workspace(task_id)
            .await?
            .ok_or(WorkspaceError::NotFound(task_id))
    }

    async fn save(&self, workspace: &Workspace) -> Result<()> {
        self.storage.lock().await.save_workspace(workspace).await?;
        Ok(())
    }

    /// Resolve the base, ensure the branch, ensure the worktree.
    fn create_worktree_sync(&self, task_id: TaskId, base_ref: &str) -> Result<Workspace> {
        let repo = self.open_repo()?;
        let commit = repo
            .revparse_single(base_ref)
            .and_then(|obj| obj.peel_to_commit())
            .map_err(|_| WorkspaceError::BaseRefNotFound(base_ref.to_string()))?;

        let branch_name = Workspace::branch_name(&self.config.branch_prefix, task_id);
        let branch = match repo.find_branch(&branch_name, BranchType::Local) {
            Ok(branch) => {
                debug!(task_id = %task_id, branch = %branch_name, "reusing existing task branch");
                branch
            }
            Err(e) if e.code() == ErrorCode::NotFound => repo.branch(&branch_name, &commit, false)?,
            Err(e) => return Err(e.into()),
        };

        let name = task_id.slug();
        let root = self.worktrees_root()?.join(&name);

        let registered = match repo.find_worktree(&name) {
            Ok(existing) if existing.validate().is_ok() => true,
            Ok(stale) => {
                debug!(task_id = %task_id, "pruning stale worktree registration");
                let mut opts = WorktreePruneOptions::new();
                opts.valid(true).working_tree(true);
                stale.prune(Some(&mut opts))?;
                false
            }
            Err(_) => false,
        };

        if !registered {
            if let Some(parent) = root.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut opts = WorktreeAddOptions::new();
            opts.reference(Some(branch.get()));
            repo.worktree(&name, &root, Some(&opts))?;
        }

        Ok(Workspace {
            task_id,
            base_ref: base_ref.to_string(),
            base_commit: commit.id().to_string(),
            branch: branch_name,
            root,
            state: WorkspaceState::Allocated,
            allocated_at: chrono::Utc::now(),
            released_at: None,
        })
    }

    /// Unregister and delete the checkout. The branch is left alone.
    fn remove_worktree_sync(&self, workspace: &Workspace) -> Result<()> {
        let repo = self.open_repo()?;
        let name = workspace.task_id.slug();
        match repo.find_worktree(&name) {
            Ok(worktree) => {
                let mut opts = WorktreePruneOptions::new();
                opts.valid(true).locked(false).working_tree(true);
                worktree.prune(Some(&mut opts))?;
            }
            Err(e) => debug!(task_id = %workspace.task_id, error = %e, "no registered worktree"),
        }
        if workspace.root.exists() {
            std::fs::remove_dir_all(&workspace.root)?;
        }
        Ok(())
    }
}

fn is_dirty(root: &Path) -> Result<bool> {
    let repo = Repository::open(root)?;
    let mut opts = StatusOptions::new();
    opts.include_untracked(true)
        .recurse_untracked_dirs(true)
        .include_ignored(false);
    let statuses = repo.statuses(Some(&mut opts))?;
    Ok(!statuses.is_empty())
}

#[async_trait]
impl<S: Storage> WorkspaceManager for GitWorktreeManager<S> {
    async fn allocate(&self, task_id: TaskId, base_ref: &str) -> Result<Workspace> {
        let _guard = self.repo_lock.lock().await;

        if self.storage.lock().await.load_workspace(task_id).await?.is_some() {
            return Err(WorkspaceError::WorkspaceConflict(task_id));
        }

        let workspace = self.create_worktree_sync(task_id, base_ref)?;
        self.save(&workspace).await?;

        info!(
            task_id = %task_id,
            branch = %workspace.branch,
            root = %workspace.root.display(),
            base = %workspace.base_commit,
            "allocated workspace"
        );
        Ok(workspace)
    }

    async fn activate(&self, task_id: TaskId) -> Result<Workspace> {
        let mut workspace = self.load(task_id).await?;
        match workspace.state {
            WorkspaceState::Allocated => {
                workspace.state = WorkspaceState::Active;
                self.save(&workspace).await?;
                debug!(task_id = %task_id, "workspace active");
                Ok(workspace)
            }
            WorkspaceState::Active => Ok(workspace),
            WorkspaceState::Released => Err(WorkspaceError::Released(task_id)),
        }
    }

    async fn release(&self, task_id: TaskId) -> Result<Workspace> {
        let _guard = self.repo_lock.lock().await;

        let mut workspace = self.load(task_id).await?;
        if workspace.is_released() {
            debug!(task_id = %task_id, "workspace already released");
            return Ok(workspace);
        }

        if workspace.root.exists() {
            match is_dirty(&workspace.root) {
                Ok(true) => warn!(
                    task_id = %task_id,
                    branch = %workspace.branch,
                    root = %workspace.root.display(),
                    "WorkspaceLostWork: releasing workspace with uncommitted changes"
                ),
                Ok(false) => {}
                Err(e) => warn!(task_id = %task_id, error = %e, "could not inspect workspace before release"),
            }
        }

        self.remove_worktree_sync(&workspace)?;

        workspace.state = WorkspaceState::Released;
        workspace.released_at = Some(chrono::Utc::now());
        self.save(&workspace).await?;

        info!(task_id = %task_id, branch = %workspace.branch, "released workspace");
        Ok(workspace)
    }

    async fn handle(&self, task_id: TaskId) -> Result<Workspace> {
        self.load(task_id).await
    }

    async fn has_uncommitted_changes(&self, task_id: TaskId) -> Result<bool> {
        let workspace = self.load(task_id).await?;
        if workspace.is_released() || !workspace.root.exists() {
            return Ok(false);
        }
        is_dirty(&workspace.root)
    }
}
