//! JSON file storage implementation.
//!
//! Stores tasks and workspace records as JSON files under a root directory and
//! keeps small per-object meta markers (version + updated_at). Every write goes
//! to a temporary sibling file first and is then renamed into place, so a crash
//! mid-write never leaves a truncated record behind.

use std::path::{Path, PathBuf};
use taskflow_core::{Task, TaskFilter, TaskId, Workspace};
use super::{Storage, Result};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// File-based JSON storage backend.
pub struct JsonStorage {
    root: PathBuf,
}

impl JsonStorage {
    /// Create storage, creating the data and meta directories if needed.
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        fs::create_dir_all(root.join("tasks")).await?;
        fs::create_dir_all(root.join("workspaces")).await?;

        fs::create_dir_all(root.join("meta").join("tasks")).await?;
        fs::create_dir_all(root.join("meta").join("workspaces")).await?;

        Ok(Self { root })
    }

    /// Root directory of this store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn task_path(&self, id: TaskId) -> PathBuf {
        self.root.join("tasks").join(format!("{}.json", id))
    }

    fn workspace_path(&self, task_id: TaskId) -> PathBuf {
        self.root.join("workspaces").join(format!("{}.json", task_id))
    }

    fn meta_path(&self, kind: &str, id: &str) -> PathBuf {
        self.root.join("meta").join(kind).join(format!("{}.meta.json", id))
    }

    /// Current stored version of an object, 0 if never written.
    pub async fn version(&self, kind: &str, id: &str) -> Result<u64> {
        let path = self.meta_path(kind, id);
        let meta: Option<serde_json::Value> = read_json(&path).await?;
        Ok(meta
            .and_then(|m| m.get("version").and_then(|v| v.as_u64()))
            .unwrap_or(0))
    }

    /// Read and increment per-object version, return new version.
    async fn bump_version(&self, kind: &str, id: &str) -> Result<u64> {
        let version = self.version(kind, id).await.unwrap_or(0) + 1;
        let meta = serde_json::json!({"version": version, "updated_at": chrono::Utc::now()});
        write_atomic(&self.meta_path(kind, id), &serde_json::to_vec_pretty(&meta)?).await?;
        Ok(version)
    }
}

#[async_trait::async_trait]
impl Storage for JsonStorage {
    async fn save_task(&mut self, task: &Task) -> Result<()> {
        let json = serde_json::to_vec_pretty(task)?;
        write_atomic(&self.task_path(task.id), &json).await?;

        let version = self.bump_version("tasks", &task.id.to_string()).await?;
        tracing::debug!(task_id = %task.id, version, "saved task");
        Ok(())
    }

    async fn load_task(&self, id: TaskId) -> Result<Option<Task>> {
        read_json(&self.task_path(id)).await
    }

    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        let all: Vec<Task> = list_dir(&self.root.join("tasks")).await?;
        let mut tasks: Vec<Task> = all.into_iter().filter(|t| filter.matches(t)).collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(tasks)
    }

    async fn save_workspace(&mut self, workspace: &Workspace) -> Result<()> {
        let json = serde_json::to_vec_pretty(workspace)?;
        write_atomic(&self.workspace_path(workspace.task_id), &json).await?;

        let version = self
            .bump_version("workspaces", &workspace.task_id.to_string())
            .await?;
        tracing::debug!(task_id = %workspace.task_id, state = %workspace.state, version, "saved workspace");
        Ok(())
    }

    async fn load_workspace(&self, task_id: TaskId) -> Result<Option<Workspace>> {
        read_json(&self.workspace_path(task_id)).await
    }

    async fn list_workspaces(&self) -> Result<Vec<Workspace>> {
        let mut workspaces: Vec<Workspace> = list_dir(&self.root.join("workspaces")).await?;
        workspaces.sort_by(|a, b| a.allocated_at.cmp(&b.allocated_at));
        Ok(workspaces)
    }
}

/// Write `bytes` to a temp file next to `path`, sync, then rename over `path`.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    {
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
    }
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read_to_string(path).await {
        Ok(json) => {
            let value = serde_json::from_str(&json)?;
            Ok(Some(value))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn list_dir<T: serde::de::DeserializeOwned>(dir: &Path) -> Result<Vec<T>> {
    let mut items = Vec::new();
    let mut rd = fs::read_dir(dir).await?;
    while let Some(entry) = rd.next_entry().await? {
        if entry.path().extension().and_then(|s| s.to_str()) != Some("json") {
            continue;
        }
        match read_json(&entry.path()).await {
            Ok(Some(item)) => items.push(item),
            Ok(None) => {}
            Err(e) => tracing::warn!(path = %entry.path().display(), error = %e, "skipping unreadable record"),
        }
    }
    Ok(items)
}
