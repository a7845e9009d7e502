//! In-memory storage, for tests and embedders that persist elsewhere.

use std::collections::HashMap;
use taskflow_core::{Task, TaskFilter, TaskId, Workspace};
use super::{Storage, Result};

/// Storage backed by hash maps. Nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    tasks: HashMap<TaskId, Task>,
    workspaces: HashMap<TaskId, Workspace>,
}

impl MemoryStorage {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl Storage for MemoryStorage {
    async fn save_task(&mut self, task: &Task) -> Result<()> {
        self.tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn load_task(&self, id: TaskId) -> Result<Option<Task>> {
        Ok(self.tasks.get(&id).cloned())
    }

    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        let mut tasks: Vec<Task> = self
            .tasks
            .values()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(tasks)
    }

    async fn save_workspace(&mut self, workspace: &Workspace) -> Result<()> {
        self.workspaces.insert(workspace.task_id, workspace.clone());
        Ok(())
    }

    async fn load_workspace(&self, task_id: TaskId) -> Result<Option<Workspace>> {
        Ok(self.workspaces.get(&task_id).cloned())
    }

    async fn list_workspaces(&self) -> Result<Vec<Workspace>> {
        let mut workspaces: Vec<Workspace> = self.workspaces.values().cloned().collect();
        workspaces.sort_by(|a, b| a.allocated_at.cmp(&b.allocated_at));
        Ok(workspaces)
    }
}
