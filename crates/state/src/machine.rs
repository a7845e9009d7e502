//! The task state machine.

use std::collections::HashMap;
use std::sync::Arc;
use taskflow_core::{
    Outcome, ResultMarker, Stage, StageResult, Task, TaskDraft, TaskFilter, TaskId, TaskStatus,
    Workspace,
};
use taskflow_storage::Storage;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};
use crate::{Result, StateError};

/// Exclusive hold on one task's state.
///
/// Obtained from [`TaskStateMachine::lock_task`]. Waiters are served in
/// arrival order. Dropping the lock lets the next waiter in.
pub struct TaskLock {
    task_id: TaskId,
    locks: Arc<LockTable>,
    _guard: OwnedMutexGuard<()>,
}

type LockTable = std::sync::Mutex<HashMap<TaskId, Arc<Mutex<()>>>>;

impl TaskLock {
    /// Task this lock protects.
    pub fn task_id(&self) -> TaskId {
        self.task_id
    }
}

impl Drop for TaskLock {
    fn drop(&mut self) {
        // Clones are only taken under the table lock, so a count of two
        // (table and our guard) means nobody is waiting.
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        if locks
            .get(&self.task_id)
            .is_some_and(|mutex| Arc::strong_count(mutex) <= 2)
        {
            locks.remove(&self.task_id);
        }
    }
}

/// Owns task lifecycle: stage, status and history.
///
/// Every public mutation either takes the per-task lock itself or requires a
/// [`TaskLock`] from the caller (the `*_locked` variants), so a caller that
/// needs to compose several steps under one critical section can do so.
pub struct TaskStateMachine<S: Storage> {
    storage: Arc<Mutex<S>>,
    locks: Arc<LockTable>,
}

impl<S: Storage> TaskStateMachine<S> {
    /// Create a state machine persisting to `storage`.
    pub fn new(storage: Arc<Mutex<S>>) -> Self {
        Self {
            storage,
            locks: Arc::new(std::sync::Mutex::new(HashMap::new())),
        }
    }

    /// Shared storage handle.
    pub fn storage(&self) -> Arc<Mutex<S>> {
        self.storage.clone()
    }

    /// Acquire the per-task lock, waiting behind earlier callers.
    pub async fn lock_task(&self, task_id: TaskId) -> TaskLock {
        let mutex = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks.entry(task_id).or_default().clone()
        };
        TaskLock {
            task_id,
            locks: self.locks.clone(),
            _guard: mutex.lock_owned().await,
        }
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    // === Queries ===

    /// Create a task from a draft.
    pub async fn create(&self, draft: TaskDraft) -> Result<Task> {
        let task = Task::new(draft);
        self.storage.lock().await.save_task(&task).await?;
        info!(task_id = %task.id, stage = %task.stage, title = %task.title, "created task");
        Ok(task)
    }

    /// Load a task.
    pub async fn get(&self, task_id: TaskId) -> Result<Task> {
        self.storage
            .lock()
            .await
            .load_task(task_id)
            .await?
            .ok_or(StateError::TaskNotFound(task_id))
    }

    /// List tasks matching a filter.
    pub async fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        Ok(self.storage.lock().await.list_tasks(filter).await?)
    }

    async fn save(&self, task: &mut Task) -> Result<()> {
        task.touch();
        self.storage.lock().await.save_task(task).await?;
        Ok(())
    }

    async fn load_live(&self, task_id: TaskId) -> Result<Task> {
        let task = self.get(task_id).await?;
        if task.is_terminal() {
            return Err(StateError::TerminalTask(task_id));
        }
        Ok(task)
    }

    // === Transitions ===

    /// Append a stage result and move the task accordingly.
    pub async fn advance(&self, task_id: TaskId, result: StageResult) -> Result<Task> {
        let lock = self.lock_task(task_id).await;
        self.advance_locked(&lock, result).await
    }

    /// [`advance`](Self::advance) under a lock the caller already holds.
    ///
    /// The result must belong to the current stage. `success` moves the task
    /// to the next stage (`completed` on reaching `Done`); `failure` keeps it
    /// at the stage as `blocked`.
    pub async fn advance_locked(&self, lock: &TaskLock, mut result: StageResult) -> Result<Task> {
        let task_id = lock.task_id();
        let mut task = self.load_live(task_id).await?;

        if result.stage != task.stage {
            return Err(StateError::IllegalTransition {
                task_id,
                stage: task.stage,
                reason: format!("result is for stage {}", result.stage),
            });
        }
        result.superseded = false;

        match result.outcome {
            Outcome::Success => {
                let next = task.stage.next().ok_or_else(|| StateError::IllegalTransition {
                    task_id,
                    stage: task.stage,
                    reason: "no next stage".to_string(),
                })?;
                let from = task.stage;
                task.history.push(result);
                task.stage = next;
                task.status = if next == Stage::Done {
                    TaskStatus::Completed
                } else {
                    TaskStatus::Pending
                };
                self.save(&mut task).await?;
                info!(task_id = %task_id, from = %from, to = %next, "stage advanced");
            }
            Outcome::Failure => {
                let attempt = result.attempt;
                let summary = result.summary.clone();
                task.history.push(result);
                task.status = TaskStatus::Blocked;
                self.save(&mut task).await?;
                warn!(task_id = %task_id, stage = %task.stage, attempt, summary = %summary, "stage failed");
            }
            Outcome::Skipped => {
                return Err(StateError::IllegalTransition {
                    task_id,
                    stage: task.stage,
                    reason: "skipped results are recorded by reopen or abandon".to_string(),
                });
            }
        }
        Ok(task)
    }

    /// Mark the current stage as running.
    pub async fn mark_in_progress_locked(&self, lock: &TaskLock) -> Result<Task> {
        let mut task = self.load_live(lock.task_id()).await?;
        if task.status != TaskStatus::InProgress {
            task.status = TaskStatus::InProgress;
            self.save(&mut task).await?;
            debug!(task_id = %task.id, stage = %task.stage, "stage in progress");
        }
        Ok(task)
    }

    /// Return a task that stopped mid-stage without a result to `pending`.
    pub async fn mark_pending_locked(&self, lock: &TaskLock) -> Result<Task> {
        let mut task = self.load_live(lock.task_id()).await?;
        if task.status == TaskStatus::InProgress {
            task.status = TaskStatus::Pending;
            self.save(&mut task).await?;
        }
        Ok(task)
    }

    /// Move a task back to an earlier (or its current) stage.
    pub async fn reopen(&self, task_id: TaskId, target: Stage) -> Result<Task> {
        let lock = self.lock_task(task_id).await;
        self.reopen_locked(&lock, target).await
    }

    /// [`reopen`](Self::reopen) under a lock the caller already holds.
    ///
    /// Every result at `target` or later is marked superseded; nothing is
    /// removed. A `skipped` marker result records the reopen itself.
    pub async fn reopen_locked(&self, lock: &TaskLock, target: Stage) -> Result<Task> {
        let task_id = lock.task_id();
        let mut task = self.load_live(task_id).await?;
        let current = task.stage;

        let target_pos = match target.position() {
            Some(pos)
                if !target.is_terminal()
                    && !current.precedes(target)
                    && !target.precedes(task.initial_stage) =>
            {
                pos
            }
            _ => {
                return Err(StateError::IllegalReopen {
                    task_id,
                    current,
                    target,
                })
            }
        };

        let mut superseded = 0;
        for result in task.history.iter_mut().filter(|r| !r.superseded) {
            if result.stage.position().map_or(false, |pos| pos >= target_pos) {
                result.superseded = true;
                superseded += 1;
            }
        }

        let now = chrono::Utc::now();
        task.history.push(
            StageResult::new(
                target,
                Outcome::Skipped,
                now,
                format!("reopened at {} from {}", target, current),
            )
            .with_marker(ResultMarker::Reopened { from: current }),
        );
        task.stage = target;
        task.status = TaskStatus::Pending;
        self.save(&mut task).await?;

        info!(task_id = %task_id, from = %current, to = %target, superseded, "task reopened");
        Ok(task)
    }

    /// Abandon a task. Terminal and irreversible.
    pub async fn abandon(&self, task_id: TaskId, reason: &str) -> Result<Task> {
        let lock = self.lock_task(task_id).await;
        self.abandon_locked(&lock, reason).await
    }

    /// [`abandon`](Self::abandon) under a lock the caller already holds.
    pub async fn abandon_locked(&self, lock: &TaskLock, reason: &str) -> Result<Task> {
        let task_id = lock.task_id();
        let mut task = self.load_live(task_id).await?;
        let at = task.stage;

        task.history.push(
            StageResult::new(at, Outcome::Skipped, chrono::Utc::now(), reason)
                .with_marker(ResultMarker::Abandoned {
                    reason: reason.to_string(),
                }),
        );
        task.stage = Stage::Abandoned;
        task.status = TaskStatus::Failed;
        self.save(&mut task).await?;

        warn!(task_id = %task_id, stage = %at, reason, "task abandoned");
        Ok(task)
    }

    // === Footprint and workspace ===

    /// Declare the footprint while the task is still in its first stage.
    pub async fn set_footprint(&self, task_id: TaskId, footprint: Vec<String>) -> Result<Task> {
        let lock = self.lock_task(task_id).await;
        let mut task = self.load_live(lock.task_id()).await?;
        if task.has_left_first_stage() {
            return Err(StateError::FootprintLocked(task_id));
        }
        task.footprint = footprint;
        self.save(&mut task).await?;
        debug!(task_id = %task_id, footprint = ?task.footprint, "footprint declared");
        Ok(task)
    }

    /// Replace the footprint regardless of stage.
    pub async fn reset_footprint(&self, task_id: TaskId, footprint: Vec<String>) -> Result<Task> {
        let lock = self.lock_task(task_id).await;
        let mut task = self.load_live(lock.task_id()).await?;
        let previous = std::mem::replace(&mut task.footprint, footprint);
        self.save(&mut task).await?;
        info!(
            task_id = %task_id,
            stage = %task.stage,
            previous = ?previous,
            footprint = ?task.footprint,
            "footprint reset"
        );
        Ok(task)
    }

    /// Bind (or refresh) the task's workspace record.
    ///
    /// A task has one workspace for its lifetime; a record for a different
    /// branch is rejected.
    pub async fn record_workspace_locked(&self, lock: &TaskLock, workspace: Workspace) -> Result<Task> {
        let task_id = lock.task_id();
        let mut task = self.get(task_id).await?;
        if workspace.task_id != task_id {
            return Err(StateError::WorkspaceLocked(task_id));
        }
        if let Some(existing) = &task.workspace {
            if existing.branch != workspace.branch {
                return Err(StateError::WorkspaceLocked(task_id));
            }
        }
        task.workspace = Some(workspace);
        self.save(&mut task).await?;
        Ok(task)
    }
}
