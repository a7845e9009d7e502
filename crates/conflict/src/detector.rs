//! Conflict detector.

use std::sync::Arc;
use taskflow_core::{
    ConflictRecord, ConflictReport, ConflictSeverity, Task, TaskFilter, TaskId,
};
use taskflow_storage::{Storage, StorageError};
use tokio::sync::Mutex;
use tracing::debug;
use crate::{compare_footprints, FootprintInference};

/// Result type for conflict checks.
pub type Result<T> = std::result::Result<T, ConflictError>;

/// Errors that can occur during a conflict check.
#[derive(Debug, thiserror::Error)]
pub enum ConflictError {
    /// The task does not exist
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Compares a task's footprint against every other active task.
///
/// Severity per pair:
/// - `high`: the same literal path in both footprints while both tasks are
///   at the same stage
/// - `medium`: a shared file, or a pattern that reaches one
/// - `low`: a shared parent directory and no shared file
/// - `none`: omitted from the report
pub struct ConflictDetector<S: Storage> {
    storage: Arc<Mutex<S>>,
    inference: FootprintInference,
}

impl<S: Storage> ConflictDetector<S> {
    /// Create a detector reading active tasks from `storage`.
    pub fn new(storage: Arc<Mutex<S>>) -> Self {
        Self {
            storage,
            inference: FootprintInference::default(),
        }
    }

    /// Set how undeclared footprints are inferred.
    pub fn with_inference(mut self, inference: FootprintInference) -> Self {
        self.inference = inference;
        self
    }

    /// Footprint used for comparison.
    pub fn effective_footprint(&self, task: &Task) -> Vec<String> {
        if !task.footprint.is_empty() {
            return task.footprint.clone();
        }
        match self.inference {
            FootprintInference::ArtifactPaths => task.artifact_paths(),
            FootprintInference::Disabled => Vec::new(),
        }
    }

    /// Check a stored task.
    pub async fn check(&self, task_id: TaskId) -> Result<ConflictReport> {
        let task = self
            .storage
            .lock()
            .await
            .load_task(task_id)
            .await?
            .ok_or(ConflictError::TaskNotFound(task_id))?;
        self.check_task(&task).await
    }

    /// Check a task the caller already holds (possibly newer than stored).
    pub async fn check_task(&self, task: &Task) -> Result<ConflictReport> {
        if task.is_terminal() {
            return Ok(ConflictReport::empty(task.id));
        }

        // Point-in-time snapshot of the other active tasks.
        let others = self
            .storage
            .lock()
            .await
            .list_tasks(&TaskFilter::active())
            .await?;

        let mine = self.effective_footprint(task);
        let mut report = ConflictReport::empty(task.id);
        report.records = others
            .iter()
            .filter(|other| other.id != task.id)
            .map(|other| self.classify(task, &mine, other))
            .filter(|record| record.severity > ConflictSeverity::None)
            .collect();
        report
            .records
            .sort_by(|a, b| b.severity.cmp(&a.severity).then(a.other_task_id.cmp(&b.other_task_id)));

        debug!(
            task_id = %task.id,
            active = others.len(),
            conflicts = report.records.len(),
            highest = %report.highest(),
            "conflict check"
        );
        Ok(report)
    }

    fn classify(&self, task: &Task, mine: &[String], other: &Task) -> ConflictRecord {
        let theirs = self.effective_footprint(other);
        let overlap = compare_footprints(mine, &theirs);

        let same_stage = task.stage == other.stage;
        let (severity, shared) = if !overlap.exact.is_empty() && same_stage {
            (ConflictSeverity::High, overlap.shared_files())
        } else if overlap.shares_file() {
            (ConflictSeverity::Medium, overlap.shared_files())
        } else if !overlap.directories.is_empty() {
            (ConflictSeverity::Low, overlap.directories.into_iter().collect())
        } else {
            (ConflictSeverity::None, Vec::new())
        };

        ConflictRecord {
            task_id: task.id,
            other_task_id: other.id,
            shared,
            severity,
        }
    }
}
