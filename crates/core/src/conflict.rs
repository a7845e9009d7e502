//! Conflict model - transient overlap between active tasks.

use serde::{Deserialize, Serialize};
use crate::id::TaskId;
use crate::Time;

/// Conflict severity, ordered from harmless to blocking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictSeverity {
    /// No shared paths
    None,
    /// Shared directory, disjoint files
    Low,
    /// Shared file
    Medium,
    /// Same file, same stage in flight on both tasks
    High,
}

impl std::fmt::Display for ConflictSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConflictSeverity::None => f.write_str("none"),
            ConflictSeverity::Low => f.write_str("low"),
            ConflictSeverity::Medium => f.write_str("medium"),
            ConflictSeverity::High => f.write_str("high"),
        }
    }
}

/// Overlap between two active tasks. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRecord {
    /// Task being checked
    pub task_id: TaskId,

    /// Other active task
    pub other_task_id: TaskId,

    /// Shared paths or directories
    pub shared: Vec<String>,

    /// Severity
    pub severity: ConflictSeverity,
}

impl ConflictRecord {
    /// Whether this record blocks stage execution.
    pub fn is_blocking(&self) -> bool {
        self.severity == ConflictSeverity::High
    }
}

/// Result of one conflict check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictReport {
    /// Task being checked
    pub task_id: TaskId,

    /// Records with severity above `None`
    pub records: Vec<ConflictRecord>,

    /// Snapshot time
    pub checked_at: Time,
}

impl ConflictReport {
    /// Empty report.
    pub fn empty(task_id: TaskId) -> Self {
        Self {
            task_id,
            records: Vec::new(),
            checked_at: chrono::Utc::now(),
        }
    }

    /// Highest severity present.
    pub fn highest(&self) -> ConflictSeverity {
        self.records
            .iter()
            .map(|r| r.severity)
            .max()
            .unwrap_or(ConflictSeverity::None)
    }

    /// Records that block execution.
    pub fn blocking(&self) -> Vec<&ConflictRecord> {
        self.records.iter().filter(|r| r.is_blocking()).collect()
    }

    /// Advisory records (`Low` and `Medium`).
    pub fn warnings(&self) -> Vec<ConflictRecord> {
        self.records
            .iter()
            .filter(|r| !r.is_blocking() && r.severity > ConflictSeverity::None)
            .cloned()
            .collect()
    }

    /// Whether any record blocks execution.
    pub fn is_blocked(&self) -> bool {
        self.records.iter().any(ConflictRecord::is_blocking)
    }
}
