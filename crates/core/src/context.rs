//! Context bundle - the per-invocation view handed to a stage handler.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use crate::conflict::ConflictRecord;
use crate::id::TaskId;
use crate::stage::{Stage, StageContract};
use crate::stage_result::StageResult;
use crate::Time;

/// Ephemeral payload assembled for one stage invocation. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextBundle {
    /// Task the bundle was built for
    pub task_id: TaskId,

    /// Stage about to run
    pub stage: Stage,

    /// Capability contract of that stage
    pub contract: StageContract,

    /// Ranked code snippets
    pub code: Vec<CodeSnippet>,

    /// Ranked similar past tasks
    pub similar_tasks: Vec<SimilarTask>,

    /// The task's effective footprint
    pub footprint: Vec<String>,

    /// Non-superseded history
    pub history: Vec<StageResult>,

    /// Advisory conflicts (`low` / `medium`)
    pub warnings: Vec<ConflictRecord>,

    /// Opaque task parameters (e.g. `complexity`)
    pub parameters: BTreeMap<String, serde_json::Value>,

    /// Retrieval did not fully succeed
    pub degraded: bool,

    /// Why retrieval degraded
    pub degraded_reasons: Vec<String>,

    /// When assembled
    pub assembled_at: Time,
}

impl ContextBundle {
    /// Bundle with no retrieval results.
    pub fn new(task_id: TaskId, stage: Stage, contract: StageContract) -> Self {
        Self {
            task_id,
            stage,
            contract,
            code: Vec::new(),
            similar_tasks: Vec::new(),
            footprint: Vec::new(),
            history: Vec::new(),
            warnings: Vec::new(),
            parameters: BTreeMap::new(),
            degraded: false,
            degraded_reasons: Vec::new(),
            assembled_at: chrono::Utc::now(),
        }
    }

    /// Record a retrieval degradation.
    pub fn mark_degraded(&mut self, reason: impl Into<String>) {
        self.degraded = true;
        self.degraded_reasons.push(reason.into());
    }

    /// Read an opaque parameter.
    pub fn parameter(&self, key: &str) -> Option<&serde_json::Value> {
        self.parameters.get(key)
    }
}

/// A ranked code search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeSnippet {
    /// File path
    pub path: String,

    /// Requested snippet
    pub snippet: String,

    /// Relevance score
    pub score: f64,
}

/// A ranked summary of a historical task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarTask {
    /// External or local reference to the task
    pub reference: String,

    /// Title
    pub title: String,

    /// Outcome summary
    pub summary: String,

    /// Similarity score
    pub score: f64,
}
