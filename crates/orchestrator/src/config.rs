//! Orchestrator configuration.
//!
//! Loaded from TOML; every field has a default so a partial file is fine:
//!
//! ```toml
//! storage_dir = ".taskflow/store"
//! enforce_contracts = false
//! footprint_inference = "artifact_paths"
//!
//! [retry]
//! max_attempts = 3
//! initial_backoff_ms = 500
//!
//! [timeouts]
//! default_stage_secs = 900
//! stages = { testing = 1800 }
//!
//! [retrieval]
//! endpoint = "http://localhost:7070"
//!
//! [workspace]
//! repository = "."
//! branch_prefix = "taskflow/"
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::{Deserialize, Serialize};
use taskflow_conflict::FootprintInference;
use taskflow_core::Stage;
use taskflow_workspace::WorkspaceConfig;
use crate::{OrchestratorError, Result};

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Directory of the JSON task store
    pub storage_dir: PathBuf,

    /// Turn missing contract outputs into failures
    pub enforce_contracts: bool,

    /// How undeclared footprints are inferred
    pub footprint_inference: FootprintInference,

    /// Handler retry policy
    pub retry: RetryConfig,

    /// Deadlines
    pub timeouts: TimeoutConfig,

    /// Retrieval sizing and endpoint
    pub retrieval: RetrievalConfig,

    /// Workspace allocation
    pub workspace: WorkspaceConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from(".taskflow/store"),
            enforce_contracts: false,
            footprint_inference: FootprintInference::default(),
            retry: RetryConfig::default(),
            timeouts: TimeoutConfig::default(),
            retrieval: RetrievalConfig::default(),
            workspace: WorkspaceConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(s).map_err(|e| OrchestratorError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            OrchestratorError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Reject values that make no sense.
    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(OrchestratorError::Config(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        let multiplier = self.retry.backoff_multiplier;
        if multiplier.is_nan() || multiplier < 1.0 {
            return Err(OrchestratorError::Config(
                "retry.backoff_multiplier must be >= 1.0".to_string(),
            ));
        }
        if self.timeouts.default_stage_secs == 0 {
            return Err(OrchestratorError::Config(
                "timeouts.default_stage_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Set the retry policy.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Set the deadlines.
    pub fn with_timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Set the workspace configuration.
    pub fn with_workspace(mut self, workspace: WorkspaceConfig) -> Self {
        self.workspace = workspace;
        self
    }

    /// Set the store directory.
    pub fn with_storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.storage_dir = dir.into();
        self
    }

    /// Enforce stage contracts.
    pub fn with_enforce_contracts(mut self, enforce: bool) -> Self {
        self.enforce_contracts = enforce;
        self
    }

    /// Set footprint inference.
    pub fn with_footprint_inference(mut self, inference: FootprintInference) -> Self {
        self.footprint_inference = inference;
        self
    }
}

/// Bounded retry with exponential backoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts per `advance_stage` call, including the first
    pub max_attempts: u32,

    /// Delay after the first failure
    pub initial_backoff_ms: u64,

    /// Growth factor per further failure
    pub backoff_multiplier: f64,

    /// Upper bound on any single delay
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 500,
            backoff_multiplier: 2.0,
            max_backoff_ms: 30_000,
        }
    }
}

impl RetryConfig {
    /// Set the attempt count.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set the first delay.
    pub fn with_initial_backoff(mut self, delay: Duration) -> Self {
        self.initial_backoff_ms = delay.as_millis() as u64;
        self
    }

    /// Delay after failed attempt number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let millis = self.initial_backoff_ms as f64 * self.backoff_multiplier.powi(exponent);
        let capped = millis.min(self.max_backoff_ms as f64);
        Duration::from_millis(capped as u64)
    }
}

/// Deadlines for handlers and retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Handler deadline when neither an override nor a contract sets one
    pub default_stage_secs: u64,

    /// Per-stage handler deadline overrides
    pub stages: BTreeMap<Stage, u64>,

    /// Deadline for each retrieval call
    pub retrieval_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            default_stage_secs: 900,
            stages: BTreeMap::new(),
            retrieval_ms: 2_000,
        }
    }
}

impl TimeoutConfig {
    /// Override one stage's deadline.
    pub fn with_stage(mut self, stage: Stage, secs: u64) -> Self {
        self.stages.insert(stage, secs);
        self
    }

    /// Set the default deadline.
    pub fn with_default_stage_secs(mut self, secs: u64) -> Self {
        self.default_stage_secs = secs;
        self
    }

    /// Handler deadline: override, then contract default, then global default.
    pub fn stage_timeout(&self, stage: Stage, contract_default: Option<Duration>) -> Duration {
        self.stages
            .get(&stage)
            .map(|secs| Duration::from_secs(*secs))
            .or(contract_default)
            .unwrap_or_else(|| Duration::from_secs(self.default_stage_secs))
    }

    /// Retrieval deadline.
    pub fn retrieval(&self) -> Duration {
        Duration::from_millis(self.retrieval_ms)
    }
}

/// Retrieval sizing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Code snippets per bundle
    pub code_top_k: usize,

    /// Similar tasks per bundle
    pub similar_tasks_top_k: usize,

    /// Remote retrieval service, if any
    pub endpoint: Option<String>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            code_top_k: 8,
            similar_tasks_top_k: 5,
            endpoint: None,
        }
    }
}
