//! Lifecycle stages and the ordered stage registry.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A named phase in a task's fixed lifecycle.
///
/// The pipeline is linear: `Backlog → Requirements → Design → Implementation
/// → Testing → Review → Merge → Done`. `Abandoned` is a parallel terminal
/// state reachable from every non-terminal stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Not yet scheduled
    Backlog,
    /// Requirements analysis
    Requirements,
    /// Architecture and design
    Design,
    /// Code changes
    Implementation,
    /// Test authoring and execution
    Testing,
    /// Code review
    Review,
    /// Reconciliation with the shared repository
    Merge,
    /// Terminal success
    Done,
    /// Terminal abandonment
    Abandoned,
}

impl Stage {
    /// The linear pipeline, in order, excluding `Abandoned`.
    pub const PIPELINE: [Stage; 8] = [
        Stage::Backlog,
        Stage::Requirements,
        Stage::Design,
        Stage::Implementation,
        Stage::Testing,
        Stage::Review,
        Stage::Merge,
        Stage::Done,
    ];

    /// Position in the pipeline. `Abandoned` has no position.
    pub fn position(self) -> Option<usize> {
        Self::PIPELINE.iter().position(|s| *s == self)
    }

    /// The stage that follows a successful run of this one.
    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::Done | Stage::Abandoned => None,
            stage => stage.position().map(|i| Self::PIPELINE[i + 1]),
        }
    }

    /// Whether the stage is terminal (`Done` or `Abandoned`).
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Done | Stage::Abandoned)
    }

    /// Whether a stage handler runs for this stage.
    pub fn has_handler(self) -> bool {
        !self.is_terminal()
    }

    /// Whether `self` comes strictly before `other` in the pipeline.
    pub fn precedes(self, other: Stage) -> bool {
        match (self.position(), other.position()) {
            (Some(a), Some(b)) => a < b,
            _ => false,
        }
    }

    /// Lowercase stage name.
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Backlog => "backlog",
            Stage::Requirements => "requirements",
            Stage::Design => "design",
            Stage::Implementation => "implementation",
            Stage::Testing => "testing",
            Stage::Review => "review",
            Stage::Merge => "merge",
            Stage::Done => "done",
            Stage::Abandoned => "abandoned",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a stage name cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown stage: {0}")]
pub struct ParseStageError(pub String);

impl std::str::FromStr for Stage {
    type Err = ParseStageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "backlog" => Ok(Stage::Backlog),
            "requirements" => Ok(Stage::Requirements),
            "design" => Ok(Stage::Design),
            "implementation" => Ok(Stage::Implementation),
            "testing" => Ok(Stage::Testing),
            "review" => Ok(Stage::Review),
            "merge" => Ok(Stage::Merge),
            "done" => Ok(Stage::Done),
            "abandoned" => Ok(Stage::Abandoned),
            other => Err(ParseStageError(other.to_string())),
        }
    }
}

/// Capability contract for a stage: what it expects and what it should produce.
///
/// Artifact kinds are free-form labels matched against [`crate::Artifact::kind`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageContract {
    /// Stage this contract applies to
    pub stage: Stage,

    /// Artifact kinds expected from earlier stages
    pub inputs: Vec<String>,

    /// Artifact kinds this stage should produce
    pub outputs: Vec<String>,

    /// Default handler timeout, if the stage has one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_timeout: Option<Duration>,
}

impl StageContract {
    /// Create a contract with no inputs or outputs.
    pub fn new(stage: Stage) -> Self {
        Self {
            stage,
            inputs: Vec::new(),
            outputs: Vec::new(),
            default_timeout: None,
        }
    }

    /// Add expected input kinds.
    pub fn with_inputs(mut self, inputs: &[&str]) -> Self {
        self.inputs = inputs.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Add produced output kinds.
    pub fn with_outputs(mut self, outputs: &[&str]) -> Self {
        self.outputs = outputs.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Set the default timeout.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    /// Declared outputs missing from the given artifact kinds.
    pub fn missing_outputs<'a>(&'a self, produced: &[&str]) -> Vec<&'a str> {
        self.outputs
            .iter()
            .map(String::as_str)
            .filter(|kind| !produced.contains(kind))
            .collect()
    }
}

/// Fixed, ordered list of stages with their contracts.
#[derive(Debug, Clone)]
pub struct StageRegistry {
    contracts: Vec<StageContract>,
}

impl StageRegistry {
    /// The standard pipeline.
    pub fn standard() -> Self {
        let contracts = vec![
            StageContract::new(Stage::Backlog).with_outputs(&["triage"]),
            StageContract::new(Stage::Requirements).with_outputs(&["requirements"]),
            StageContract::new(Stage::Design)
                .with_inputs(&["requirements"])
                .with_outputs(&["design"]),
            StageContract::new(Stage::Implementation)
                .with_inputs(&["requirements", "design"])
                .with_outputs(&["change"]),
            StageContract::new(Stage::Testing)
                .with_inputs(&["change"])
                .with_outputs(&["test_report"]),
            StageContract::new(Stage::Review)
                .with_inputs(&["change", "test_report"])
                .with_outputs(&["review"]),
            StageContract::new(Stage::Merge)
                .with_inputs(&["change", "review"])
                .with_outputs(&["merge"]),
        ];
        Self { contracts }
    }

    /// Replace the contract for a stage.
    pub fn with_contract(mut self, contract: StageContract) -> Self {
        match self.contracts.iter_mut().find(|c| c.stage == contract.stage) {
            Some(existing) => *existing = contract,
            None => {
                self.contracts.push(contract);
                self.contracts.sort_by_key(|c| c.stage);
            }
        }
        self
    }

    /// Contract for a stage. Terminal stages get an empty contract.
    pub fn contract(&self, stage: Stage) -> StageContract {
        self.contracts
            .iter()
            .find(|c| c.stage == stage)
            .cloned()
            .unwrap_or_else(|| StageContract::new(stage))
    }

    /// Stages that run a handler, in order.
    pub fn stages(&self) -> impl Iterator<Item = Stage> + '_ {
        self.contracts.iter().map(|c| c.stage)
    }
}

impl Default for StageRegistry {
    fn default() -> Self {
        Self::standard()
    }
}
