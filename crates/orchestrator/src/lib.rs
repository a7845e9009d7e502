//! taskflow orchestration.
//!
//! Composes conflict checking, workspace isolation, context retrieval, stage
//! handler execution and state transitions into a single operation,
//! [`Orchestrator::advance_stage`].

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod handler;
pub mod command;
pub mod orchestrator;
pub mod telemetry;

#[cfg(test)]
mod scenarios;

pub use config::{OrchestratorConfig, RetrievalConfig, RetryConfig, TimeoutConfig};
pub use error::{OrchestratorError, Result};
pub use handler::{handler_fn, Deadline, HandlerRegistry, StageHandler, StageInvocation, StageOutput};
pub use command::CommandStageHandler;
pub use orchestrator::Orchestrator;

pub use taskflow_conflict::FootprintInference;
pub use taskflow_workspace::WorkspaceConfig;
