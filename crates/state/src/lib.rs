//! Task lifecycle state machine for taskflow.
//!
//! Owns every task's stage, status and append-only history. All mutations of
//! one task are serialized through a per-task lock; different tasks never
//! wait on each other.

#![warn(missing_docs)]

mod error;
mod machine;

pub use error::{Result, StateError};
pub use machine::{TaskLock, TaskStateMachine};
