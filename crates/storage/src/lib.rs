//! Storage abstraction and implementations for taskflow.
//!
//! This crate provides a trait-based storage interface for the durable part
//! of the orchestration core (tasks with their stage history, and workspace
//! records), with a JSON-file implementation and an in-memory one.

#![warn(missing_docs)]

pub mod trait_;
pub mod json_storage;
pub mod memory;

pub use trait_::{Storage, StorageError, Result};
pub use json_storage::JsonStorage;
pub use memory::MemoryStorage;
