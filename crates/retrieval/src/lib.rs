//! Best-effort retrieval for taskflow context bundles.
//!
//! A thin façade over two external capabilities: semantic code search and
//! similar-task lookup. Results are ranked and bounded; failures are reported
//! as [`RetrievalError::Unavailable`] so callers can degrade instead of abort.

#![warn(missing_docs)]

mod error;
mod ranked;
mod search;
mod gateway;
mod http;
mod history;

pub use error::{Result, RetrievalError};
pub use ranked::{RankedResults, Scored};
pub use search::{CodeSearch, SearchFilters, TaskHistorySearch};
pub use gateway::RetrievalGateway;
pub use http::HttpRetrievalClient;
pub use history::StoredTaskHistory;
