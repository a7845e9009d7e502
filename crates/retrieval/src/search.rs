//! Search capability traits.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use taskflow_core::{CodeSnippet, SimilarTask};
use crate::{RankedResults, Result};

/// Narrowing applied to a code search.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchFilters {
    /// Only return paths starting with one of these prefixes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub path_prefixes: Vec<String>,

    /// Maximum snippet length in bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_snippet_len: Option<usize>,
}

impl SearchFilters {
    /// Restrict to paths under the given prefixes.
    pub fn with_path_prefixes<I, P>(mut self, prefixes: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        self.path_prefixes = prefixes.into_iter().map(Into::into).collect();
        self
    }

    /// Cap snippet length.
    pub fn with_max_snippet_len(mut self, len: usize) -> Self {
        self.max_snippet_len = Some(len);
        self
    }

    /// Whether a path passes the prefix filter.
    pub fn allows(&self, path: &str) -> bool {
        self.path_prefixes.is_empty() || self.path_prefixes.iter().any(|p| path.starts_with(p.as_str()))
    }
}

/// Semantic search over the codebase.
#[async_trait]
pub trait CodeSearch: Send + Sync {
    /// Ranked `(path, snippet, score)` hits for a query.
    async fn search_code(
        &self,
        query: &str,
        top_k: usize,
        filters: &SearchFilters,
    ) -> Result<RankedResults<CodeSnippet>>;
}

/// Similarity search over past tasks.
#[async_trait]
pub trait TaskHistorySearch: Send + Sync {
    /// Ranked summaries of historical tasks resembling `description`.
    async fn find_similar_tasks(
        &self,
        description: &str,
        top_k: usize,
    ) -> Result<RankedResults<SimilarTask>>;
}
