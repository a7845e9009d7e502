//! Retrieval gateway.

use std::sync::Arc;
use std::time::Duration;
use taskflow_core::{CodeSnippet, SimilarTask};
use tracing::debug;
use crate::{CodeSearch, RankedResults, Result, RetrievalError, SearchFilters, TaskHistorySearch};

/// Stateless façade over the retrieval capabilities.
///
/// Every call is bounded by `timeout`. A missing backend, a timeout and an
/// unreachable service all come back as [`RetrievalError::Unavailable`].
#[derive(Clone)]
pub struct RetrievalGateway {
    code: Option<Arc<dyn CodeSearch>>,
    history: Option<Arc<dyn TaskHistorySearch>>,
    timeout: Duration,
}

impl Default for RetrievalGateway {
    fn default() -> Self {
        Self::disabled()
    }
}

impl RetrievalGateway {
    /// Gateway with no backends; every call reports unavailability.
    pub fn disabled() -> Self {
        Self {
            code: None,
            history: None,
            timeout: Duration::from_secs(2),
        }
    }

    /// Set the code search backend.
    pub fn with_code_search(mut self, code: Arc<dyn CodeSearch>) -> Self {
        self.code = Some(code);
        self
    }

    /// Set the similar-task backend.
    pub fn with_task_history(mut self, history: Arc<dyn TaskHistorySearch>) -> Self {
        self.history = Some(history);
        self
    }

    /// Set the per-call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Per-call timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Ranked code hits for a query.
    pub async fn search_code(
        &self,
        query: &str,
        top_k: usize,
        filters: &SearchFilters,
    ) -> Result<RankedResults<CodeSnippet>> {
        let code = self
            .code
            .as_ref()
            .ok_or_else(|| RetrievalError::Unavailable("no code search backend".to_string()))?;
        if top_k == 0 {
            return Ok(RankedResults::empty());
        }

        debug!(top_k, "searching code");
        let hits = tokio::time::timeout(self.timeout, code.search_code(query, top_k, filters))
            .await
            .map_err(|_| self.timed_out("code search"))??;

        // Re-rank locally so a sloppy backend cannot break ordering or bounds.
        let hits: Vec<CodeSnippet> = hits
            .filter(|h| filters.allows(&h.path))
            .map(|mut h| {
                if let Some(max) = filters.max_snippet_len {
                    truncate_on_char_boundary(&mut h.snippet, max);
                }
                h
            })
            .collect();
        Ok(RankedResults::new(hits, top_k))
    }

    /// Ranked summaries of similar past tasks.
    pub async fn find_similar_tasks(
        &self,
        description: &str,
        top_k: usize,
    ) -> Result<RankedResults<SimilarTask>> {
        let history = self
            .history
            .as_ref()
            .ok_or_else(|| RetrievalError::Unavailable("no task history backend".to_string()))?;
        if top_k == 0 {
            return Ok(RankedResults::empty());
        }

        debug!(top_k, "searching similar tasks");
        let hits = tokio::time::timeout(self.timeout, history.find_similar_tasks(description, top_k))
            .await
            .map_err(|_| self.timed_out("similar-task search"))??;
        Ok(RankedResults::new(hits.collect(), top_k))
    }

    fn timed_out(&self, what: &str) -> RetrievalError {
        RetrievalError::Unavailable(format!("{} timed out after {:?}", what, self.timeout))
    }
}

fn truncate_on_char_boundary(s: &mut String, max: usize) {
    if s.len() <= max {
        return;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s.truncate(end);
}
