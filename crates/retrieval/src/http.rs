//! HTTP client for a remote retrieval service.

use async_trait::async_trait;
use reqwest::{Client, ClientBuilder};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use taskflow_core::{CodeSnippet, SimilarTask};
use tracing::{debug, warn};
use crate::{CodeSearch, RankedResults, Result, RetrievalError, SearchFilters, TaskHistorySearch};

/// Client for a retrieval service speaking JSON over HTTP.
///
/// Endpoints: `POST /search/code`, `POST /tasks/similar`, `GET /health`.
#[derive(Clone)]
pub struct HttpRetrievalClient {
    /// HTTP client
    client: Client,

    /// Service base URL, without trailing slash
    endpoint: String,
}

#[derive(Deserialize)]
struct CodeResponse {
    results: Vec<CodeSnippet>,
}

#[derive(Deserialize)]
struct SimilarResponse {
    results: Vec<SimilarTask>,
}

impl HttpRetrievalClient {
    /// Create a client with a request timeout.
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        let endpoint = endpoint.into().trim_end_matches('/').to_string();
        Self {
            client: ClientBuilder::new()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            endpoint,
        }
    }

    /// Service base URL.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Whether the service answers its health check.
    pub async fn health_check(&self) -> bool {
        match self.client.get(format!("{}/health", self.endpoint)).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!(error = %e, "retrieval health check failed");
                false
            }
        }
    }

    async fn post<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        payload: serde_json::Value,
    ) -> Result<T> {
        let response = self
            .client
            .post(format!("{}{}", self.endpoint, path))
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            warn!(%status, path, "retrieval service error");
            return Err(RetrievalError::Unavailable(format!(
                "status {}: {}",
                status, error_text
            )));
        }

        response
            .json()
            .await
            .map_err(|e| RetrievalError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl CodeSearch for HttpRetrievalClient {
    async fn search_code(
        &self,
        query: &str,
        top_k: usize,
        filters: &SearchFilters,
    ) -> Result<RankedResults<CodeSnippet>> {
        let payload = json!({
            "query": query,
            "top_k": top_k,
            "filters": filters,
        });
        let response: CodeResponse = self.post("/search/code", payload).await?;
        Ok(RankedResults::new(response.results, top_k))
    }
}

#[async_trait]
impl TaskHistorySearch for HttpRetrievalClient {
    async fn find_similar_tasks(
        &self,
        description: &str,
        top_k: usize,
    ) -> Result<RankedResults<SimilarTask>> {
        let payload = json!({
            "description": description,
            "top_k": top_k,
        });
        let response: SimilarResponse = self.post("/tasks/similar", payload).await?;
        Ok(RankedResults::new(response.results, top_k))
    }
}
