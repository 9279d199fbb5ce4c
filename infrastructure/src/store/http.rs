//! HTTP knowledge store client.
//!
//! Talks to the external vector-store service's search endpoint. The
//! write/ingestion path of that service is deliberately not exposed here.

use async_trait::async_trait;
use ragline_application::ports::knowledge_store::{KnowledgeStore, StoreError};
use ragline_domain::RetrievedChunk;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    vector: &'a [f32],
    top_k: usize,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    text: String,
    source_id: String,
    score: f32,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    hits: Vec<SearchHit>,
}

/// [`KnowledgeStore`] adapter over the vector-store service's REST API.
pub struct HttpKnowledgeStore {
    http: reqwest::Client,
    base_url: String,
    request_timeout: Duration,
}

impl HttpKnowledgeStore {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Self {
        let base_url = base_url.into();
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            request_timeout,
        }
    }

    fn map_transport_error(e: reqwest::Error) -> StoreError {
        if e.is_timeout() {
            StoreError::Timeout
        } else if e.is_connect() {
            StoreError::ConnectionError(e.to_string())
        } else {
            StoreError::SearchFailed(e.to_string())
        }
    }
}

#[async_trait]
impl KnowledgeStore for HttpKnowledgeStore {
    async fn search(&self, vector: &[f32], top_k: usize) -> Result<Vec<RetrievedChunk>, StoreError> {
        let body = SearchRequest { vector, top_k };
        let response = self
            .http
            .post(format!("{}/search", self.base_url))
            .timeout(self.request_timeout)
            .json(&body)
            .send()
            .await
            .map_err(Self::map_transport_error)?
            .error_for_status()
            .map_err(|e| StoreError::SearchFailed(e.to_string()))?;

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| StoreError::SearchFailed(format!("malformed search response: {e}")))?;

        Ok(parsed
            .hits
            .into_iter()
            .map(|hit| RetrievedChunk {
                text: hit.text,
                source_id: hit.source_id,
                score: hit.score,
                metadata: hit.metadata,
            })
            .collect())
    }
}
