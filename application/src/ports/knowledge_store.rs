//! Knowledge store port
//!
//! Read-only interface to the vector index. Ingestion, chunking and
//! embedding of documents happen in an external service and are out of
//! scope here.

use async_trait::async_trait;
use ragline_domain::RetrievedChunk;
use thiserror::Error;

/// Errors that can occur during store lookups
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Search failed: {0}")]
    SearchFailed(String),

    #[error("Timeout")]
    Timeout,
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Timeout | StoreError::ConnectionError(_))
    }
}

/// Read-only vector search over the ingested document corpus.
///
/// Returns up to `top_k` chunks ranked by descending relevance. An empty
/// result is a valid answer, not an error — the pipeline generates from
/// conversation knowledge alone in that case.
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    async fn search(&self, vector: &[f32], top_k: usize) -> Result<Vec<RetrievedChunk>, StoreError>;
}
