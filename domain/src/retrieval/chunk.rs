//! Retrieved chunk entity

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A unit of source text retrieved as generation context.
///
/// Chunks are produced per query, ordered by descending relevance, and
/// immutable once retrieved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub text: String,
    /// Id of the source document this chunk was cut from.
    pub source_id: String,
    /// Relevance score, higher is more relevant.
    pub score: f32,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl RetrievedChunk {
    pub fn new(text: impl Into<String>, source_id: impl Into<String>, score: f32) -> Self {
        Self {
            text: text.into(),
            source_id: source_id.into(),
            score,
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Sort chunks by descending score, keeping the original order for ties.
///
/// `sort_by` is stable, so equal scores retain store order.
pub fn sort_by_relevance(chunks: &mut [RetrievedChunk]) {
    chunks.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
}
