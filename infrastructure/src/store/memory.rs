//! In-memory knowledge store.
//!
//! Cosine-similarity search over chunks held in memory. Used by tests and
//! store-less configurations; real deployments point at the vector-store
//! service via [`HttpKnowledgeStore`](super::http::HttpKnowledgeStore).

use async_trait::async_trait;
use ragline_application::ports::knowledge_store::{KnowledgeStore, StoreError};
use ragline_domain::{RetrievedChunk, sort_by_relevance};
use std::sync::RwLock;

struct StoredChunk {
    embedding: Vec<f32>,
    chunk: RetrievedChunk,
}

/// Normalize to unit length; a zero vector stays zero.
fn normalize(vector: &[f32]) -> Vec<f32> {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        return vec![0.0; vector.len()];
    }
    vector.iter().map(|v| v / norm).collect()
}

fn dot(left: &[f32], right: &[f32]) -> f32 {
    left.iter().zip(right).map(|(l, r)| l * r).sum()
}

/// [`KnowledgeStore`] backed by an in-memory chunk list.
#[derive(Default)]
pub struct InMemoryKnowledgeStore {
    chunks: RwLock<Vec<StoredChunk>>,
}

impl InMemoryKnowledgeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a chunk with its embedding. The stored score field is
    /// recomputed per query, so the inserted value is irrelevant.
    pub fn insert(&self, embedding: Vec<f32>, chunk: RetrievedChunk) {
        self.chunks.write().unwrap().push(StoredChunk {
            embedding: normalize(&embedding),
            chunk,
        });
    }

    pub fn len(&self) -> usize {
        self.chunks.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.read().unwrap().is_empty()
    }
}

#[async_trait]
impl KnowledgeStore for InMemoryKnowledgeStore {
    async fn search(&self, vector: &[f32], top_k: usize) -> Result<Vec<RetrievedChunk>, StoreError> {
        let query = normalize(vector);
        let chunks = self.chunks.read().unwrap();

        let mut scored: Vec<RetrievedChunk> = chunks
            .iter()
            .map(|stored| {
                let mut chunk = stored.chunk.clone();
                chunk.score = dot(&query, &stored.embedding);
                chunk
            })
            .collect();

        sort_by_relevance(&mut scored);
        scored.truncate(top_k);
        Ok(scored)
    }
}
