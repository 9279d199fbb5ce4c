//! Context retrieval stage.
//!
//! Embeds the (reformulated) query and fetches the nearest chunks from
//! the knowledge store. Zero matches is a valid outcome: downstream
//! generation then runs on conversation knowledge alone.

use crate::config::PipelineParams;
use crate::ports::inference::InferenceClient;
use crate::ports::knowledge_store::KnowledgeStore;
use crate::stages::support::call_with_timeout_retry;
use ragline_domain::{PipelineError, RetrievedChunk, sort_by_relevance, truncate_str};
use std::sync::Arc;
use tracing::debug;

/// Vector retrieval over the knowledge store.
pub struct ContextRetriever {
    inference: Arc<dyn InferenceClient>,
    store: Arc<dyn KnowledgeStore>,
    params: PipelineParams,
}

impl ContextRetriever {
    pub fn new(
        inference: Arc<dyn InferenceClient>,
        store: Arc<dyn KnowledgeStore>,
        params: PipelineParams,
    ) -> Self {
        Self {
            inference,
            store,
            params,
        }
    }

    /// Fetch up to `top_k` chunks for `query`, best first.
    ///
    /// Chunks below the configured minimum score are dropped. Embedding
    /// and store failures surface as the recoverable
    /// [`PipelineError::RetrievalFailed`]; the orchestrator decides
    /// whether that aborts the request or proceeds with empty context.
    pub async fn retrieve(&self, query: &str) -> Result<Vec<RetrievedChunk>, PipelineError> {
        let vector = call_with_timeout_retry("embedding", self.params.embed_timeout, || {
            self.inference.embed(query)
        })
        .await
        .map_err(PipelineError::RetrievalFailed)?;

        let mut chunks =
            call_with_timeout_retry("store search", self.params.search_timeout, || {
                self.store.search(&vector, self.params.top_k)
            })
            .await
            .map_err(PipelineError::RetrievalFailed)?;

        chunks.retain(|chunk| chunk.score >= self.params.min_score);
        sort_by_relevance(&mut chunks);
        chunks.truncate(self.params.top_k);

        debug!(
            "Retrieved {} chunk(s) for query '{}'",
            chunks.len(),
            truncate_str(query, 80)
        );
        Ok(chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::inference::{CompletionStream, InferenceError};
    use crate::ports::knowledge_store::StoreError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_util::sync::CancellationToken;

    struct MockEmbedder {
        fail: bool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl InferenceClient for MockEmbedder {
        async fn classify(&self, _prompt: &str) -> Result<String, InferenceError> {
            unimplemented!("retriever never classifies")
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, InferenceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(InferenceError::RequestFailed("embedder down".into()))
            } else {
                Ok(vec![0.6, 0.8, 0.0])
            }
        }

        async fn complete_streaming(
            &self,
            _prompt: &str,
            _cancel: CancellationToken,
        ) -> Result<CompletionStream, InferenceError> {
            unimplemented!("retriever never generates")
        }
    }

    struct MockStore {
        result: Result<Vec<RetrievedChunk>, StoreError>,
    }

    #[async_trait]
    impl KnowledgeStore for MockStore {
        async fn search(
            &self,
            _vector: &[f32],
            _top_k: usize,
        ) -> Result<Vec<RetrievedChunk>, StoreError> {
            self.result.clone()
        }
    }

    fn retriever(
        embed_fail: bool,
        store_result: Result<Vec<RetrievedChunk>, StoreError>,
        params: PipelineParams,
    ) -> ContextRetriever {
        ContextRetriever::new(
            Arc::new(MockEmbedder {
                fail: embed_fail,
                calls: AtomicUsize::new(0),
            }),
            Arc::new(MockStore {
                result: store_result,
            }),
            params,
        )
    }

    #[tokio::test]
    async fn returns_chunks_best_first() {
        let chunks = vec![
            RetrievedChunk::new("middle", "doc-b", 0.5),
            RetrievedChunk::new("best", "doc-a", 0.9),
            RetrievedChunk::new("worst", "doc-c", 0.2),
        ];
        let stage = retriever(false, Ok(chunks), PipelineParams::default());

        let result = stage.retrieve("deadline").await.unwrap();
        let order: Vec<&str> = result.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(order, vec!["best", "middle", "worst"]);
    }

    #[tokio::test]
    async fn empty_store_is_not_an_error() {
        let stage = retriever(false, Ok(vec![]), PipelineParams::default());
        let result = stage.retrieve("deadline").await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn truncates_to_top_k() {
        let chunks = (0..6)
            .map(|i| RetrievedChunk::new(format!("chunk{i}"), "doc", 1.0 - i as f32 * 0.1))
            .collect();
        let stage = retriever(false, Ok(chunks), PipelineParams::default().with_top_k(2));

        let result = stage.retrieve("q").await.unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].text, "chunk0");
        assert_eq!(result[1].text, "chunk1");
    }

    #[tokio::test]
    async fn drops_chunks_below_min_score() {
        let chunks = vec![
            RetrievedChunk::new("relevant", "doc-a", 0.8),
            RetrievedChunk::new("noise", "doc-b", 0.05),
        ];
        let stage = retriever(
            false,
            Ok(chunks),
            PipelineParams::default().with_min_score(0.3),
        );

        let result = stage.retrieve("q").await.unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].text, "relevant");
    }

    #[tokio::test]
    async fn embedding_failure_is_retrieval_failure() {
        let stage = retriever(true, Ok(vec![]), PipelineParams::default());
        let err = stage.retrieve("q").await.unwrap_err();
        assert!(matches!(err, PipelineError::RetrievalFailed(_)));
        assert!(err.is_recoverable());
    }

    #[tokio::test]
    async fn store_failure_is_retrieval_failure() {
        let stage = retriever(
            false,
            Err(StoreError::SearchFailed("index corrupt".into())),
            PipelineParams::default(),
        );
        let err = stage.retrieve("q").await.unwrap_err();
        assert!(matches!(err, PipelineError::RetrievalFailed(_)));
    }
}
