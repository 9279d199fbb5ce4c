//! Pipeline parameters — stage behavior control.
//!
//! [`PipelineParams`] groups the static parameters that control the
//! pipeline stages and the orchestrator. These are application-layer
//! concerns, not domain policy.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Static pipeline behavior parameters.
///
/// Controls retrieval size, history windows, per-call timeouts and the
/// failure policies of the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineParams {
    /// Maximum number of chunks fetched per query. Never zero.
    pub top_k: usize,
    /// Chunks scoring below this are dropped before truncating to `top_k`.
    pub min_score: f32,
    /// Number of recent turns embedded in reformulation and answer prompts.
    pub history_window: usize,
    /// Timeout for a single classification call.
    pub classify_timeout: Duration,
    /// Timeout for the reformulation call.
    pub reformulate_timeout: Duration,
    /// Timeout for a single embedding call.
    pub embed_timeout: Duration,
    /// Timeout for a single store search.
    pub search_timeout: Duration,
    /// Timeout for the whole streamed generation call (first byte to last).
    pub generate_timeout: Duration,
    /// Abort the request on retrieval failure instead of proceeding with
    /// empty context.
    pub abort_on_retrieval_failure: bool,
    /// Keep guardrail-rejected user messages in session history.
    pub store_rejected_turns: bool,
    /// User-facing message for guardrail refusals. Deliberately opaque:
    /// policy violations and unavailable guardrails read the same.
    pub refusal_message: String,
}

impl Default for PipelineParams {
    fn default() -> Self {
        Self {
            top_k: 4,
            min_score: 0.0,
            history_window: 8,
            classify_timeout: Duration::from_secs(15),
            reformulate_timeout: Duration::from_secs(20),
            embed_timeout: Duration::from_secs(10),
            search_timeout: Duration::from_secs(5),
            generate_timeout: Duration::from_secs(120),
            abort_on_retrieval_failure: false,
            store_rejected_turns: false,
            refusal_message: "I can't help with that request.".to_string(),
        }
    }
}

impl PipelineParams {
    // ==================== Builder Methods ====================

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        debug_assert!(top_k > 0, "top_k must be non-zero");
        self.top_k = top_k;
        self
    }

    pub fn with_min_score(mut self, min_score: f32) -> Self {
        self.min_score = min_score;
        self
    }

    pub fn with_history_window(mut self, window: usize) -> Self {
        self.history_window = window;
        self
    }

    pub fn with_abort_on_retrieval_failure(mut self, abort: bool) -> Self {
        self.abort_on_retrieval_failure = abort;
        self
    }

    pub fn with_store_rejected_turns(mut self, store: bool) -> Self {
        self.store_rejected_turns = store;
        self
    }

    pub fn with_refusal_message(mut self, message: impl Into<String>) -> Self {
        self.refusal_message = message.into();
        self
    }
}
