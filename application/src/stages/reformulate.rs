//! Query reformulation stage.
//!
//! Rewrites a context-dependent user message ("and when does it close?")
//! into a standalone query using the recent conversation history, so the
//! retriever searches for what the user actually means.
//!
//! On the first turn there is nothing to resolve against, so the message
//! is returned unchanged without any inference call. This is both an
//! optimization and a drift guard: there is no history the model could
//! misread into the query.

use crate::config::PipelineParams;
use crate::ports::inference::InferenceClient;
use ragline_domain::{ConversationTurn, PipelineError, PromptTemplate, truncate_str};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Rewrites user messages into standalone retrieval queries.
pub struct QueryReformulator {
    inference: Arc<dyn InferenceClient>,
    params: PipelineParams,
}

impl QueryReformulator {
    pub fn new(inference: Arc<dyn InferenceClient>, params: PipelineParams) -> Self {
        Self { inference, params }
    }

    /// Produce a standalone query for `message`.
    ///
    /// A degenerate model response (empty, or restating the message
    /// verbatim) falls back to the original message rather than failing
    /// the pipeline. An inference error is returned as the recoverable
    /// [`PipelineError::ReformulationFailed`]; the orchestrator then
    /// retrieves with the raw message.
    pub async fn reformulate(
        &self,
        message: &str,
        history: &[ConversationTurn],
        cancel: CancellationToken,
    ) -> Result<String, PipelineError> {
        if history.is_empty() {
            return Ok(message.to_string());
        }

        let window = self.bounded_window(history);
        let prompt = PromptTemplate::reformulate(message, window);

        // Single full response wanted; the streaming capability is used
        // so cancellation reaches the upstream call. Never retried — the
        // orchestrator's raw-message fallback is cheaper than a second
        // generation call.
        let rewritten = tokio::time::timeout(self.params.reformulate_timeout, async {
            let stream = self
                .inference
                .complete_streaming(&prompt, cancel)
                .await
                .map_err(|e| PipelineError::ReformulationFailed(e.to_string()))?;
            stream
                .collect_text()
                .await
                .map_err(|e| PipelineError::ReformulationFailed(e.to_string()))
        })
        .await
        .map_err(|_| PipelineError::ReformulationFailed("reformulation timed out".into()))??;

        let rewritten = rewritten.trim();
        if rewritten.is_empty() || rewritten.eq_ignore_ascii_case(message.trim()) {
            debug!("Degenerate reformulation, keeping original message");
            return Ok(message.to_string());
        }

        debug!(
            "Reformulated '{}' into '{}'",
            truncate_str(message, 80),
            truncate_str(rewritten, 80)
        );
        Ok(rewritten.to_string())
    }

    fn bounded_window<'a>(&self, history: &'a [ConversationTurn]) -> &'a [ConversationTurn] {
        let window = self.params.history_window;
        if history.len() > window {
            warn!(
                "History has {} turns, windowing to the last {}",
                history.len(),
                window
            );
        }
        let start = history.len().saturating_sub(window);
        &history[start..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::inference::{CompletionEvent, CompletionStream, InferenceError};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    struct MockCompleter {
        response: Mutex<Option<Result<String, InferenceError>>>,
        calls: AtomicUsize,
        last_prompt: Mutex<Option<String>>,
    }

    impl MockCompleter {
        fn returning(response: Result<String, InferenceError>) -> Self {
            Self {
                response: Mutex::new(Some(response)),
                calls: AtomicUsize::new(0),
                last_prompt: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl InferenceClient for MockCompleter {
        async fn classify(&self, _prompt: &str) -> Result<String, InferenceError> {
            unimplemented!("reformulator never classifies")
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, InferenceError> {
            unimplemented!("reformulator never embeds")
        }

        async fn complete_streaming(
            &self,
            prompt: &str,
            _cancel: CancellationToken,
        ) -> Result<CompletionStream, InferenceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_prompt.lock().unwrap() = Some(prompt.to_string());
            let response = self
                .response
                .lock()
                .unwrap()
                .take()
                .unwrap_or(Err(InferenceError::RequestFailed("script exhausted".into())))?;
            let (tx, rx) = mpsc::channel(2);
            tx.send(CompletionEvent::Token(response)).await.unwrap();
            tx.send(CompletionEvent::Done).await.unwrap();
            Ok(CompletionStream::new(rx))
        }
    }

    fn history() -> Vec<ConversationTurn> {
        vec![
            ConversationTurn::user("When does enrollment open?"),
            ConversationTurn::assistant("Enrollment opens on June 1st."),
        ]
    }

    fn reformulator(client: Arc<MockCompleter>, params: PipelineParams) -> QueryReformulator {
        QueryReformulator::new(client, params)
    }

    #[tokio::test]
    async fn empty_history_returns_message_with_zero_calls() {
        let client = Arc::new(MockCompleter::returning(Ok("unused".into())));
        let stage = reformulator(client.clone(), PipelineParams::default());

        let query = stage
            .reformulate("When is the deadline?", &[], CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(query, "When is the deadline?");
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn rewrites_with_history() {
        let client = Arc::new(MockCompleter::returning(Ok(
            "When does enrollment close?".into(),
        )));
        let stage = reformulator(client.clone(), PipelineParams::default());

        let query = stage
            .reformulate("And when does it close?", &history(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(query, "When does enrollment close?");
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_response_falls_back_to_original() {
        let client = Arc::new(MockCompleter::returning(Ok("  \n".into())));
        let stage = reformulator(client, PipelineParams::default());

        let query = stage
            .reformulate("And when does it close?", &history(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(query, "And when does it close?");
    }

    #[tokio::test]
    async fn verbatim_response_falls_back_to_original() {
        let client = Arc::new(MockCompleter::returning(Ok(
            "and when does it close?".into(),
        )));
        let stage = reformulator(client, PipelineParams::default());

        let query = stage
            .reformulate("And when does it close?", &history(), CancellationToken::new())
            .await
            .unwrap();

        // Case-insensitive verbatim match counts as degenerate
        assert_eq!(query, "And when does it close?");
    }

    #[tokio::test]
    async fn inference_error_is_recoverable() {
        let client = Arc::new(MockCompleter::returning(Err(
            InferenceError::ConnectionError("refused".into()),
        )));
        let stage = reformulator(client, PipelineParams::default());

        let err = stage
            .reformulate("And when does it close?", &history(), CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::ReformulationFailed(_)));
        assert!(err.is_recoverable());
    }

    #[tokio::test]
    async fn prompt_windows_long_history() {
        let client = Arc::new(MockCompleter::returning(Ok("standalone query".into())));
        let params = PipelineParams::default().with_history_window(2);
        let stage = reformulator(client.clone(), params);

        let mut long_history = Vec::new();
        for i in 0..5 {
            long_history.push(ConversationTurn::user(format!("question {i}")));
            long_history.push(ConversationTurn::assistant(format!("answer {i}")));
        }

        stage
            .reformulate("follow-up", &long_history, CancellationToken::new())
            .await
            .unwrap();

        let prompt = client.last_prompt.lock().unwrap().clone().unwrap();
        assert!(prompt.contains("answer 4"));
        assert!(prompt.contains("question 4"));
        // Turns outside the window must not appear
        assert!(!prompt.contains("question 0"));
        assert!(!prompt.contains("answer 3"));
    }
}
