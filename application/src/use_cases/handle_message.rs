//! Handle Message use case — the pipeline state machine.
//!
//! [`AnswerOrchestrator::handle`] drives one incoming message through
//! guarding, reformulation, retrieval and streamed generation, emitting
//! [`StreamEvent`]s to the caller as they happen. The returned
//! [`AnswerStream`] is finite, single-consumer and not restartable:
//! re-issuing the same message re-runs the whole pipeline.
//!
//! Session history is appended only after the stream completes
//! successfully, while the per-session lock is still held, so concurrent
//! requests on one session can never interleave their history appends.

use crate::config::PipelineParams;
use crate::ports::conversation_logger::{ConversationEvent, ConversationLogger, NoConversationLogger};
use crate::ports::inference::{CompletionEvent, InferenceClient};
use crate::ports::knowledge_store::KnowledgeStore;
use crate::ports::session_store::SessionStore;
use crate::stages::guardrail::GuardrailStage;
use crate::stages::reformulate::QueryReformulator;
use crate::stages::retrieve::ContextRetriever;
use ragline_domain::{PipelineError, PipelineState, PromptTemplate, StreamEvent, truncate_str};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Errors rejected before a pipeline run starts.
#[derive(Error, Debug)]
pub enum HandleMessageError {
    #[error("Empty message")]
    EmptyMessage,
}

/// Caller-side handle to one pipeline run.
///
/// Receives the finite event sequence for a single message. Dropping the
/// stream (or calling [`cancel`](Self::cancel)) propagates cancellation
/// into the in-flight generation call so the upstream invocation is
/// released rather than left running.
pub struct AnswerStream {
    receiver: mpsc::Receiver<StreamEvent>,
    cancel: CancellationToken,
}

impl AnswerStream {
    /// Next event, or `None` once the sequence has ended.
    pub async fn next(&mut self) -> Option<StreamEvent> {
        self.receiver.recv().await
    }

    /// Cancel the run, releasing the upstream generation call.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Drain the stream into a vector. Convenience for non-incremental
    /// callers and tests.
    pub async fn collect(mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.next().await {
            events.push(event);
        }
        events
    }
}

impl Drop for AnswerStream {
    fn drop(&mut self) {
        // Client disconnect: release the upstream call.
        self.cancel.cancel();
    }
}

struct Pipeline {
    guardrail: GuardrailStage,
    reformulator: QueryReformulator,
    retriever: ContextRetriever,
    inference: Arc<dyn InferenceClient>,
    sessions: Arc<dyn SessionStore>,
    logger: Arc<dyn ConversationLogger>,
    params: PipelineParams,
}

/// Use case orchestrating the full pipeline for incoming chat messages.
///
/// This is the only contract the surrounding web/API layer needs:
/// `handle(session_id, message)` returning a stream of events.
pub struct AnswerOrchestrator {
    pipeline: Arc<Pipeline>,
}

impl AnswerOrchestrator {
    pub fn new(
        inference: Arc<dyn InferenceClient>,
        store: Arc<dyn KnowledgeStore>,
        sessions: Arc<dyn SessionStore>,
        params: PipelineParams,
    ) -> Self {
        Self::with_logger(inference, store, sessions, params, Arc::new(NoConversationLogger))
    }

    /// Construct with a conversation logger recording pipeline events.
    pub fn with_logger(
        inference: Arc<dyn InferenceClient>,
        store: Arc<dyn KnowledgeStore>,
        sessions: Arc<dyn SessionStore>,
        params: PipelineParams,
        logger: Arc<dyn ConversationLogger>,
    ) -> Self {
        let pipeline = Pipeline {
            guardrail: GuardrailStage::new(inference.clone(), params.clone()),
            reformulator: QueryReformulator::new(inference.clone(), params.clone()),
            retriever: ContextRetriever::new(inference.clone(), store, params.clone()),
            inference,
            sessions,
            logger,
            params,
        };
        Self {
            pipeline: Arc::new(pipeline),
        }
    }

    /// Run the pipeline for one message.
    ///
    /// Returns immediately with the event stream; the pipeline itself runs
    /// in a spawned task. Callable once per incoming message — each call
    /// independently re-runs every stage, nothing is cached across calls.
    pub async fn handle(
        &self,
        session_id: &str,
        message: &str,
    ) -> Result<AnswerStream, HandleMessageError> {
        let message = message.trim().to_string();
        if message.is_empty() {
            return Err(HandleMessageError::EmptyMessage);
        }

        let (tx, rx) = mpsc::channel(32);
        let cancel = CancellationToken::new();

        let pipeline = self.pipeline.clone();
        let session_id = session_id.to_string();
        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            pipeline.run(session_id, message, tx, task_cancel).await;
        });

        Ok(AnswerStream {
            receiver: rx,
            cancel,
        })
    }
}

impl Pipeline {
    async fn run(
        &self,
        session_id: String,
        message: String,
        tx: mpsc::Sender<StreamEvent>,
        cancel: CancellationToken,
    ) {
        info!(
            "Handling message for session {session_id}: {}",
            truncate_str(&message, 100)
        );
        let mut state = PipelineState::Received;

        // Serializes concurrent requests on the same session. Held until
        // the run ends so history appends cannot interleave.
        let session = self.sessions.get_or_create(&session_id).await;
        let mut session = session.lock_owned().await;

        // ==================== GUARDING ====================
        self.advance(&mut state, PipelineState::Guarding);
        let history = session.turns().to_vec();
        let rejected = match self.guardrail.check(&message, &history).await {
            Ok(verdict) => {
                self.logger.log(ConversationEvent::new(
                    "guardrail_verdict",
                    serde_json::json!({
                        "session": session_id,
                        "verdict": verdict.kind,
                        "explanation": verdict.explanation,
                    }),
                ));
                if verdict.allows_generation() {
                    false
                } else {
                    info!(
                        "Guardrail rejected message for session {session_id}: {:?}",
                        verdict.kind
                    );
                    true
                }
            }
            // Fail closed: an unreachable guardrail refuses exactly like
            // an unsafe verdict. The refusal message stays opaque.
            Err(e) => {
                warn!("Refusing message for session {session_id}: {e}");
                self.logger.log(ConversationEvent::new(
                    "guardrail_verdict",
                    serde_json::json!({
                        "session": session_id,
                        "verdict": "unavailable",
                        "explanation": e.to_string(),
                    }),
                ));
                true
            }
        };

        if rejected {
            if self.params.store_rejected_turns {
                session.push_user(&message);
            }
            let _ = tx.send(StreamEvent::refusal(self.params.refusal_message.clone())).await;
            let _ = tx.send(StreamEvent::Done).await;
            self.advance(&mut state, PipelineState::Aborted);
            return;
        }

        if cancel.is_cancelled() {
            self.advance(&mut state, PipelineState::Aborted);
            return;
        }

        // ==================== REFORMULATING ====================
        self.advance(&mut state, PipelineState::Reformulating);
        let query = match self
            .reformulator
            .reformulate(&message, &history, cancel.clone())
            .await
        {
            Ok(query) => query,
            Err(e) => {
                // Recoverable: retrieve with the raw message instead.
                warn!("Reformulation failed, using raw message: {e}");
                message.clone()
            }
        };

        self.logger.log(ConversationEvent::new(
            "query_reformulated",
            serde_json::json!({
                "session": session_id,
                "query": query,
                "unchanged": query == message,
            }),
        ));

        if cancel.is_cancelled() {
            self.advance(&mut state, PipelineState::Aborted);
            return;
        }

        // ==================== RETRIEVING ====================
        self.advance(&mut state, PipelineState::Retrieving);
        let chunks = match self.retriever.retrieve(&query).await {
            Ok(chunks) => chunks,
            Err(e) if !self.params.abort_on_retrieval_failure => {
                // Non-fatal by default: generate from conversation
                // knowledge alone.
                warn!("Retrieval failed, proceeding with empty context: {e}");
                Vec::new()
            }
            Err(e) => {
                warn!("Retrieval failed, aborting per configuration: {e}");
                let _ = tx.send(StreamEvent::error(e.to_string())).await;
                self.advance(&mut state, PipelineState::Aborted);
                return;
            }
        };

        self.logger.log(ConversationEvent::new(
            "context_retrieved",
            serde_json::json!({
                "session": session_id,
                "chunks": chunks.len(),
                "sources": chunks.iter().map(|c| c.source_id.as_str()).collect::<Vec<_>>(),
            }),
        ));

        if cancel.is_cancelled() {
            self.advance(&mut state, PipelineState::Aborted);
            return;
        }

        // ==================== GENERATING ====================
        self.advance(&mut state, PipelineState::Generating);
        let recent = session.recent_turns(self.params.history_window).to_vec();
        let prompt = PromptTemplate::answer(&message, &recent, &chunks);

        let mut completion = match self
            .inference
            .complete_streaming(&prompt, cancel.clone())
            .await
        {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Generation call failed to start: {e}");
                let _ = tx
                    .send(StreamEvent::error(format!("generation failed: {e}")))
                    .await;
                self.advance(&mut state, PipelineState::Aborted);
                return;
            }
        };

        // ==================== STREAMING ====================
        self.advance(&mut state, PipelineState::Streaming);
        let deadline = tokio::time::Instant::now() + self.params.generate_timeout;
        let mut answer = String::new();

        let outcome: Result<(), PipelineError> = loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break Err(PipelineError::Cancelled),
                _ = tokio::time::sleep_until(deadline) => {
                    break Err(PipelineError::GenerationFailed("generation timed out".into()));
                }
                event = completion.recv() => event,
            };
            match event {
                Some(CompletionEvent::Token(token)) => {
                    answer.push_str(&token);
                    // FIFO forwarding, no reordering. The send races the
                    // same cancellation and deadline as the receive, so a
                    // cancelled-but-unread stream cannot pin the session
                    // lock on a full channel. A failed send means the
                    // caller is gone.
                    tokio::select! {
                        _ = cancel.cancelled() => break Err(PipelineError::Cancelled),
                        _ = tokio::time::sleep_until(deadline) => {
                            break Err(PipelineError::GenerationFailed(
                                "generation timed out".into(),
                            ));
                        }
                        sent = tx.send(StreamEvent::token(token)) => {
                            if sent.is_err() {
                                break Err(PipelineError::Cancelled);
                            }
                        }
                    }
                }
                Some(CompletionEvent::Done) | None => {
                    // The adapter's reader task drops its sender when the
                    // token fires, so end-of-stream races the cancel arm.
                    // The token is authoritative: a cancelled run must
                    // never complete.
                    if cancel.is_cancelled() {
                        break Err(PipelineError::Cancelled);
                    }
                    break Ok(());
                }
                Some(CompletionEvent::Error(e)) => {
                    break Err(PipelineError::GenerationFailed(e));
                }
            }
        };

        match outcome {
            Ok(()) => {
                // Post-generation, pre-Done: the turn pair becomes visible
                // to the next request on this session atomically with the
                // lock release.
                session.push_user(&message);
                session.push_assistant(&answer);
                self.logger.log(ConversationEvent::new(
                    "answer_completed",
                    serde_json::json!({
                        "session": session_id,
                        "bytes": answer.len(),
                        "context_chunks": chunks.len(),
                    }),
                ));
                let _ = tx.send(StreamEvent::Done).await;
                self.advance(&mut state, PipelineState::Done);
                info!("Completed answer for session {session_id}");
            }
            Err(e) if e.is_cancelled() => {
                // Caller-initiated: no further events, release upstream.
                debug!("Stream cancelled for session {session_id}");
                cancel.cancel();
                self.advance(&mut state, PipelineState::Aborted);
            }
            Err(e) => {
                // Partial tokens already forwarded are not retracted; the
                // partial answer is never persisted.
                warn!("Generation failed for session {session_id}: {e}");
                self.logger.log(ConversationEvent::new(
                    "generation_failed",
                    serde_json::json!({ "session": session_id, "error": e.to_string() }),
                ));
                let _ = tx.send(StreamEvent::error(e.to_string())).await;
                cancel.cancel();
                self.advance(&mut state, PipelineState::Aborted);
            }
        }
    }

    fn advance(&self, state: &mut PipelineState, next: PipelineState) {
        debug_assert!(
            state.can_transition_to(next),
            "illegal pipeline transition {state} -> {next}"
        );
        debug!("Pipeline state: {state} -> {next}");
        *state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::inference::{CompletionStream, InferenceError};
    use crate::ports::knowledge_store::StoreError;
    use async_trait::async_trait;
    use ragline_domain::{RetrievedChunk, Role, Session};
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::Mutex;

    // ==================== Test Mocks ====================

    /// Scripted inference backend. Classifier answers are fixed per kind;
    /// every streaming completion replays `completion_script`.
    struct MockInference {
        safety_response: String,
        topic_response: String,
        classify_fails: bool,
        completion_script: Vec<CompletionEvent>,
        /// Never produce completion events; observe cancellation instead.
        hang_completions: bool,
        /// Send one token, then close the completion channel as soon as
        /// the cancellation token fires.
        close_on_cancel: bool,
        classify_calls: AtomicUsize,
        embed_calls: AtomicUsize,
        complete_calls: AtomicUsize,
        completion_cancelled: Arc<AtomicBool>,
    }

    impl MockInference {
        fn safe() -> Self {
            Self::with_script(vec![
                CompletionEvent::Token("The deadline ".to_string()),
                CompletionEvent::Token("is July 15.".to_string()),
                CompletionEvent::Done,
            ])
        }

        fn with_script(script: Vec<CompletionEvent>) -> Self {
            Self {
                safety_response: "safe\nRoutine question.".to_string(),
                topic_response: "yes".to_string(),
                classify_fails: false,
                completion_script: script,
                hang_completions: false,
                close_on_cancel: false,
                classify_calls: AtomicUsize::new(0),
                embed_calls: AtomicUsize::new(0),
                complete_calls: AtomicUsize::new(0),
                completion_cancelled: Arc::new(AtomicBool::new(false)),
            }
        }

        fn unsafe_verdict() -> Self {
            let mut mock = Self::safe();
            mock.safety_response = "unsafe\nRequests instructions for violence.".to_string();
            mock
        }

        fn off_topic() -> Self {
            let mut mock = Self::safe();
            mock.topic_response = "no".to_string();
            mock
        }

        fn classifier_outage() -> Self {
            let mut mock = Self::safe();
            mock.classify_fails = true;
            mock
        }

        fn hanging() -> Self {
            let mut mock = Self::safe();
            mock.hang_completions = true;
            mock
        }

        fn closing_on_cancel() -> Self {
            let mut mock = Self::safe();
            mock.close_on_cancel = true;
            mock
        }
    }

    #[async_trait]
    impl InferenceClient for MockInference {
        async fn classify(&self, prompt: &str) -> Result<String, InferenceError> {
            self.classify_calls.fetch_add(1, Ordering::SeqCst);
            if self.classify_fails {
                return Err(InferenceError::RequestFailed("503".into()));
            }
            if prompt.contains("content moderator") {
                Ok(self.safety_response.clone())
            } else {
                Ok(self.topic_response.clone())
            }
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, InferenceError> {
            self.embed_calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![1.0, 0.0])
        }

        async fn complete_streaming(
            &self,
            _prompt: &str,
            cancel: CancellationToken,
        ) -> Result<CompletionStream, InferenceError> {
            self.complete_calls.fetch_add(1, Ordering::SeqCst);
            let (tx, rx) = mpsc::channel(16);
            if self.hang_completions {
                let cancelled = self.completion_cancelled.clone();
                tokio::spawn(async move {
                    cancel.cancelled().await;
                    cancelled.store(true, Ordering::SeqCst);
                    drop(tx);
                });
            } else if self.close_on_cancel {
                tokio::spawn(async move {
                    let _ = tx.send(CompletionEvent::Token("partial ".to_string())).await;
                    cancel.cancelled().await;
                    drop(tx);
                });
            } else {
                let script = self.completion_script.clone();
                tokio::spawn(async move {
                    for event in script {
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                });
            }
            Ok(CompletionStream::new(rx))
        }
    }

    struct MockStore {
        result: Result<Vec<RetrievedChunk>, StoreError>,
        search_calls: AtomicUsize,
    }

    impl MockStore {
        fn with_chunks(chunks: Vec<RetrievedChunk>) -> Self {
            Self {
                result: Ok(chunks),
                search_calls: AtomicUsize::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                result: Err(StoreError::SearchFailed("index offline".into())),
                search_calls: AtomicUsize::new(0),
            }
        }

        fn empty() -> Self {
            Self::with_chunks(Vec::new())
        }
    }

    #[async_trait]
    impl KnowledgeStore for MockStore {
        async fn search(
            &self,
            _vector: &[f32],
            _top_k: usize,
        ) -> Result<Vec<RetrievedChunk>, StoreError> {
            self.search_calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }
    }

    struct TestSessionStore {
        sessions: StdMutex<HashMap<String, Arc<Mutex<Session>>>>,
    }

    impl TestSessionStore {
        fn new() -> Self {
            Self {
                sessions: StdMutex::new(HashMap::new()),
            }
        }
    }

    #[async_trait]
    impl SessionStore for TestSessionStore {
        async fn get_or_create(&self, session_id: &str) -> Arc<Mutex<Session>> {
            self.sessions
                .lock()
                .unwrap()
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(Session::new(session_id))))
                .clone()
        }

        async fn remove(&self, session_id: &str) -> bool {
            self.sessions.lock().unwrap().remove(session_id).is_some()
        }
    }

    struct Harness {
        orchestrator: AnswerOrchestrator,
        inference: Arc<MockInference>,
        store: Arc<MockStore>,
        sessions: Arc<TestSessionStore>,
    }

    fn harness(inference: MockInference, store: MockStore, params: PipelineParams) -> Harness {
        let inference = Arc::new(inference);
        let store = Arc::new(store);
        let sessions = Arc::new(TestSessionStore::new());
        let orchestrator = AnswerOrchestrator::new(
            inference.clone(),
            store.clone(),
            sessions.clone(),
            params,
        );
        Harness {
            orchestrator,
            inference,
            store,
            sessions,
        }
    }

    fn two_chunks() -> Vec<RetrievedChunk> {
        vec![
            RetrievedChunk::new("Applications close July 15.", "admissions-faq", 0.92),
            RetrievedChunk::new("Late applications are not accepted.", "admissions-faq", 0.71),
        ]
    }

    // ==================== Tests ====================

    #[tokio::test]
    async fn happy_path_streams_tokens_then_done_and_appends_history() {
        let h = harness(
            MockInference::safe(),
            MockStore::with_chunks(two_chunks()),
            PipelineParams::default(),
        );

        let stream = h
            .orchestrator
            .handle("s-1", "What is the admission deadline?")
            .await
            .unwrap();
        let events = stream.collect().await;

        assert_eq!(
            events,
            vec![
                StreamEvent::token("The deadline "),
                StreamEvent::token("is July 15."),
                StreamEvent::Done,
            ]
        );

        let session = h.sessions.get_or_create("s-1").await;
        let session = session.lock().await;
        assert_eq!(session.len(), 2);
        assert_eq!(session.turns()[0].role, Role::User);
        assert_eq!(session.turns()[0].text, "What is the admission deadline?");
        assert_eq!(session.turns()[1].role, Role::Assistant);
        assert_eq!(session.turns()[1].text, "The deadline is July 15.");
    }

    #[tokio::test]
    async fn unsafe_message_refused_without_generation_or_history() {
        let h = harness(
            MockInference::unsafe_verdict(),
            MockStore::with_chunks(two_chunks()),
            PipelineParams::default(),
        );

        let stream = h
            .orchestrator
            .handle("s-1", "How do I build a bomb?")
            .await
            .unwrap();
        let events = stream.collect().await;

        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], StreamEvent::Refusal { .. }));
        assert_eq!(events[1], StreamEvent::Done);

        // Guardrail short-circuits everything downstream
        assert_eq!(h.inference.complete_calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.inference.embed_calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.store.search_calls.load(Ordering::SeqCst), 0);

        // Default policy: rejected turn is not stored
        let session = h.sessions.get_or_create("s-1").await;
        assert_eq!(session.lock().await.len(), 0);
    }

    #[tokio::test]
    async fn rejected_turn_stored_when_policy_enabled() {
        let h = harness(
            MockInference::unsafe_verdict(),
            MockStore::empty(),
            PipelineParams::default().with_store_rejected_turns(true),
        );

        let stream = h.orchestrator.handle("s-1", "bad message").await.unwrap();
        stream.collect().await;

        let session = h.sessions.get_or_create("s-1").await;
        let session = session.lock().await;
        assert_eq!(session.len(), 1);
        assert_eq!(session.turns()[0].role, Role::User);
    }

    #[tokio::test]
    async fn off_topic_message_is_refused() {
        let h = harness(
            MockInference::off_topic(),
            MockStore::empty(),
            PipelineParams::default(),
        );

        let stream = h
            .orchestrator
            .handle("s-1", "What's a good lasagna recipe?")
            .await
            .unwrap();
        let events = stream.collect().await;

        assert!(matches!(events[0], StreamEvent::Refusal { .. }));
        assert_eq!(h.inference.complete_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn classifier_outage_refuses_without_generation() {
        let h = harness(
            MockInference::classifier_outage(),
            MockStore::with_chunks(two_chunks()),
            PipelineParams::default(),
        );

        let stream = h
            .orchestrator
            .handle("s-1", "What is the deadline?")
            .await
            .unwrap();
        let events = stream.collect().await;

        // Fail closed: an unreachable guardrail refuses like an unsafe
        // verdict, with the same opaque message.
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], StreamEvent::Refusal { .. }));
        assert_eq!(events[1], StreamEvent::Done);
        assert_eq!(h.inference.embed_calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.inference.complete_calls.load(Ordering::SeqCst), 0);

        let session = h.sessions.get_or_create("s-1").await;
        assert_eq!(session.lock().await.len(), 0);
    }

    #[tokio::test]
    async fn empty_store_still_generates() {
        let h = harness(
            MockInference::safe(),
            MockStore::empty(),
            PipelineParams::default(),
        );

        let stream = h.orchestrator.handle("s-1", "What is the deadline?").await.unwrap();
        let events = stream.collect().await;

        // Reached generation despite zero context
        assert_eq!(h.inference.complete_calls.load(Ordering::SeqCst), 1);
        assert_eq!(events.last(), Some(&StreamEvent::Done));
    }

    #[tokio::test]
    async fn retrieval_failure_proceeds_with_empty_context_by_default() {
        let h = harness(
            MockInference::safe(),
            MockStore::failing(),
            PipelineParams::default(),
        );

        let stream = h.orchestrator.handle("s-1", "What is the deadline?").await.unwrap();
        let events = stream.collect().await;

        assert_eq!(h.inference.complete_calls.load(Ordering::SeqCst), 1);
        assert_eq!(events.last(), Some(&StreamEvent::Done));
    }

    #[tokio::test]
    async fn retrieval_failure_aborts_when_configured() {
        let h = harness(
            MockInference::safe(),
            MockStore::failing(),
            PipelineParams::default().with_abort_on_retrieval_failure(true),
        );

        let stream = h.orchestrator.handle("s-1", "What is the deadline?").await.unwrap();
        let events = stream.collect().await;

        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], StreamEvent::Error { .. }));
        assert_eq!(h.inference.complete_calls.load(Ordering::SeqCst), 0);

        // No history on an aborted request
        let session = h.sessions.get_or_create("s-1").await;
        assert_eq!(session.lock().await.len(), 0);
    }

    #[tokio::test]
    async fn midstream_error_keeps_partial_tokens_and_skips_history() {
        let h = harness(
            MockInference::with_script(vec![
                CompletionEvent::Token("partial ".to_string()),
                CompletionEvent::Error("connection reset".to_string()),
            ]),
            MockStore::empty(),
            PipelineParams::default(),
        );

        let stream = h.orchestrator.handle("s-1", "question").await.unwrap();
        let events = stream.collect().await;

        // Partial output delivered, then a terminal error, nothing after
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], StreamEvent::token("partial "));
        assert!(matches!(events[1], StreamEvent::Error { .. }));

        let session = h.sessions.get_or_create("s-1").await;
        assert_eq!(session.lock().await.len(), 0);
    }

    #[tokio::test]
    async fn done_is_last_and_exactly_once() {
        let h = harness(
            MockInference::safe(),
            MockStore::empty(),
            PipelineParams::default(),
        );

        let stream = h.orchestrator.handle("s-1", "question").await.unwrap();
        let events = stream.collect().await;

        let terminal_count = events.iter().filter(|e| e.is_terminal()).count();
        assert_eq!(terminal_count, 1);
        assert!(events.last().unwrap().is_terminal());
    }

    #[tokio::test]
    async fn identical_invocations_rerun_the_full_pipeline() {
        let h = harness(
            MockInference::safe(),
            MockStore::with_chunks(two_chunks()),
            PipelineParams::default(),
        );

        // Two fresh sessions with identical state and message
        for id in ["s-a", "s-b"] {
            let stream = h.orchestrator.handle(id, "What is the deadline?").await.unwrap();
            stream.collect().await;
        }

        // Nothing cached across calls: both runs guarded, embedded,
        // searched and generated.
        assert_eq!(h.inference.classify_calls.load(Ordering::SeqCst), 4);
        assert_eq!(h.inference.embed_calls.load(Ordering::SeqCst), 2);
        assert_eq!(h.store.search_calls.load(Ordering::SeqCst), 2);
        assert_eq!(h.inference.complete_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn concurrent_requests_on_one_session_serialize_history() {
        let h = harness(
            MockInference::safe(),
            MockStore::empty(),
            PipelineParams::default(),
        );

        let first = h.orchestrator.handle("s-1", "first question").await.unwrap();
        let second = h.orchestrator.handle("s-1", "second question").await.unwrap();
        let (a, b) = tokio::join!(first.collect(), second.collect());
        assert_eq!(a.last(), Some(&StreamEvent::Done));
        assert_eq!(b.last(), Some(&StreamEvent::Done));

        let session = h.sessions.get_or_create("s-1").await;
        let session = session.lock().await;
        // One user+assistant pair per request, in some serialized order
        assert_eq!(session.len(), 4);
        assert_eq!(session.turns()[0].role, Role::User);
        assert_eq!(session.turns()[1].role, Role::Assistant);
        assert_eq!(session.turns()[2].role, Role::User);
        assert_eq!(session.turns()[3].role, Role::Assistant);
        // Pairs are adjacent, never interleaved
        let first_user = &session.turns()[0].text;
        let second_user = &session.turns()[2].text;
        assert_ne!(first_user, second_user);
    }

    #[tokio::test]
    async fn cancellation_releases_the_upstream_call() {
        let h = harness(
            MockInference::hanging(),
            MockStore::empty(),
            PipelineParams::default(),
        );

        let mut stream = h.orchestrator.handle("s-1", "question").await.unwrap();
        // Give the pipeline time to reach the streaming state
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        stream.cancel();

        // Stream terminates without further events
        assert_eq!(stream.next().await, None);

        // Upstream invocation observed the cancellation
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(h.inference.completion_cancelled.load(Ordering::SeqCst));

        let session = h.sessions.get_or_create("s-1").await;
        assert_eq!(session.lock().await.len(), 0);
    }

    #[tokio::test]
    async fn dropping_the_stream_cancels_upstream() {
        let h = harness(
            MockInference::hanging(),
            MockStore::empty(),
            PipelineParams::default(),
        );

        let stream = h.orchestrator.handle("s-1", "question").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        drop(stream);

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(h.inference.completion_cancelled.load(Ordering::SeqCst));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn cancelled_run_never_completes_or_persists_history() {
        // The adapter closes the completion channel when the token fires,
        // so end-of-stream races the cancellation arm of the streaming
        // loop. Whichever side wins, a cancelled run must not emit Done
        // and must not append the partial turn pair.
        for i in 0..300 {
            let h = harness(
                MockInference::closing_on_cancel(),
                MockStore::empty(),
                PipelineParams::default(),
            );
            let id = format!("s-{i}");
            let mut stream = h.orchestrator.handle(&id, "question").await.unwrap();

            // First token confirms the run is mid-stream
            assert!(matches!(stream.next().await, Some(StreamEvent::Token { .. })));
            stream.cancel();

            while let Some(event) = stream.next().await {
                assert!(
                    matches!(event, StreamEvent::Token { .. }),
                    "cancelled stream emitted {event:?}"
                );
            }

            let session = h.sessions.get_or_create(&id).await;
            assert_eq!(
                session.lock().await.len(),
                0,
                "cancelled run persisted history"
            );
        }
    }

    #[tokio::test]
    async fn empty_message_is_rejected_up_front() {
        let h = harness(
            MockInference::safe(),
            MockStore::empty(),
            PipelineParams::default(),
        );

        let result = h.orchestrator.handle("s-1", "   ").await;
        assert!(matches!(result, Err(HandleMessageError::EmptyMessage)));
        assert_eq!(h.inference.classify_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn second_turn_reformulates_against_history() {
        let h = harness(
            MockInference::safe(),
            MockStore::empty(),
            PipelineParams::default(),
        );

        // First turn: empty history, no reformulation call
        let stream = h.orchestrator.handle("s-1", "When does enrollment open?").await.unwrap();
        stream.collect().await;
        assert_eq!(h.inference.complete_calls.load(Ordering::SeqCst), 1);

        // Second turn: history is non-empty, so reformulation issues one
        // extra completion call before generation.
        let stream = h.orchestrator.handle("s-1", "And when does it close?").await.unwrap();
        stream.collect().await;
        assert_eq!(h.inference.complete_calls.load(Ordering::SeqCst), 3);
    }

    struct RecordingLogger {
        events: StdMutex<Vec<&'static str>>,
    }

    impl ConversationLogger for RecordingLogger {
        fn log(&self, event: ConversationEvent) {
            self.events.lock().unwrap().push(event.event_type);
        }
    }

    #[tokio::test]
    async fn attached_logger_records_each_stage_event() {
        let logger = Arc::new(RecordingLogger {
            events: StdMutex::new(Vec::new()),
        });
        let orchestrator = AnswerOrchestrator::with_logger(
            Arc::new(MockInference::safe()),
            Arc::new(MockStore::with_chunks(two_chunks())),
            Arc::new(TestSessionStore::new()),
            PipelineParams::default(),
            logger.clone(),
        );

        let stream = orchestrator
            .handle("s-1", "What is the deadline?")
            .await
            .unwrap();
        stream.collect().await;

        let events = logger.events.lock().unwrap().clone();
        assert_eq!(
            events,
            vec![
                "guardrail_verdict",
                "query_reformulated",
                "context_retrieved",
                "answer_completed",
            ]
        );
    }
}
