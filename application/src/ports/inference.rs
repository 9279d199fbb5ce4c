//! Inference client port
//!
//! Defines the interface for communicating with hosted model services.
//! The pipeline needs exactly three capabilities: classification-style
//! prompts, text embedding, and a cancellable streaming completion.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Errors that can occur during inference calls
#[derive(Error, Debug, Clone)]
pub enum InferenceError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Timeout")]
    Timeout,

    #[error("Request cancelled")]
    Cancelled,
}

impl InferenceError {
    /// Timeouts and transport errors are worth a single bounded retry for
    /// idempotent read-only calls. Cancellation and malformed payloads
    /// are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            InferenceError::Timeout | InferenceError::ConnectionError(_)
        )
    }
}

/// An event produced by the upstream streaming completion call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionEvent {
    /// A generated token (or token batch, depending on the backend).
    Token(String),
    /// Upstream finished the answer. Terminal.
    Done,
    /// Upstream failed mid-stream. Terminal.
    Error(String),
}

/// Handle for receiving completion events from a streaming generation call.
///
/// Wraps an `mpsc::Receiver<CompletionEvent>` fed by the adapter's reader
/// task. The sequence is finite and single-consumer: tokens in arrival
/// order, then exactly one `Done` or `Error`.
pub struct CompletionStream {
    pub receiver: mpsc::Receiver<CompletionEvent>,
}

impl CompletionStream {
    pub fn new(receiver: mpsc::Receiver<CompletionEvent>) -> Self {
        Self { receiver }
    }

    /// Receive the next event, or `None` once the channel is closed.
    pub async fn recv(&mut self) -> Option<CompletionEvent> {
        self.receiver.recv().await
    }

    /// Consume the stream and collect all tokens into a single string.
    ///
    /// Useful for callers that want streaming at the transport level but
    /// only need the final text (e.g. reformulation).
    pub async fn collect_text(mut self) -> Result<String, InferenceError> {
        let mut full_text = String::new();
        while let Some(event) = self.receiver.recv().await {
            match event {
                CompletionEvent::Token(chunk) => full_text.push_str(&chunk),
                CompletionEvent::Done => return Ok(full_text),
                CompletionEvent::Error(e) => {
                    return Err(InferenceError::RequestFailed(e));
                }
            }
        }
        // Channel closed without Done — return what we have
        Ok(full_text)
    }
}

/// Uniform interface to a hosted model service.
///
/// Implementations (adapters) live in the infrastructure layer. Every
/// method is a suspension point; the adapter owns per-request transport
/// timeouts, while the stages add their own call-class timeouts on top.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    /// Run a classification-style prompt and return the raw model output.
    async fn classify(&self, prompt: &str) -> Result<String, InferenceError>;

    /// Embed a text into a vector.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, InferenceError>;

    /// Start a streaming completion for `prompt`.
    ///
    /// Cancelling `cancel` must release the upstream model invocation, not
    /// just stop reading from it.
    async fn complete_streaming(
        &self,
        prompt: &str,
        cancel: CancellationToken,
    ) -> Result<CompletionStream, InferenceError>;
}
