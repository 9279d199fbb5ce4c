//! Domain error types

use thiserror::Error;

/// Failure taxonomy for a single pipeline run.
///
/// `GuardrailUnavailable` surfaces to the caller as an opaque refusal and
/// `GenerationFailed` as an error event; the recoverable variants are
/// absorbed by the orchestrator's fallback policies, and `Cancelled`
/// terminates the stream without emitting anything.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// A guardrail classifier could not produce a verdict. Fail-closed:
    /// the pipeline aborts with a refusal.
    #[error("Guardrail unavailable: {0}")]
    GuardrailUnavailable(String),

    /// Query reformulation failed. Recovered by retrieving with the raw
    /// message instead.
    #[error("Reformulation failed: {0}")]
    ReformulationFailed(String),

    /// Embedding or store lookup failed. Recovered by generating with
    /// empty context, unless configured to abort.
    #[error("Retrieval failed: {0}")]
    RetrievalFailed(String),

    /// Streamed generation failed. Fatal for the current request.
    #[error("Generation failed: {0}")]
    GenerationFailed(String),

    /// The caller cancelled the stream.
    #[error("Request cancelled")]
    Cancelled,
}

impl PipelineError {
    /// Check if this error represents a cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PipelineError::Cancelled)
    }

    /// Recoverable errors never surface as pipeline-level failures.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PipelineError::ReformulationFailed(_) | PipelineError::RetrievalFailed(_)
        )
    }
}
