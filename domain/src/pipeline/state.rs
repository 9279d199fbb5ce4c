//! Pipeline state machine for one message.
//!
//! States advance strictly in order; the only non-obvious edge is
//! `Generating -> Streaming`, which is transparent because token
//! production begins before the full answer is known. `Aborted` is
//! terminal and reachable from `Guarding` (refusal) or from any
//! non-terminal state on unrecoverable error.

use serde::{Deserialize, Serialize};

/// State of a single pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    /// Message accepted, nothing started yet
    Received,
    /// Running the safety and topic classifiers
    Guarding,
    /// Rewriting the message into a standalone query
    Reformulating,
    /// Embedding the query and searching the knowledge store
    Retrieving,
    /// Building the final prompt and invoking streamed generation
    Generating,
    /// Forwarding tokens to the caller
    Streaming,
    /// Stream completed, history appended
    Done,
    /// Refused by a guardrail, cancelled, or failed unrecoverably
    Aborted,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Received => "received",
            PipelineState::Guarding => "guarding",
            PipelineState::Reformulating => "reformulating",
            PipelineState::Retrieving => "retrieving",
            PipelineState::Generating => "generating",
            PipelineState::Streaming => "streaming",
            PipelineState::Done => "done",
            PipelineState::Aborted => "aborted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Aborted)
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn can_transition_to(&self, next: PipelineState) -> bool {
        use PipelineState::*;
        if self.is_terminal() {
            return false;
        }
        // Any live state may abort.
        if next == Aborted {
            return true;
        }
        matches!(
            (self, next),
            (Received, Guarding)
                | (Guarding, Reformulating)
                | (Reformulating, Retrieving)
                | (Retrieving, Generating)
                | (Generating, Streaming)
                | (Streaming, Done)
        )
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
