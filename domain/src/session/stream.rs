//! Outward event stream for a pipeline run.
//!
//! [`StreamEvent`] is the unit the caller (web/API layer) consumes while an
//! answer is generated. The sequence for one request is finite and
//! single-consumer: zero or more `Token` events followed by exactly one
//! terminal event, or a single `Refusal` followed by `Done` when a
//! guardrail rejects the message.

use serde::{Deserialize, Serialize};

/// An event emitted by the pipeline while handling one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StreamEvent {
    /// A generated answer fragment, forwarded in arrival order.
    Token { content: String },
    /// A user-facing refusal produced when a guardrail rejects the message.
    /// Emitted instead of a token stream, never interleaved with one.
    Refusal { message: String },
    /// The stream completed normally. Always the last event on success.
    Done,
    /// The stream terminated on an unrecoverable error. Tokens already
    /// emitted are not retracted.
    Error { message: String },
}

impl StreamEvent {
    pub fn token(content: impl Into<String>) -> Self {
        StreamEvent::Token {
            content: content.into(),
        }
    }

    pub fn refusal(message: impl Into<String>) -> Self {
        StreamEvent::Refusal {
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        StreamEvent::Error {
            message: message.into(),
        }
    }

    /// Returns the token content if this is a `Token` event.
    pub fn text(&self) -> Option<&str> {
        match self {
            StreamEvent::Token { content } => Some(content),
            _ => None,
        }
    }

    /// Returns true if this event ends the sequence.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done | StreamEvent::Error { .. })
    }
}
