//! Port for structured conversation logging.
//!
//! Defines the [`ConversationLogger`] trait for recording pipeline events
//! (guardrail verdicts, reformulations, retrieval results, completed
//! answers) to a structured log.
//!
//! This is separate from `tracing`-based operation logs: tracing handles
//! human-readable diagnostic messages, while this port captures the
//! pipeline's decisions in a machine-readable format (JSONL).

use serde_json::Value;

/// A structured pipeline event for logging.
pub struct ConversationEvent {
    /// Event type identifier (e.g., "guardrail_verdict", "answer_completed").
    pub event_type: &'static str,
    /// JSON payload with event-specific data.
    pub payload: Value,
}

impl ConversationEvent {
    pub fn new(event_type: &'static str, payload: Value) -> Self {
        Self {
            event_type,
            payload,
        }
    }
}

/// Port for logging pipeline events to a structured log.
///
/// Implementations write each event as a single record (e.g., one JSONL
/// line). The `log` method is intentionally synchronous and non-fallible;
/// logging failures are silently ignored rather than disrupting a request.
pub trait ConversationLogger: Send + Sync {
    /// Record a pipeline event.
    fn log(&self, event: ConversationEvent);
}

/// No-op implementation for tests and when logging is disabled.
pub struct NoConversationLogger;

impl ConversationLogger for NoConversationLogger {
    fn log(&self, _event: ConversationEvent) {}
}
