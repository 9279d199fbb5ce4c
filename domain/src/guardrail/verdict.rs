//! Guardrail verdict value objects

use serde::{Deserialize, Serialize};

/// Outcome of the guardrail stage for one incoming message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictKind {
    Safe,
    Unsafe,
    OffTopic,
}

/// A guardrail decision with an optional explanation.
///
/// Produced once per incoming message and consumed only by the orchestrator
/// to decide continue-vs-abort. No generation call is made unless the
/// verdict is [`VerdictKind::Safe`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardrailVerdict {
    pub kind: VerdictKind,
    pub explanation: Option<String>,
}

impl GuardrailVerdict {
    pub fn safe() -> Self {
        Self {
            kind: VerdictKind::Safe,
            explanation: None,
        }
    }

    pub fn unsafe_with(explanation: impl Into<String>) -> Self {
        Self {
            kind: VerdictKind::Unsafe,
            explanation: Some(explanation.into()),
        }
    }

    pub fn off_topic() -> Self {
        Self {
            kind: VerdictKind::OffTopic,
            explanation: None,
        }
    }

    pub fn allows_generation(&self) -> bool {
        self.kind == VerdictKind::Safe
    }
}
