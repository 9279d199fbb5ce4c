//! Classifier response parsing for the guardrail stage.
//!
//! These functions extract structured verdicts from free-form classifier
//! responses. They are pure domain logic — no I/O, just text pattern
//! matching. Both parsers are fail-closed: anything that does not match a
//! recognized format returns `None`, and the caller treats `None` as a
//! refusal, never as a pass.
//!
//! # Formats
//!
//! | Function | Expected response |
//! |----------|-------------------|
//! | [`parse_safety_response`] | Two lines: `safe` or `unsafe`, then a brief explanation |
//! | [`parse_topic_response`] | A single word: `yes` (on topic) or `no` |

/// Decision extracted from the safety classifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SafetyDecision {
    Safe,
    /// Unsafe, with the classifier's explanation line.
    Unsafe(String),
}

/// Parse the two-line safety classifier response.
///
/// Line 1 must be the single word `safe` or `unsafe` (case-insensitive,
/// trailing punctuation tolerated); line 2 is the explanation. A response
/// with any other shape yields `None`.
pub fn parse_safety_response(response: &str) -> Option<SafetyDecision> {
    let lines: Vec<&str> = response
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();

    let (first, rest) = lines.split_first()?;
    let word = first
        .trim_end_matches(['.', '!', ':'])
        .to_ascii_lowercase();

    match word.as_str() {
        "safe" => Some(SafetyDecision::Safe),
        "unsafe" => {
            let explanation = rest.join(" ");
            if explanation.is_empty() {
                // An unsafe verdict without a reason is still unsafe.
                Some(SafetyDecision::Unsafe("policy violation".to_string()))
            } else {
                Some(SafetyDecision::Unsafe(explanation))
            }
        }
        _ => None,
    }
}

/// Parse the single-word topic classifier response.
///
/// `yes` means the message is within the assistant's subject area.
/// Returns `Some(true)` / `Some(false)` for a clean yes/no, `None` for
/// anything else.
pub fn parse_topic_response(response: &str) -> Option<bool> {
    let word = response
        .trim()
        .trim_end_matches(['.', '!'])
        .to_ascii_lowercase();

    match word.as_str() {
        "yes" => Some(true),
        "no" => Some(false),
        _ => None,
    }
}
