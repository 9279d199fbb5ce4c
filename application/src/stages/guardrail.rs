//! Guardrail stage.
//!
//! Runs the safety and topic-relevance classifiers against the raw user
//! message before anything else touches it. The two classifications are
//! independent reads, so they are issued concurrently and joined — latency
//! is bounded by the slower of the two, not their sum.
//!
//! The stage is fail-closed end to end: an unparseable response yields a
//! non-safe verdict, and a classifier timeout or transport error yields
//! a guardrail-unavailable error that the orchestrator turns into a
//! refusal. A guardrail failure must never allow an unchecked message
//! through.

use crate::config::PipelineParams;
use crate::ports::inference::InferenceClient;
use crate::stages::support::call_with_timeout_retry;
use ragline_domain::{
    ConversationTurn, GuardrailVerdict, PipelineError, PromptTemplate, SafetyDecision,
    parse_safety_response, parse_topic_response,
};
use std::sync::Arc;
use tracing::{debug, warn};

/// Safety + topic gate over incoming messages.
pub struct GuardrailStage {
    inference: Arc<dyn InferenceClient>,
    params: PipelineParams,
}

impl GuardrailStage {
    pub fn new(inference: Arc<dyn InferenceClient>, params: PipelineParams) -> Self {
        Self { inference, params }
    }

    /// Classify `message` (with its conversation) and produce a verdict.
    ///
    /// A classifier that cannot be reached yields
    /// [`PipelineError::GuardrailUnavailable`]; the orchestrator refuses
    /// the message on that error exactly as it would on an unsafe
    /// verdict. An unparseable response is a verdict, not an error, and
    /// fails closed too.
    pub async fn check(
        &self,
        message: &str,
        history: &[ConversationTurn],
    ) -> Result<GuardrailVerdict, PipelineError> {
        let safety_prompt = PromptTemplate::safety_check(message, history);
        let topic_prompt = PromptTemplate::topic_check(message, history);

        let safety_call = call_with_timeout_retry(
            "safety classifier",
            self.params.classify_timeout,
            || self.inference.classify(&safety_prompt),
        );
        let topic_call = call_with_timeout_retry(
            "topic classifier",
            self.params.classify_timeout,
            || self.inference.classify(&topic_prompt),
        );

        // Independent reads, joined before the decision.
        let (safety_response, topic_response) = tokio::join!(safety_call, topic_call);

        let safety_response = safety_response.map_err(|e| {
            warn!("Safety classifier unavailable: {e}");
            PipelineError::GuardrailUnavailable(e)
        })?;
        let topic_response = topic_response.map_err(|e| {
            warn!("Topic classifier unavailable: {e}");
            PipelineError::GuardrailUnavailable(e)
        })?;

        match parse_safety_response(&safety_response) {
            Some(SafetyDecision::Unsafe(reason)) => {
                debug!("Safety classifier rejected message: {reason}");
                return Ok(GuardrailVerdict::unsafe_with(reason));
            }
            Some(SafetyDecision::Safe) => {}
            None => {
                warn!("Unrecognized safety classifier response, failing closed");
                return Ok(GuardrailVerdict::unsafe_with("unrecognized safety verdict"));
            }
        }

        Ok(match parse_topic_response(&topic_response) {
            Some(true) => GuardrailVerdict::safe(),
            Some(false) => {
                debug!("Topic classifier rejected message as off topic");
                GuardrailVerdict::off_topic()
            }
            None => {
                warn!("Unrecognized topic classifier response, failing closed");
                GuardrailVerdict::unsafe_with("unrecognized topic verdict")
            }
        })
    }
}
