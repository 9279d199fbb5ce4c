//! Domain layer for ragline
//!
//! This crate contains the core entities and pure logic of the
//! retrieval-augmented chat pipeline. It has no dependencies on
//! infrastructure or transport concerns.
//!
//! # Core Concepts
//!
//! ## Pipeline
//!
//! Every incoming chat message flows through a fixed sequence of stages:
//!
//! - **Guarding**: safety and topic-relevance classification
//! - **Reformulating**: rewriting the message into a standalone query
//! - **Retrieving**: fetching supporting chunks from the knowledge store
//! - **Generating/Streaming**: streamed answer generation
//!
//! ## Fail-closed guardrails
//!
//! A classifier response that cannot be parsed into a recognized verdict
//! is always treated as unsafe, never as safe.

pub mod core;
pub mod guardrail;
pub mod pipeline;
pub mod prompt;
pub mod retrieval;
pub mod session;
pub mod util;

// Re-export commonly used types
pub use crate::core::error::PipelineError;
pub use guardrail::{
    parsing::{SafetyDecision, parse_safety_response, parse_topic_response},
    verdict::{GuardrailVerdict, VerdictKind},
};
pub use pipeline::state::PipelineState;
pub use prompt::templates::PromptTemplate;
pub use retrieval::chunk::{RetrievedChunk, sort_by_relevance};
pub use session::{
    entities::{ConversationTurn, Role, Session},
    stream::StreamEvent,
};
pub use util::truncate_str;
