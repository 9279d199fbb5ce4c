//! Application layer for ragline
//!
//! This crate contains the pipeline stages, port definitions, and the
//! orchestrator use case. It depends only on the domain layer.

pub mod config;
pub mod ports;
pub mod stages;
pub mod use_cases;

// Re-export commonly used types
pub use config::PipelineParams;
pub use ports::{
    conversation_logger::{ConversationEvent, ConversationLogger, NoConversationLogger},
    inference::{CompletionEvent, CompletionStream, InferenceClient, InferenceError},
    knowledge_store::{KnowledgeStore, StoreError},
    session_store::SessionStore,
};
pub use stages::{
    guardrail::GuardrailStage, reformulate::QueryReformulator, retrieve::ContextRetriever,
};
pub use use_cases::handle_message::{AnswerOrchestrator, AnswerStream, HandleMessageError};
