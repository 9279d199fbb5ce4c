//! Infrastructure layer for ragline
//!
//! This crate contains adapters that implement the ports defined
//! in the application layer, including configuration file loading.

pub mod config;
pub mod inference;
pub mod logging;
pub mod session;
pub mod store;

// Re-export commonly used types
pub use config::{ConfigLoader, FileConfig, FileInferenceConfig, FileRetrievalConfig};
pub use inference::HttpInferenceClient;
pub use logging::JsonlConversationLogger;
pub use session::InMemorySessionStore;
pub use store::{HttpKnowledgeStore, InMemoryKnowledgeStore};
