//! Knowledge store adapters

pub mod http;
pub mod memory;

pub use http::HttpKnowledgeStore;
pub use memory::InMemoryKnowledgeStore;
