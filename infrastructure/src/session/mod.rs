//! Session store adapters

pub mod memory;

pub use memory::InMemorySessionStore;
