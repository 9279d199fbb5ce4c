//! Session store port
//!
//! Hands out per-session handles to the orchestrator. The handle is an
//! `Arc<tokio::Mutex<Session>>`: holding the lock for the duration of one
//! pipeline run is what serializes concurrent requests on the same session,
//! so history appends can never interleave. Requests on different sessions
//! take different locks and proceed in parallel.
//!
//! Session eviction/expiry belongs to an external lifecycle policy; the
//! store only needs `get_or_create` plus a removal hook for that policy.

use async_trait::async_trait;
use ragline_domain::Session;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Arena of live sessions indexed by session id.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Fetch the session handle for `session_id`, creating an empty
    /// session on first use.
    async fn get_or_create(&self, session_id: &str) -> Arc<Mutex<Session>>;

    /// Remove a session from the arena. Called by the external lifecycle
    /// policy; returns true if the session existed.
    async fn remove(&self, session_id: &str) -> bool;
}
