//! In-memory session arena.
//!
//! Sessions live in a `HashMap` keyed by session id; each entry is an
//! `Arc<tokio::Mutex<Session>>` so the orchestrator can hold one
//! session's lock across a pipeline run without blocking other sessions.
//! Expiry/eviction is driven externally through [`SessionStore::remove`].

use async_trait::async_trait;
use ragline_application::ports::session_store::SessionStore;
use ragline_domain::Session;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use tokio::sync::Mutex;
use tracing::debug;

/// [`SessionStore`] backed by an in-process map.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: StdMutex<HashMap<String, Arc<Mutex<Session>>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().unwrap().is_empty()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get_or_create(&self, session_id: &str) -> Arc<Mutex<Session>> {
        let mut sessions = self.sessions.lock().unwrap();
        sessions
            .entry(session_id.to_string())
            .or_insert_with(|| {
                debug!("Creating session {session_id}");
                Arc::new(Mutex::new(Session::new(session_id)))
            })
            .clone()
    }

    async fn remove(&self, session_id: &str) -> bool {
        self.sessions.lock().unwrap().remove(session_id).is_some()
    }
}
