//! Process-wide map of live sessions, keyed by room.

use crate::orchestrator::TurnOrchestrator;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

/// An orchestrator together with the supervisor task keeping it connected.
pub struct SessionEntry {
    pub orchestrator: TurnOrchestrator,
    pub supervisor: Option<JoinHandle<()>>,
}

#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<String, SessionEntry>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a session. Returns false, leaving the registry unchanged, if
    /// the room is taken.
    pub async fn insert(&self, room: &str, entry: SessionEntry) -> bool {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(room) {
            return false;
        }
        sessions.insert(room.to_string(), entry);
        true
    }

    pub async fn get(&self, room: &str) -> Option<TurnOrchestrator> {
        self.sessions
            .read()
            .await
            .get(room)
            .map(|entry| entry.orchestrator.clone())
    }

    pub async fn contains(&self, room: &str) -> bool {
        self.sessions.read().await.contains_key(room)
    }

    pub async fn remove(&self, room: &str) -> Option<SessionEntry> {
        self.sessions.write().await.remove(room)
    }

    pub async fn rooms(&self) -> Vec<String> {
        let mut rooms: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        rooms.sort();
        rooms
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Removes every session, returning them for teardown.
    pub async fn drain(&self) -> Vec<(String, SessionEntry)> {
        self.sessions.write().await.drain().collect()
    }
}
