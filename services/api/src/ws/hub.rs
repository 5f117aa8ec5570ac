//! In-process rooms for candidates connecting over a WebSocket.
//!
//! Each room is a loopback transport: the room's agent joins it like any other
//! transport, and the candidate's socket drives its far end.

use interview_core::transport::loopback::LoopbackTransport;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Clone, Default)]
pub struct RoomHub {
    rooms: Arc<RwLock<HashMap<String, LoopbackTransport>>>,
}

impl RoomHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a new room. Returns `None` if the room already exists.
    pub async fn open(&self, room: &str) -> Option<LoopbackTransport> {
        let mut rooms = self.rooms.write().await;
        if rooms.contains_key(room) {
            return None;
        }
        let transport = LoopbackTransport::new();
        rooms.insert(room.to_string(), transport.clone());
        debug!(%room, "Room opened");
        Some(transport)
    }

    pub async fn get(&self, room: &str) -> Option<LoopbackTransport> {
        self.rooms.read().await.get(room).cloned()
    }

    /// Removes the room. A candidate still connected is dropped as well.
    pub async fn close(&self, room: &str) -> bool {
        let removed = self.rooms.write().await.remove(room);
        match removed {
            Some(transport) => {
                transport.drop_connection("room closed").await;
                debug!(%room, "Room closed");
                true
            }
            None => false,
        }
    }
}
