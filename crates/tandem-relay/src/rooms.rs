use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

/// Outbound text frames for one connection.
pub type FrameSender = mpsc::UnboundedSender<String>;

struct Member {
    display_name: String,
    tx: FrameSender,
}

/// Room membership for every connected client.
///
/// A connection is in at most one room at a time. Frames are queued on the
/// member's channel and written by its connection task.
#[derive(Clone)]
pub struct Rooms {
    inner: Arc<RoomsInner>,
}

struct RoomsInner {
    /// room_id -> (conn_id -> member)
    rooms: RwLock<HashMap<String, HashMap<Uuid, Member>>>,

    /// conn_id -> room_id
    memberships: RwLock<HashMap<Uuid, String>>,
}

impl Rooms {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RoomsInner {
                rooms: RwLock::new(HashMap::new()),
                memberships: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Add a connection to `room_id`, leaving any previous room first.
    ///
    /// Returns the display names of the members already present, and the
    /// previous room with the display name used there, if the connection moved.
    pub async fn join(
        &self,
        room_id: &str,
        conn_id: Uuid,
        display_name: &str,
        tx: FrameSender,
    ) -> (Vec<String>, Option<(String, String)>) {
        let previous = self.leave(conn_id).await;

        let mut rooms = self.inner.rooms.write().await;
        let room = rooms.entry(room_id.to_string()).or_default();
        let existing = room.values().map(|m| m.display_name.clone()).collect();
        room.insert(
            conn_id,
            Member {
                display_name: display_name.to_string(),
                tx,
            },
        );
        self.inner
            .memberships
            .write()
            .await
            .insert(conn_id, room_id.to_string());

        (existing, previous)
    }

    /// Remove a connection from its room. Returns (room_id, display_name) if it was in one.
    pub async fn leave(&self, conn_id: Uuid) -> Option<(String, String)> {
        let room_id = self.inner.memberships.write().await.remove(&conn_id)?;

        let mut rooms = self.inner.rooms.write().await;
        let room = rooms.get_mut(&room_id)?;
        let member = room.remove(&conn_id)?;
        if room.is_empty() {
            rooms.remove(&room_id);
        }
        Some((room_id, member.display_name))
    }

    /// The room a connection is currently in.
    pub async fn room_of(&self, conn_id: Uuid) -> Option<String> {
        self.inner.memberships.read().await.get(&conn_id).cloned()
    }

    /// Queue `text` for every member of `room_id` except `from`.
    /// Returns the number of recipients.
    pub async fn send_to_others(&self, room_id: &str, from: Uuid, text: &str) -> usize {
        let rooms = self.inner.rooms.read().await;
        let Some(room) = rooms.get(room_id) else {
            return 0;
        };
        let mut sent = 0;
        for (&conn_id, member) in room.iter() {
            if conn_id != from && member.tx.send(text.to_string()).is_ok() {
                sent += 1;
            }
        }
        sent
    }

    /// Display names currently in `room_id`.
    pub async fn members(&self, room_id: &str) -> Vec<String> {
        self.inner
            .rooms
            .read()
            .await
            .get(room_id)
            .map(|room| room.values().map(|m| m.display_name.clone()).collect())
            .unwrap_or_default()
    }

    pub async fn room_count(&self) -> usize {
        self.inner.rooms.read().await.len()
    }
}

impl Default for Rooms {
    fn default() -> Self {
        Self::new()
    }
}
