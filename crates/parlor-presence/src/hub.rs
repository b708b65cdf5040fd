use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast};
use tracing::{debug, info};
use uuid::Uuid;

use parlor_types::PresencePayload;
use parlor_types::events::PresenceEvent;

/// Payloads above this size are refused; presence is meant to be tiny.
const MAX_PAYLOAD_BYTES: usize = 4 * 1024;

/// Live presence rooms. Nothing here is persisted: when a connection leaves,
/// its entry is simply gone.
#[derive(Clone)]
pub struct PresenceHub {
    inner: Arc<HubInner>,
}

struct HubInner {
    /// All presence events, every room
    broadcast_tx: broadcast::Sender<PresenceEvent>,

    /// room -> (conn_id -> published payload, None until first publish)
    rooms: RwLock<HashMap<String, HashMap<Uuid, Option<PresencePayload>>>>,
}

impl Default for PresenceHub {
    fn default() -> Self {
        Self::new()
    }
}

impl PresenceHub {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(HubInner {
                broadcast_tx,
                rooms: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to presence events across all rooms.
    pub fn subscribe(&self) -> broadcast::Receiver<PresenceEvent> {
        self.inner.broadcast_tx.subscribe()
    }

    fn broadcast(&self, event: PresenceEvent) {
        let _ = self.inner.broadcast_tx.send(event);
    }

    /// Open a connection in `room`. The handle is the only way to publish
    /// into or leave that connection's slot.
    pub async fn join(&self, room: impl Into<String>) -> PresenceHandle {
        let room = room.into();
        let conn_id = Uuid::new_v4();

        self.inner
            .rooms
            .write()
            .await
            .entry(room.clone())
            .or_default()
            .insert(conn_id, None);

        info!("Connection {} joined presence room {}", conn_id, room);
        self.broadcast(PresenceEvent::Joined {
            room: room.clone(),
            conn_id,
        });

        PresenceHandle {
            hub: self.clone(),
            room,
            conn_id,
        }
    }

    /// Number of open connections in a room, published or not.
    pub async fn connection_count(&self, room: &str) -> usize {
        self.inner
            .rooms
            .read()
            .await
            .get(room)
            .map_or(0, HashMap::len)
    }

    async fn set_payload(&self, room: &str, conn_id: Uuid, payload: PresencePayload) -> bool {
        let mut rooms = self.inner.rooms.write().await;
        let Some(slot) = rooms.get_mut(room).and_then(|conns| conns.get_mut(&conn_id)) else {
            // Connection already left; late publishes are dropped
            return false;
        };
        *slot = Some(payload);
        true
    }

    async fn remove(&self, room: &str, conn_id: Uuid) -> bool {
        let mut rooms = self.inner.rooms.write().await;
        let Some(conns) = rooms.get_mut(room) else {
            return false;
        };
        let removed = conns.remove(&conn_id).is_some();
        if conns.is_empty() {
            rooms.remove(room);
        }
        removed
    }

    async fn snapshot(&self, room: &str, exclude: Option<Uuid>) -> HashMap<Uuid, PresencePayload> {
        self.inner
            .rooms
            .read()
            .await
            .get(room)
            .map(|conns| {
                conns
                    .iter()
                    .filter(|(id, _)| Some(**id) != exclude)
                    .filter_map(|(id, payload)| payload.clone().map(|p| (*id, p)))
                    .collect()
            })
            .unwrap_or_default()
    }

    async fn payload_of(&self, room: &str, conn_id: Uuid) -> Option<PresencePayload> {
        self.inner
            .rooms
            .read()
            .await
            .get(room)
            .and_then(|conns| conns.get(&conn_id).cloned().flatten())
    }
}

/// One live connection's membership in a presence room.
#[derive(Clone)]
pub struct PresenceHandle {
    hub: PresenceHub,
    room: String,
    conn_id: Uuid,
}

impl PresenceHandle {
    pub fn room(&self) -> &str {
        &self.room
    }

    pub fn conn_id(&self) -> Uuid {
        self.conn_id
    }

    /// Fire-and-forget publish. Replaces this connection's previous payload,
    /// so publishing the same payload twice leaves a single entry.
    pub async fn publish(&self, payload: PresencePayload) {
        match serde_json::to_vec(&payload) {
            Ok(bytes) if bytes.len() > MAX_PAYLOAD_BYTES => {
                debug!(
                    "Dropping {}-byte presence payload from {} in {}",
                    bytes.len(),
                    self.conn_id,
                    self.room
                );
                return;
            }
            Err(e) => {
                debug!("Unserializable presence payload from {}: {}", self.conn_id, e);
                return;
            }
            Ok(_) => {}
        }

        if self.hub.set_payload(&self.room, self.conn_id, payload.clone()).await {
            self.hub.broadcast(PresenceEvent::Updated {
                room: self.room.clone(),
                conn_id: self.conn_id,
                payload,
            });
        }
    }

    /// Payloads published by every other connection in the room.
    pub async fn peers(&self) -> HashMap<Uuid, PresencePayload> {
        self.hub.snapshot(&self.room, Some(self.conn_id)).await
    }

    /// This connection's own published payload.
    pub async fn me(&self) -> Option<PresencePayload> {
        self.hub.payload_of(&self.room, self.conn_id).await
    }

    pub async fn leave(self) {
        if self.hub.remove(&self.room, self.conn_id).await {
            info!("Connection {} left presence room {}", self.conn_id, self.room);
            self.hub.broadcast(PresenceEvent::Left {
                room: self.room,
                conn_id: self.conn_id,
            });
        }
    }
}
