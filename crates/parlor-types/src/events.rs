use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::PresencePayload;

/// Entity collections held by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Servers,
    Channels,
    Rooms,
    Messages,
    ServerMembers,
    Users,
}

/// Emitted by the store after a transaction commits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreChange {
    /// Monotonic per-store transaction counter.
    pub seq: u64,
    pub entities: Vec<EntityKind>,
}

impl StoreChange {
    pub fn touches(&self, kind: EntityKind) -> bool {
        self.entities.contains(&kind)
    }
}

/// Events fanned out by the presence hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PresenceEvent {
    /// A connection joined a room (no payload published yet)
    Joined { room: String, conn_id: Uuid },

    /// A connection published or replaced its payload
    Updated {
        room: String,
        conn_id: Uuid,
        payload: PresencePayload,
    },

    /// A connection left, or was dropped from, a room
    Left { room: String, conn_id: Uuid },
}

impl PresenceEvent {
    /// Every presence event is scoped to exactly one room.
    pub fn room(&self) -> &str {
        match self {
            Self::Joined { room, .. } | Self::Updated { room, .. } | Self::Left { room, .. } => room,
        }
    }
}
