use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::events::EntityKind;
use crate::models::{Address, Channel, Message, Room, Server, ServerMember};

// -- Queries --

/// Indexed fields a filter may reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Id,
    ServerId,
    ChannelId,
    RoomId,
    UserId,
    Address,
    Name,
}

/// Declarative filter for a fetch or a live subscription. Doubles as the
/// subscription scope key, hence `Eq + Hash`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Filter {
    All,
    Eq(Field, String),
    In(Field, Vec<String>),
}

impl Filter {
    pub fn eq(field: Field, value: impl ToString) -> Self {
        Self::Eq(field, value.to_string())
    }

    pub fn is_in<I, V>(field: Field, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: ToString,
    {
        Self::In(field, values.into_iter().map(|v| v.to_string()).collect())
    }

    /// True when the filter can never match a row.
    pub fn is_empty_set(&self) -> bool {
        matches!(self, Self::In(_, values) if values.is_empty())
    }
}

// -- Transactions --

/// One keyed write. A transaction is a `Vec<TxOp>` applied atomically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TxOp {
    /// Insert, or merge into the row with the same id
    PutServer(Server),
    PutChannel(Channel),
    PutRoom(Room),
    PutMessage(Message),
    PutMember(ServerMember),

    /// Lookup-based upsert on the unique `address`. `id` is only used when
    /// no user with that address exists yet.
    UpsertUserByAddress {
        id: Uuid,
        address: Address,
        owner: Address,
        username: String,
    },

    Delete { entity: EntityKind, id: Uuid },
}

impl TxOp {
    pub fn entity(&self) -> EntityKind {
        match self {
            Self::PutServer(_) => EntityKind::Servers,
            Self::PutChannel(_) => EntityKind::Channels,
            Self::PutRoom(_) => EntityKind::Rooms,
            Self::PutMessage(_) => EntityKind::Messages,
            Self::PutMember(_) => EntityKind::ServerMembers,
            Self::UpsertUserByAddress { .. } => EntityKind::Users,
            Self::Delete { entity, .. } => *entity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_scope_keys_compare_by_value() {
        let a = Filter::eq(Field::ChannelId, Uuid::nil());
        let b = Filter::Eq(Field::ChannelId, Uuid::nil().to_string());
        assert_eq!(a, b);
        assert_ne!(a, Filter::eq(Field::ServerId, Uuid::nil()));
    }

    #[test]
    fn test_empty_in_filter_matches_nothing() {
        let ids: Vec<Uuid> = vec![];
        assert!(Filter::is_in(Field::Id, ids).is_empty_set());
        assert!(!Filter::All.is_empty_set());
    }
}
