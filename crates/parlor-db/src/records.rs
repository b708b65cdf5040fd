//! Row mapping between SQLite and the `parlor-types` entities.
//!
//! Ids are stored as hyphenated TEXT, addresses in canonical form, and
//! timestamps as unix milliseconds.

use chrono::{DateTime, Utc};
use rusqlite::Row;
use rusqlite::types::Type;
use uuid::Uuid;

use parlor_types::api::Field;
use parlor_types::events::EntityKind;
use parlor_types::{Address, Channel, Message, MessageScope, Room, Server, ServerMember, User};

/// An entity the store can fetch with a `Filter`.
pub trait Record: Sized + Send + 'static {
    const KIND: EntityKind;

    /// `SELECT ... FROM ...` without a WHERE clause.
    const SELECT: &'static str;

    /// Column backing a filter field, if the field is indexed on this entity.
    fn column(field: Field) -> Option<&'static str>;

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;
}

pub fn table_name(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Servers => "servers",
        EntityKind::Channels => "channels",
        EntityKind::Rooms => "rooms",
        EntityKind::Messages => "messages",
        EntityKind::ServerMembers => "server_members",
        EntityKind::Users => "users",
    }
}

/// Collections whose rows disappear along with a deleted row of `kind`.
pub fn cascades(kind: EntityKind) -> &'static [EntityKind] {
    match kind {
        EntityKind::Servers => &[
            EntityKind::Channels,
            EntityKind::Messages,
            EntityKind::ServerMembers,
        ],
        EntityKind::Channels | EntityKind::Rooms => &[EntityKind::Messages],
        EntityKind::Users => &[EntityKind::ServerMembers],
        EntityKind::Messages | EntityKind::ServerMembers => &[],
    }
}

pub(crate) fn millis(ts: &DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn conversion_err(idx: usize, ty: Type, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, ty, msg.into())
}

fn uuid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e| conversion_err(idx, Type::Text, format!("corrupt uuid '{}': {}", raw, e)))
}

fn opt_uuid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(_) => uuid_at(row, idx).map(Some),
        None => Ok(None),
    }
}

fn address_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Address> {
    let raw: String = row.get(idx)?;
    Address::parse(&raw)
        .ok_or_else(|| conversion_err(idx, Type::Text, "blank address".to_string()))
}

fn timestamp_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let ms: i64 = row.get(idx)?;
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| conversion_err(idx, Type::Integer, format!("timestamp out of range: {}", ms)))
}

impl Record for Server {
    const KIND: EntityKind = EntityKind::Servers;
    const SELECT: &'static str =
        "SELECT id, address, name, icon, created_at, owner FROM servers";

    fn column(field: Field) -> Option<&'static str> {
        match field {
            Field::Id => Some("id"),
            Field::Address => Some("address"),
            Field::Name => Some("name"),
            _ => None,
        }
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Server {
            id: uuid_at(row, 0)?,
            address: address_at(row, 1)?,
            name: row.get(2)?,
            icon: row.get::<_, Option<String>>(3)?.filter(|s| !s.is_empty()),
            created_at: timestamp_at(row, 4)?,
            owner: address_at(row, 5)?,
        })
    }
}

impl Record for Channel {
    const KIND: EntityKind = EntityKind::Channels;
    const SELECT: &'static str = "SELECT id, name, server_id, created_at FROM channels";

    fn column(field: Field) -> Option<&'static str> {
        match field {
            Field::Id => Some("id"),
            Field::ServerId => Some("server_id"),
            Field::Name => Some("name"),
            _ => None,
        }
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Channel {
            id: uuid_at(row, 0)?,
            name: row.get(1)?,
            server_id: uuid_at(row, 2)?,
            created_at: timestamp_at(row, 3)?,
        })
    }
}

impl Record for Room {
    const KIND: EntityKind = EntityKind::Rooms;
    const SELECT: &'static str = "SELECT id, name, created_at FROM rooms";

    fn column(field: Field) -> Option<&'static str> {
        match field {
            Field::Id => Some("id"),
            Field::Name => Some("name"),
            _ => None,
        }
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Room {
            id: uuid_at(row, 0)?,
            name: row.get(1)?,
            created_at: timestamp_at(row, 2)?,
        })
    }
}

impl Record for Message {
    const KIND: EntityKind = EntityKind::Messages;
    const SELECT: &'static str =
        "SELECT id, channel_id, room_id, text, sender, sender_id, created_at FROM messages";

    fn column(field: Field) -> Option<&'static str> {
        match field {
            Field::Id => Some("id"),
            Field::ChannelId => Some("channel_id"),
            Field::RoomId => Some("room_id"),
            Field::Address => Some("sender_id"),
            _ => None,
        }
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let scope = match (opt_uuid_at(row, 1)?, opt_uuid_at(row, 2)?) {
            (Some(channel_id), None) => MessageScope::Channel(channel_id),
            (None, Some(room_id)) => MessageScope::Room(room_id),
            _ => {
                return Err(conversion_err(
                    1,
                    Type::Text,
                    "message must belong to exactly one channel or room".to_string(),
                ));
            }
        };

        Ok(Message {
            id: uuid_at(row, 0)?,
            scope,
            text: row.get(3)?,
            sender: row.get(4)?,
            sender_id: row
                .get::<_, Option<String>>(5)?
                .as_deref()
                .and_then(Address::parse),
            created_at: timestamp_at(row, 6)?,
        })
    }
}

impl Record for ServerMember {
    const KIND: EntityKind = EntityKind::ServerMembers;
    const SELECT: &'static str =
        "SELECT id, user_id, server_id, joined_at FROM server_members";

    fn column(field: Field) -> Option<&'static str> {
        match field {
            Field::Id => Some("id"),
            Field::UserId => Some("user_id"),
            Field::ServerId => Some("server_id"),
            _ => None,
        }
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(ServerMember {
            id: uuid_at(row, 0)?,
            user_id: uuid_at(row, 1)?,
            server_id: uuid_at(row, 2)?,
            joined_at: timestamp_at(row, 3)?,
        })
    }
}

impl Record for User {
    const KIND: EntityKind = EntityKind::Users;
    const SELECT: &'static str = "SELECT id, address, owner, username FROM users";

    fn column(field: Field) -> Option<&'static str> {
        match field {
            Field::Id => Some("id"),
            Field::Address => Some("address"),
            Field::Name => Some("username"),
            _ => None,
        }
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(User {
            id: uuid_at(row, 0)?,
            address: address_at(row, 1)?,
            owner: address_at(row, 2)?,
            username: row.get(3)?,
        })
    }
}
