use anyhow::{Result, anyhow};
use rusqlite::{Connection, OptionalExtension, Transaction, params};
use tracing::debug;
use uuid::Uuid;

use parlor_types::api::{Field, Filter, TxOp};
use parlor_types::events::{EntityKind, StoreChange};
use parlor_types::{Address, MessageScope, ServerMember, User};

use crate::Database;
use crate::records::{self, Record, millis};

impl Database {
    // -- Reads --

    /// Fetch every `T` matching `filter`. Order is unspecified; callers that
    /// display rows sort them.
    pub fn fetch<T: Record>(&self, filter: &Filter) -> Result<Vec<T>> {
        if filter.is_empty_set() {
            return Ok(vec![]);
        }
        self.with_conn(|conn| query_records(conn, filter))
    }

    pub fn find_user_by_address(&self, address: &Address) -> Result<Option<User>> {
        let mut users: Vec<User> = self.fetch(&Filter::eq(Field::Address, address))?;
        Ok(users.pop())
    }

    pub fn find_membership(&self, user_id: Uuid, server_id: Uuid) -> Result<Option<ServerMember>> {
        self.with_conn(|conn| {
            let sql = format!(
                "{} WHERE user_id = ?1 AND server_id = ?2",
                <ServerMember as Record>::SELECT
            );
            let member = conn
                .query_row(
                    &sql,
                    params![user_id.to_string(), server_id.to_string()],
                    ServerMember::from_row,
                )
                .optional()?;
            Ok(member)
        })
    }

    // -- Writes --

    /// Apply every op in one SQLite transaction, then notify live queries.
    /// Nothing is written if any op fails.
    pub fn transact(&self, ops: &[TxOp]) -> Result<StoreChange> {
        let mut touched: Vec<EntityKind> = Vec::new();

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            for op in ops {
                apply(&tx, op)?;

                let kind = op.entity();
                let mut kinds = vec![kind];
                if matches!(op, TxOp::Delete { .. }) {
                    kinds.extend_from_slice(records::cascades(kind));
                }
                for k in kinds {
                    if !touched.contains(&k) {
                        touched.push(k);
                    }
                }
            }
            tx.commit()?;
            Ok(())
        })?;

        debug!("Committed {} ops touching {:?}", ops.len(), touched);
        Ok(self.notify(touched))
    }
}

fn query_records<T: Record>(conn: &Connection, filter: &Filter) -> Result<Vec<T>> {
    let (sql, values) = match filter {
        Filter::All => (T::SELECT.to_string(), Vec::new()),
        Filter::Eq(field, value) => {
            let column = column_for::<T>(*field)?;
            (
                format!("{} WHERE {} = ?1", T::SELECT, column),
                vec![normalize(*field, value)],
            )
        }
        Filter::In(field, values) => {
            let column = column_for::<T>(*field)?;
            let placeholders: Vec<String> = (1..=values.len()).map(|i| format!("?{}", i)).collect();
            (
                format!("{} WHERE {} IN ({})", T::SELECT, column, placeholders.join(", ")),
                values.iter().map(|v| normalize(*field, v)).collect(),
            )
        }
    };

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(values.iter()), T::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn column_for<T: Record>(field: Field) -> Result<&'static str> {
    T::column(field).ok_or_else(|| anyhow!("field {:?} is not queryable on {:?}", field, T::KIND))
}

/// Address values are stored canonically, so compare them canonically.
fn normalize(field: Field, value: &str) -> String {
    match field {
        Field::Address => Address::parse(value)
            .map(String::from)
            .unwrap_or_default(),
        _ => value.to_string(),
    }
}

fn apply(tx: &Transaction<'_>, op: &TxOp) -> Result<()> {
    match op {
        TxOp::PutServer(server) => {
            tx.execute(
                "INSERT INTO servers (id, address, name, icon, created_at, owner)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(id) DO UPDATE SET
                    address = excluded.address,
                    name = excluded.name,
                    icon = excluded.icon,
                    owner = excluded.owner",
                params![
                    server.id.to_string(),
                    server.address.as_str(),
                    server.name,
                    server.icon,
                    millis(&server.created_at),
                    server.owner.as_str(),
                ],
            )?;
        }
        TxOp::PutChannel(channel) => {
            tx.execute(
                "INSERT INTO channels (id, name, server_id, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    server_id = excluded.server_id",
                params![
                    channel.id.to_string(),
                    channel.name,
                    channel.server_id.to_string(),
                    millis(&channel.created_at),
                ],
            )?;
        }
        TxOp::PutRoom(room) => {
            tx.execute(
                "INSERT INTO rooms (id, name, created_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET name = excluded.name",
                params![room.id.to_string(), room.name, millis(&room.created_at)],
            )?;
        }
        TxOp::PutMessage(message) => {
            let (channel_id, room_id) = match message.scope {
                MessageScope::Channel(id) => (Some(id.to_string()), None),
                MessageScope::Room(id) => (None, Some(id.to_string())),
            };
            tx.execute(
                "INSERT INTO messages (id, channel_id, room_id, text, sender, sender_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(id) DO UPDATE SET
                    text = excluded.text,
                    sender = excluded.sender",
                params![
                    message.id.to_string(),
                    channel_id,
                    room_id,
                    message.text,
                    message.sender,
                    message.sender_id.as_ref().map(Address::as_str),
                    millis(&message.created_at),
                ],
            )?;
        }
        TxOp::PutMember(member) => {
            tx.execute(
                "INSERT INTO server_members (id, user_id, server_id, joined_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET joined_at = excluded.joined_at",
                params![
                    member.id.to_string(),
                    member.user_id.to_string(),
                    member.server_id.to_string(),
                    millis(&member.joined_at),
                ],
            )?;
        }
        TxOp::UpsertUserByAddress {
            id,
            address,
            owner,
            username,
        } => {
            tx.execute(
                "INSERT INTO users (id, address, owner, username)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(address) DO UPDATE SET
                    owner = excluded.owner,
                    username = excluded.username",
                params![id.to_string(), address.as_str(), owner.as_str(), username],
            )?;
        }
        TxOp::Delete { entity, id } => {
            let sql = format!("DELETE FROM {} WHERE id = ?1", records::table_name(*entity));
            tx.execute(&sql, [id.to_string()])?;
        }
    }
    Ok(())
}
