use std::sync::Arc;

use chrono::{DateTime, SubsecRound, Utc};
use tracing::{debug, error, info};
use uuid::Uuid;

use parlor_db::Database;
use parlor_types::api::TxOp;
use parlor_types::events::EntityKind;
use parlor_types::{Address, Channel, Message, MessageScope, Room, Server, ServerMember};

use crate::error::DispatchError;
use crate::identity::{Account, AppMetadata, IdentityProvider, is_admin};
use crate::selection::Selection;

/// Store timestamps are millisecond precision.
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// Trimmed contents of `draft`, or `EmptyInput` when blank.
fn take_input(draft: &str) -> Result<String, DispatchError> {
    let text = draft.trim();
    if text.is_empty() {
        return Err(DispatchError::EmptyInput);
    }
    Ok(text.to_string())
}

/// Write-side of the client. Every dispatcher validates first, clears the
/// caller's draft once the write is issued, and reports the outcome.
#[derive(Clone)]
pub struct Mutations {
    db: Arc<Database>,
}

impl Mutations {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    async fn commit(&self, action: &'static str, ops: Vec<TxOp>) -> Result<(), DispatchError> {
        let db = self.db.clone();
        let result = tokio::task::spawn_blocking(move || db.transact(&ops)).await;

        match result {
            Ok(Ok(change)) => {
                debug!("{} committed as #{}", action, change.seq);
                Ok(())
            }
            Ok(Err(e)) => {
                error!("Failed to {}: {:#}", action, e);
                Err(DispatchError::Store(e))
            }
            Err(e) => {
                error!("Failed to {}: spawn_blocking join error: {}", action, e);
                Err(DispatchError::Task(e))
            }
        }
    }

    /// Record the signed-in account, keyed by its unique address.
    pub async fn upsert_user(&self, account: &Account, wallet: &Address) -> Result<(), DispatchError> {
        self.commit(
            "upsert user",
            vec![TxOp::UpsertUserByAddress {
                id: Uuid::new_v4(),
                address: account.address.clone(),
                owner: wallet.clone(),
                username: account.username().unwrap_or_default().to_string(),
            }],
        )
        .await
    }

    /// Fetch app metadata for the address in `draft` without writing anything.
    pub async fn lookup_app<I: IdentityProvider>(
        &self,
        identity: &I,
        draft: &str,
    ) -> Result<AppMetadata, DispatchError> {
        let raw = take_input(draft)?;
        let address = Address::parse(&raw).ok_or(DispatchError::EmptyInput)?;
        identity
            .fetch_app(&address)
            .await
            .map_err(DispatchError::IdentityUnavailable)?
            .ok_or(DispatchError::AppNotFound(address))
    }

    /// Create a server from the identity-protocol app whose address is in `draft`.
    pub async fn create_server<I: IdentityProvider>(
        &self,
        identity: &I,
        account: &Account,
        draft: &mut String,
    ) -> Result<Server, DispatchError> {
        let app = self.lookup_app(identity, draft).await?;

        let server = Server {
            id: Uuid::new_v4(),
            name: app
                .name
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| app.address.to_string()),
            icon: app.logo.filter(|l| !l.trim().is_empty()),
            created_at: now(),
            owner: app.owner.unwrap_or_else(|| account.address.clone()),
            address: app.address,
        };

        draft.clear();
        self.commit("create server", vec![TxOp::PutServer(server.clone())]).await?;
        info!("Created server {} ({})", server.name, server.address);
        Ok(server)
    }

    pub async fn create_channel(
        &self,
        selection: &Selection,
        draft: &mut String,
    ) -> Result<Channel, DispatchError> {
        let server_id = selection.server_id().ok_or(DispatchError::NoServerSelected)?;
        let name = take_input(draft)?;

        let channel = Channel {
            id: Uuid::new_v4(),
            name,
            server_id,
            created_at: now(),
        };

        draft.clear();
        self.commit("create channel", vec![TxOp::PutChannel(channel.clone())]).await?;
        Ok(channel)
    }

    pub async fn send_message(
        &self,
        selection: &Selection,
        account: &Account,
        draft: &mut String,
    ) -> Result<Message, DispatchError> {
        let channel_id = selection.channel_id().ok_or(DispatchError::NoChannelSelected)?;
        self.send(MessageScope::Channel(channel_id), account, draft).await
    }

    pub async fn create_room(&self, draft: &mut String) -> Result<Room, DispatchError> {
        let name = take_input(draft)?;
        let room = Room {
            id: Uuid::new_v4(),
            name,
            created_at: now(),
        };

        draft.clear();
        self.commit("create room", vec![TxOp::PutRoom(room.clone())]).await?;
        Ok(room)
    }

    pub async fn send_room_message(
        &self,
        room: &Room,
        account: &Account,
        draft: &mut String,
    ) -> Result<Message, DispatchError> {
        self.send(MessageScope::Room(room.id), account, draft).await
    }

    async fn send(
        &self,
        scope: MessageScope,
        account: &Account,
        draft: &mut String,
    ) -> Result<Message, DispatchError> {
        let text = take_input(draft)?;

        let message = Message {
            id: Uuid::new_v4(),
            scope,
            text,
            sender: account.display_name().to_string(),
            sender_id: Some(account.address.clone()),
            created_at: now(),
        };

        draft.clear();
        self.commit("send message", vec![TxOp::PutMessage(message.clone())]).await?;
        Ok(message)
    }

    /// Add the account's user to `server`. Joining twice returns the existing
    /// membership without writing.
    pub async fn join_server(
        &self,
        account: &Account,
        server: &Server,
    ) -> Result<ServerMember, DispatchError> {
        let db = self.db.clone();
        let address = account.address.clone();
        let server_id = server.id;

        let (user, existing) = tokio::task::spawn_blocking(move || {
            let Some(user) = db.find_user_by_address(&address)? else {
                return Ok::<_, anyhow::Error>((None, None));
            };
            let existing = db.find_membership(user.id, server_id)?;
            Ok((Some(user), existing))
        })
        .await??;

        let user = user.ok_or_else(|| DispatchError::UserNotFound(account.address.clone()))?;
        if let Some(member) = existing {
            debug!("{} is already a member of {}", account.address, server.name);
            return Ok(member);
        }

        let member = ServerMember {
            id: Uuid::new_v4(),
            user_id: user.id,
            server_id,
            joined_at: now(),
        };
        self.commit("join server", vec![TxOp::PutMember(member.clone())]).await?;
        info!("{} joined server {}", account.address, server.name);
        Ok(member)
    }

    /// Delete `channel` and its messages. Only app admins and the server
    /// owner may do this.
    pub async fn delete_channel(
        &self,
        account: &Account,
        admins: &[Address],
        server: &Server,
        channel: &Channel,
    ) -> Result<(), DispatchError> {
        if channel.server_id != server.id {
            return Err(DispatchError::ChannelNotInServer {
                channel: channel.id,
                server: server.id,
            });
        }
        if !is_admin(admins, &account.address) && server.owner != account.address {
            return Err(DispatchError::NotAuthorized {
                who: account.address.clone(),
                action: "delete channels",
            });
        }

        self.commit(
            "delete channel",
            vec![TxOp::Delete {
                entity: EntityKind::Channels,
                id: channel.id,
            }],
        )
        .await?;
        info!("Deleted channel {} from {}", channel.name, server.name);
        Ok(())
    }
}
