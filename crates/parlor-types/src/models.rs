use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

// -- Identity --

/// Canonical wallet/account address.
///
/// Every identity comparison in the workspace goes through this type, so
/// `0xAbC` and `0xabc` are the same key. Construction trims and lowercases;
/// a blank string is not an address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(Self(trimmed.to_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("blank identity address")]
pub struct InvalidAddress;

impl TryFrom<String> for Address {
    type Error = InvalidAddress;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Address::parse(&raw).ok_or(InvalidAddress)
    }
}

impl From<Address> for String {
    fn from(addr: Address) -> Self {
        addr.0
    }
}

impl std::str::FromStr for Address {
    type Err = InvalidAddress;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Address::parse(s).ok_or(InvalidAddress)
    }
}

// -- Entities --

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Server {
    pub id: Uuid,
    /// Application identity on the external identity protocol. Unique.
    pub address: Address,
    pub name: String,
    pub icon: Option<String>,
    pub created_at: DateTime<Utc>,
    pub owner: Address,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub id: Uuid,
    pub name: String,
    pub server_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// Server-less conversation stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Conversation a message belongs to. Exactly one, never both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum MessageScope {
    Channel(Uuid),
    Room(Uuid),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub scope: MessageScope,
    pub text: String,
    /// Display name snapshot taken when the message was sent.
    pub sender: String,
    /// Stable identity key of the author. Messages without one are not
    /// rendered in the grouped view.
    #[serde(default, deserialize_with = "blank_as_none")]
    pub sender_id: Option<Address>,
    pub created_at: DateTime<Utc>,
}

/// Join record between a User and a Server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerMember {
    pub id: Uuid,
    pub user_id: Uuid,
    pub server_id: Uuid,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub address: Address,
    /// Controlling wallet.
    pub owner: Address,
    pub username: String,
}

/// Small payload each live connection publishes into a presence room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresencePayload {
    pub address: Address,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
}

fn blank_as_none<'de, D>(deserializer: D) -> Result<Option<Address>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(Address::parse))
}
