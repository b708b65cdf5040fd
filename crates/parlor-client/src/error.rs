use uuid::Uuid;

use parlor_types::Address;

/// Failures returned by the mutation dispatchers.
///
/// Validation variants are returned before anything is written and leave the
/// caller's input untouched.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("not signed in")]
    NotSignedIn,

    #[error("nothing to send")]
    EmptyInput,

    #[error("no server selected")]
    NoServerSelected,

    #[error("no channel selected")]
    NoChannelSelected,

    #[error("channel {channel} does not belong to server {server}")]
    ChannelNotInServer { channel: Uuid, server: Uuid },

    #[error("App not found: {0}")]
    AppNotFound(Address),

    #[error("no user record for {0}")]
    UserNotFound(Address),

    #[error("{who} is not allowed to {action}")]
    NotAuthorized { who: Address, action: &'static str },

    #[error("identity lookup failed: {0}")]
    IdentityUnavailable(#[source] anyhow::Error),

    #[error("store write failed: {0}")]
    Store(#[from] anyhow::Error),

    #[error("store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("cannot {action} while {state}")]
    InvalidTransition {
        state: &'static str,
        action: &'static str,
    },

    #[error("account {0} is not available to this wallet")]
    AccountNotAvailable(Address),

    #[error("identity provider error: {0}")]
    Identity(#[from] anyhow::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SelectionError {
    #[error("no server selected")]
    NoServerSelected,

    #[error("channel {channel} does not belong to server {server}")]
    ChannelNotInServer { channel: Uuid, server: Uuid },
}
