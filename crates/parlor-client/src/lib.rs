//! Client view-state aggregation for parlor.
//!
//! Composes live store queries and presence into the grouped, ordered,
//! presence-annotated models a renderer consumes, and dispatches writes back
//! into the same store.

pub mod chat;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod grouping;
pub mod identity;
pub mod mentions;
pub mod roster;
pub mod selection;
pub mod session;
pub mod subscription;

pub use chat::{ChatClient, ChatView, GroupView};
pub use config::Config;
pub use dispatch::Mutations;
pub use error::{DispatchError, SelectionError, SessionError};
pub use identity::{Account, AppMetadata, Directory, IdentityProvider};
pub use selection::{Selection, SelectionStore};
pub use session::{Session, SessionState};
