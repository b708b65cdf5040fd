pub mod hub;

pub use hub::{PresenceHandle, PresenceHub};

/// Room name used for a server's presence channel.
pub fn server_room(address: &parlor_types::Address) -> String {
    format!("server:{}", address)
}
