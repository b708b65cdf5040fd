pub mod api;
pub mod events;
pub mod models;

pub use models::{
    Address, Channel, InvalidAddress, Message, MessageScope, PresencePayload, Room, Server,
    ServerMember, User,
};
