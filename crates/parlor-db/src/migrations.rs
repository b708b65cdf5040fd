use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

/// Timestamps are unix milliseconds.
pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS servers (
            id          TEXT PRIMARY KEY,
            address     TEXT NOT NULL UNIQUE,
            name        TEXT NOT NULL,
            icon        TEXT,
            created_at  INTEGER NOT NULL,
            owner       TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS channels (
            id          TEXT PRIMARY KEY,
            name        TEXT NOT NULL,
            server_id   TEXT NOT NULL REFERENCES servers(id) ON DELETE CASCADE,
            created_at  INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_channels_server
            ON channels(server_id);

        CREATE TABLE IF NOT EXISTS rooms (
            id          TEXT PRIMARY KEY,
            name        TEXT NOT NULL UNIQUE,
            created_at  INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS messages (
            id          TEXT PRIMARY KEY,
            channel_id  TEXT REFERENCES channels(id) ON DELETE CASCADE,
            room_id     TEXT REFERENCES rooms(id) ON DELETE CASCADE,
            text        TEXT NOT NULL,
            sender      TEXT NOT NULL,
            sender_id   TEXT,
            created_at  INTEGER NOT NULL,
            CHECK ((channel_id IS NULL) <> (room_id IS NULL))
        );

        CREATE INDEX IF NOT EXISTS idx_messages_channel
            ON messages(channel_id, created_at);

        CREATE INDEX IF NOT EXISTS idx_messages_room
            ON messages(room_id, created_at);

        CREATE TABLE IF NOT EXISTS users (
            id          TEXT PRIMARY KEY,
            address     TEXT NOT NULL UNIQUE,
            owner       TEXT NOT NULL,
            username    TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_users_owner
            ON users(owner);

        CREATE TABLE IF NOT EXISTS server_members (
            id          TEXT PRIMARY KEY,
            user_id     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            server_id   TEXT NOT NULL REFERENCES servers(id) ON DELETE CASCADE,
            joined_at   INTEGER NOT NULL,
            UNIQUE(user_id, server_id)
        );

        CREATE INDEX IF NOT EXISTS idx_members_server
            ON server_members(server_id);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
