use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          TEXT PRIMARY KEY,
            username    TEXT NOT NULL UNIQUE,
            created_at  TEXT NOT NULL
        );

        -- Never exposed through the table API
        CREATE TABLE IF NOT EXISTS credentials (
            user_id     TEXT PRIMARY KEY REFERENCES users(id),
            password    TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS channels (
            id          TEXT PRIMARY KEY,
            name        TEXT NOT NULL CHECK (length(trim(name)) > 0),
            description TEXT,
            created_at  TEXT NOT NULL,
            created_by  TEXT NOT NULL REFERENCES users(id)
        );

        CREATE TABLE IF NOT EXISTS messages (
            id          TEXT PRIMARY KEY,
            channel_id  TEXT NOT NULL REFERENCES channels(id),
            content     TEXT NOT NULL,
            created_at  TEXT NOT NULL,
            user_id     TEXT NOT NULL REFERENCES users(id)
        );

        CREATE INDEX IF NOT EXISTS idx_messages_channel
            ON messages(channel_id, created_at);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
