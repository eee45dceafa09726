use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          TEXT PRIMARY KEY,
            name        TEXT NOT NULL,
            email       TEXT NOT NULL UNIQUE,
            avatar      TEXT
        );

        CREATE TABLE IF NOT EXISTS conversations (
            id          TEXT PRIMARY KEY,
            type        TEXT NOT NULL CHECK (type IN ('direct', 'group')),
            name        TEXT,
            avatar      TEXT
        );

        CREATE TABLE IF NOT EXISTS conversation_members (
            conversation_id TEXT NOT NULL REFERENCES conversations(id),
            user_id         TEXT NOT NULL REFERENCES users(id),
            PRIMARY KEY (conversation_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_members_user
            ON conversation_members(user_id);

        -- conversation_id is NULL for legacy direct messages, which are
        -- addressed by receiver_id (NULL receiver = everyone).
        CREATE TABLE IF NOT EXISTS messages (
            id                  TEXT PRIMARY KEY,
            sender_id           TEXT NOT NULL REFERENCES users(id),
            conversation_id     TEXT REFERENCES conversations(id),
            receiver_id         TEXT,
            content             TEXT NOT NULL,
            type                TEXT NOT NULL DEFAULT 'text',
            reply_to_message_id TEXT,
            shared_from         TEXT,
            reactions           TEXT NOT NULL DEFAULT '[]',
            status              INTEGER NOT NULL DEFAULT 0,
            created_at          TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_id, created_at);

        CREATE TABLE IF NOT EXISTS message_deletions (
            message_id  TEXT NOT NULL REFERENCES messages(id),
            user_id     TEXT NOT NULL REFERENCES users(id),
            PRIMARY KEY (message_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS message_shares (
            id                   INTEGER PRIMARY KEY AUTOINCREMENT,
            sender_id            TEXT NOT NULL REFERENCES users(id),
            from_conversation_id TEXT,
            to_conversation_id   TEXT NOT NULL,
            message              TEXT NOT NULL,
            note                 TEXT NOT NULL DEFAULT '',
            created_at           TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS refresh_tokens (
            token_hash  TEXT PRIMARY KEY,
            user_id     TEXT NOT NULL REFERENCES users(id),
            expires_at  TEXT NOT NULL,
            revoked_at  TEXT
        );
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
