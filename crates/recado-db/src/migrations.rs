use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id              TEXT PRIMARY KEY,
                username        TEXT NOT NULL UNIQUE,
                password        TEXT NOT NULL,
                display_name    TEXT,
                role            TEXT NOT NULL DEFAULT 'member',
                created_at      TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE conversations (
                id              TEXT PRIMARY KEY,
                kind            TEXT NOT NULL,
                name            TEXT,
                created_at      TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at      TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE participants (
                conversation_id TEXT NOT NULL REFERENCES conversations(id),
                user_id         TEXT NOT NULL REFERENCES users(id),
                last_read_at    TEXT,
                created_at      TEXT NOT NULL DEFAULT (datetime('now')),
                PRIMARY KEY (conversation_id, user_id)
            );

            CREATE INDEX idx_participants_user
                ON participants(user_id);

            CREATE TABLE messages (
                id              TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL REFERENCES conversations(id),
                author_id       TEXT NOT NULL REFERENCES users(id),
                content         TEXT NOT NULL,
                attachments     TEXT,
                created_at      TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX idx_messages_conversation
                ON messages(conversation_id, created_at);

            CREATE TABLE message_delivery_states (
                id              TEXT PRIMARY KEY,
                message_id      TEXT NOT NULL REFERENCES messages(id),
                user_id         TEXT NOT NULL REFERENCES users(id),
                delivered       INTEGER NOT NULL DEFAULT 0,
                delivered_at    TEXT,
                read            INTEGER NOT NULL DEFAULT 0,
                read_at         TEXT,
                UNIQUE(message_id, user_id)
            );

            CREATE INDEX idx_delivery_message
                ON message_delivery_states(message_id);

            CREATE INDEX idx_delivery_user
                ON message_delivery_states(user_id, read);

            CREATE TABLE notes (
                id              TEXT PRIMARY KEY,
                author_id       TEXT NOT NULL REFERENCES users(id),
                title           TEXT NOT NULL,
                body            TEXT NOT NULL,
                created_at      TEXT NOT NULL DEFAULT (datetime('now'))
            );

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
