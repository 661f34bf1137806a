use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (users, channels)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id                  TEXT PRIMARY KEY,
                username            TEXT NOT NULL UNIQUE,
                password            TEXT NOT NULL,
                onboarding_complete INTEGER NOT NULL DEFAULT 0,
                created_at          TEXT NOT NULL DEFAULT (datetime('now'))
            );

            -- One row per (owner, provider, address). Initiation upserts on
            -- this key, so a second attempt updates the first.
            CREATE TABLE channels (
                id                   TEXT PRIMARY KEY,
                owner_id             TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                channel_type         TEXT NOT NULL CHECK (channel_type IN ('whatsapp', 'instagram')),
                address              TEXT,
                status               TEXT NOT NULL DEFAULT 'disconnected'
                    CHECK (status IN ('disconnected', 'connecting', 'connected', 'error')),
                attempt_id           TEXT,
                transient_credential TEXT,
                completion_due_at    TEXT,
                error_reason         TEXT,
                last_connected_at    TEXT,
                created_at           TEXT NOT NULL,
                updated_at           TEXT NOT NULL,
                UNIQUE (owner_id, channel_type, address),
                CHECK (transient_credential IS NULL OR status = 'connecting'),
                CHECK (completion_due_at IS NULL OR status = 'connecting')
            );

            CREATE INDEX idx_channels_owner ON channels(owner_id, created_at);
            CREATE INDEX idx_channels_due ON channels(status, completion_due_at);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    if version < 2 {
        info!("Running migration v2 (conversations, messages)");
        conn.execute_batch(
            "
            CREATE TABLE conversations (
                id              TEXT PRIMARY KEY,
                owner_id        TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                channel_id      TEXT NOT NULL REFERENCES channels(id) ON DELETE CASCADE,
                contact_id      TEXT NOT NULL,
                contact_name    TEXT NOT NULL,
                contact_avatar  TEXT,
                last_message    TEXT,
                last_message_at TEXT,
                unread_count    INTEGER NOT NULL DEFAULT 0,
                created_at      TEXT NOT NULL,
                UNIQUE (channel_id, contact_id)
            );

            CREATE INDEX idx_conversations_owner
                ON conversations(owner_id, last_message_at);

            CREATE TABLE messages (
                id              TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
                external_id     TEXT,
                sender          TEXT NOT NULL CHECK (sender IN ('user', 'contact')),
                content         TEXT NOT NULL,
                media_url       TEXT,
                media_type      TEXT,
                status          TEXT NOT NULL,
                created_at      TEXT NOT NULL
            );

            CREATE INDEX idx_messages_conversation
                ON messages(conversation_id, created_at);

            INSERT INTO schema_version (version) VALUES (2);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run(&conn).unwrap();
        run(&conn).unwrap();

        let version: i64 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(version, 2);
    }
}
