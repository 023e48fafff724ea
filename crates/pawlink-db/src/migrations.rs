use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (adoption mirror + chat schema)");
        conn.execute_batch(
            "
            -- Written by the adoption service; read here to seed conversations.
            CREATE TABLE pets (
                id           TEXT PRIMARY KEY,
                name         TEXT NOT NULL,
                owner_email  TEXT,
                owner_name   TEXT,
                created_at   TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            );

            CREATE TABLE adoption_requests (
                id               TEXT PRIMARY KEY,
                pet_id           TEXT NOT NULL,
                applicant_email  TEXT NOT NULL,
                applicant_name   TEXT NOT NULL,
                status           TEXT NOT NULL DEFAULT 'pending',
                updated_at       TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            );

            CREATE TABLE conversations (
                id                        TEXT PRIMARY KEY,
                adoption_request_id       TEXT NOT NULL UNIQUE REFERENCES adoption_requests(id),
                pet_name                  TEXT NOT NULL,
                requester_email           TEXT NOT NULL,
                requester_name            TEXT NOT NULL,
                owner_email               TEXT NOT NULL,
                owner_name                TEXT NOT NULL,
                last_message_content      TEXT,
                last_message_sender_role  TEXT,
                last_message_at           TEXT,
                status                    TEXT NOT NULL DEFAULT 'active',
                created_at                TEXT NOT NULL
            );

            CREATE INDEX idx_conversations_requester
                ON conversations(requester_email COLLATE NOCASE);
            CREATE INDEX idx_conversations_owner
                ON conversations(owner_email COLLATE NOCASE);

            -- seq breaks timestamp ties in insertion order
            CREATE TABLE messages (
                seq              INTEGER PRIMARY KEY AUTOINCREMENT,
                id               TEXT NOT NULL UNIQUE,
                conversation_id  TEXT NOT NULL REFERENCES conversations(id),
                sender_role      TEXT NOT NULL,
                sender_email     TEXT NOT NULL,
                sender_name      TEXT NOT NULL,
                content          TEXT NOT NULL,
                created_at       TEXT NOT NULL,
                read             INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX idx_messages_conversation
                ON messages(conversation_id, created_at, seq);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
