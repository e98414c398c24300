//! Database schema migrations.
//!
//! Applies the initial schema: users, conversations, messages, and the
//! schema_migrations bookkeeping table.

use rusqlite::Connection;
use tracing::info;

use relay_core::error::RelayError;

/// Run all pending database migrations.
///
/// Currently implements the initial schema (version 1). Future migrations
/// can be added by checking the current version and applying incremental changes.
pub fn run_migrations(conn: &Connection) -> Result<(), RelayError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| RelayError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| RelayError::Storage(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: initial_schema");
    }

    Ok(())
}

/// Version 1: Initial schema.
///
/// Timestamps are Unix epoch milliseconds. Deleting a user is restricted
/// while conversations reference it; deleting a conversation cascades to
/// its messages.
fn apply_v1(conn: &Connection) -> Result<(), RelayError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id              TEXT PRIMARY KEY NOT NULL,
            secret_hash     TEXT NOT NULL,
            created_at      INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS conversations (
            id              TEXT PRIMARY KEY NOT NULL,
            user_id         TEXT NOT NULL,
            created_at      INTEGER NOT NULL,
            FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE RESTRICT
        );

        CREATE INDEX IF NOT EXISTS idx_conversations_user
            ON conversations (user_id, created_at DESC);

        CREATE TABLE IF NOT EXISTS messages (
            id              TEXT PRIMARY KEY NOT NULL,
            conversation_id TEXT NOT NULL,
            speaker         TEXT NOT NULL
                            CHECK (speaker IN ('user', 'assistant')),
            content         TEXT NOT NULL,
            timestamp       INTEGER NOT NULL,
            FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages (conversation_id, timestamp ASC);

        INSERT OR IGNORE INTO schema_migrations (version, name) VALUES (1, 'initial_schema');
        ",
    )
    .map_err(|e| RelayError::Storage(format!("Failed to apply migration v1: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        run_migrations(&conn).unwrap();
        conn
    }

    fn seed_conversation(conn: &Connection) {
        conn.execute(
            "INSERT INTO users (id, secret_hash, created_at) VALUES ('u1', 'h', 0)",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO conversations (id, user_id, created_at) VALUES ('c1', 'u1', 0)",
            [],
        )
        .unwrap();
    }

    #[test]
    fn test_migrations_run_once() {
        let conn = open_test_conn();
        // Running again should be idempotent.
        run_migrations(&conn).unwrap();

        let version: i64 = conn
            .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(version, 1);
    }

    #[test]
    fn test_conversation_requires_existing_user() {
        let conn = open_test_conn();
        let result = conn.execute(
            "INSERT INTO conversations (id, user_id, created_at) VALUES ('c1', 'ghost', 0)",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_message_requires_existing_conversation() {
        let conn = open_test_conn();
        let result = conn.execute(
            "INSERT INTO messages (id, conversation_id, speaker, content, timestamp)
             VALUES ('m1', 'nope', 'user', 'hi', 0)",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_speaker_check() {
        let conn = open_test_conn();
        seed_conversation(&conn);
        let result = conn.execute(
            "INSERT INTO messages (id, conversation_id, speaker, content, timestamp)
             VALUES ('m1', 'c1', 'system', 'hi', 0)",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_conversation_delete_cascades_to_messages() {
        let conn = open_test_conn();
        seed_conversation(&conn);
        conn.execute(
            "INSERT INTO messages (id, conversation_id, speaker, content, timestamp)
             VALUES ('m1', 'c1', 'user', 'hi', 0)",
            [],
        )
        .unwrap();

        conn.execute("DELETE FROM conversations WHERE id = 'c1'", [])
            .unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_user_delete_restricted_while_owning_conversations() {
        let conn = open_test_conn();
        seed_conversation(&conn);
        let result = conn.execute("DELETE FROM users WHERE id = 'u1'", []);
        assert!(result.is_err());
    }
}
