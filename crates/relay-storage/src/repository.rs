//! Repository implementations for SQLite-backed persistence.
//!
//! Provides UserRepository, ConversationRepository, and MessageRepository
//! that operate on the shared Database using raw SQL.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::Connection;
use tracing::{debug, info};

use relay_core::error::RelayError;
use relay_core::types::{new_id, Conversation, Message, Speaker, User};

use crate::credentials;
use crate::db::Database;

/// A message that has not been persisted yet.
#[derive(Debug, Clone, Copy)]
pub struct NewMessage<'a> {
    pub speaker: Speaker,
    pub content: &'a str,
    pub timestamp: DateTime<Utc>,
}

/// Repository for registered users.
pub struct UserRepository {
    db: Arc<Database>,
}

impl UserRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Register a user.
    ///
    /// Returns `Ok(false)` without touching the stored row when `id` is
    /// already taken.
    pub fn create(&self, id: &str, secret: &str) -> Result<bool, RelayError> {
        if id.trim().is_empty() {
            return Err(RelayError::Validation("user id must not be empty".to_string()));
        }
        if secret.is_empty() {
            return Err(RelayError::Validation("secret must not be empty".to_string()));
        }

        // Hash outside the lock; Argon2 is deliberately slow.
        let secret_hash = credentials::hash_secret(secret)?;
        let now = Utc::now().timestamp_millis();

        let inserted = self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, secret_hash, created_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO NOTHING",
                rusqlite::params![id, secret_hash, now],
            )
            .map_err(|e| RelayError::Storage(format!("Failed to create user: {}", e)))
        })?;

        if inserted == 1 {
            info!(user_id = %id, "User registered");
        } else {
            debug!(user_id = %id, "User id already taken");
        }
        Ok(inserted == 1)
    }

    /// Find a user by ID.
    pub fn find(&self, id: &str) -> Result<Option<User>, RelayError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT id, created_at FROM users WHERE id = ?1",
                rusqlite::params![id],
                |row| {
                    Ok(User {
                        id: row.get(0)?,
                        created_at: millis_to_datetime(row.get(1)?),
                    })
                },
            )
            .optional()
            .map_err(|e| RelayError::Storage(e.to_string()))
        })
    }

    /// Whether a user with this ID exists.
    pub fn exists(&self, id: &str) -> Result<bool, RelayError> {
        self.db.with_conn(|conn| user_exists(conn, id))
    }

    /// Check a secret against the stored hash. Unknown users never verify.
    pub fn verify_secret(&self, id: &str, secret: &str) -> Result<bool, RelayError> {
        let stored: Option<String> = self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT secret_hash FROM users WHERE id = ?1",
                rusqlite::params![id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| RelayError::Storage(e.to_string()))
        })?;

        Ok(stored.is_some_and(|hash| credentials::verify_secret(secret, &hash)))
    }

    /// Delete a user that owns no conversations.
    ///
    /// Deletion is blocked with `Conflict` while any conversation still
    /// belongs to the user; conversations are never removed implicitly.
    pub fn delete(&self, id: &str) -> Result<(), RelayError> {
        self.db.with_transaction(|tx| {
            if !user_exists(tx, id)? {
                return Err(RelayError::NotFound(format!("user '{}'", id)));
            }

            let owned: i64 = tx
                .query_row(
                    "SELECT COUNT(*) FROM conversations WHERE user_id = ?1",
                    rusqlite::params![id],
                    |row| row.get(0),
                )
                .map_err(|e| RelayError::Storage(e.to_string()))?;
            if owned > 0 {
                return Err(RelayError::Conflict(format!(
                    "user '{}' still owns {} conversation(s)",
                    id, owned
                )));
            }

            tx.execute("DELETE FROM users WHERE id = ?1", rusqlite::params![id])
                .map_err(|e| RelayError::Storage(format!("Failed to delete user: {}", e)))?;
            info!(user_id = %id, "User deleted");
            Ok(())
        })
    }
}

/// Repository for conversations.
pub struct ConversationRepository {
    db: Arc<Database>,
}

impl ConversationRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Create an empty conversation owned by `owner_id` and return its ID.
    pub fn create(&self, owner_id: &str) -> Result<String, RelayError> {
        let id = new_id();
        let now = Utc::now().timestamp_millis();

        self.db.with_conn(|conn| {
            if !user_exists(conn, owner_id)? {
                return Err(RelayError::NotFound(format!("user '{}'", owner_id)));
            }
            conn.execute(
                "INSERT INTO conversations (id, user_id, created_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![id, owner_id, now],
            )
            .map_err(|e| RelayError::Storage(format!("Failed to create conversation: {}", e)))?;
            Ok(())
        })?;

        info!(conversation_id = %id, user_id = %owner_id, "Conversation created");
        Ok(id)
    }

    /// Find a conversation by ID.
    pub fn find(&self, id: &str) -> Result<Option<Conversation>, RelayError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT id, user_id, created_at FROM conversations WHERE id = ?1",
                rusqlite::params![id],
                row_to_conversation,
            )
            .optional()
            .map_err(|e| RelayError::Storage(e.to_string()))
        })
    }

    /// List a user's conversations, newest first.
    pub fn list_for_owner(&self, owner_id: &str) -> Result<Vec<Conversation>, RelayError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, user_id, created_at FROM conversations
                     WHERE user_id = ?1
                     ORDER BY created_at DESC, rowid DESC",
                )
                .map_err(|e| RelayError::Storage(e.to_string()))?;

            let rows = stmt
                .query_map(rusqlite::params![owner_id], row_to_conversation)
                .map_err(|e| RelayError::Storage(e.to_string()))?;

            rows.collect::<Result<Vec<_>, _>>()
                .map_err(|e| RelayError::Storage(e.to_string()))
        })
    }

    /// Delete a conversation owned by `owner_id`, cascading to its messages.
    pub fn delete(&self, owner_id: &str, id: &str) -> Result<(), RelayError> {
        let deleted = self.db.with_conn(|conn| {
            conn.execute(
                "DELETE FROM conversations WHERE id = ?1 AND user_id = ?2",
                rusqlite::params![id, owner_id],
            )
            .map_err(|e| RelayError::Storage(format!("Failed to delete conversation: {}", e)))
        })?;

        if deleted == 0 {
            return Err(RelayError::NotFound(format!("conversation '{}'", id)));
        }
        info!(conversation_id = %id, user_id = %owner_id, "Conversation deleted");
        Ok(())
    }

    /// Count all conversations.
    pub fn count(&self) -> Result<u64, RelayError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM conversations", [], |row| row.get(0))
                .map_err(|e| RelayError::Storage(e.to_string()))?;
            Ok(count as u64)
        })
    }
}

/// Repository for conversation messages.
pub struct MessageRepository {
    db: Arc<Database>,
}

impl MessageRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Append one message and return its generated ID.
    pub fn append(
        &self,
        conversation_id: &str,
        speaker: Speaker,
        content: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<String, RelayError> {
        let message = NewMessage {
            speaker,
            content,
            timestamp,
        };
        self.db.with_conn(|conn| {
            if !conversation_exists(conn, conversation_id)? {
                return Err(RelayError::NotFound(format!(
                    "conversation '{}'",
                    conversation_id
                )));
            }
            insert_message(conn, conversation_id, &message)
        })
    }

    /// Append a user turn and the assistant's reply in one transaction.
    ///
    /// Either both messages are stored or neither is. Returns the IDs in
    /// `(user, assistant)` order.
    pub fn append_exchange(
        &self,
        conversation_id: &str,
        user: &NewMessage<'_>,
        assistant: &NewMessage<'_>,
    ) -> Result<(String, String), RelayError> {
        let ids = self.db.with_transaction(|tx| {
            if !conversation_exists(tx, conversation_id)? {
                return Err(RelayError::NotFound(format!(
                    "conversation '{}'",
                    conversation_id
                )));
            }
            let user_id = insert_message(tx, conversation_id, user)?;
            let assistant_id = insert_message(tx, conversation_id, assistant)?;
            Ok((user_id, assistant_id))
        })?;

        debug!(conversation_id = %conversation_id, "Exchange committed");
        Ok(ids)
    }

    /// List a conversation's messages, oldest first.
    ///
    /// Fails with `NotFound` only if the conversation does not exist; an
    /// existing conversation without messages yields an empty list.
    pub fn list(&self, conversation_id: &str) -> Result<Vec<Message>, RelayError> {
        self.db.with_conn(|conn| {
            if !conversation_exists(conn, conversation_id)? {
                return Err(RelayError::NotFound(format!(
                    "conversation '{}'",
                    conversation_id
                )));
            }

            let mut stmt = conn
                .prepare(
                    "SELECT id, conversation_id, speaker, content, timestamp
                     FROM messages
                     WHERE conversation_id = ?1
                     ORDER BY timestamp ASC, rowid ASC",
                )
                .map_err(|e| RelayError::Storage(e.to_string()))?;

            let rows = stmt
                .query_map(rusqlite::params![conversation_id], |row| {
                    Ok(row_to_message(row))
                })
                .map_err(|e| RelayError::Storage(e.to_string()))?;

            let mut messages = Vec::new();
            for row in rows {
                let message = row.map_err(|e| RelayError::Storage(e.to_string()))??;
                messages.push(message);
            }
            Ok(messages)
        })
    }

    /// Count the messages in one conversation.
    pub fn count(&self, conversation_id: &str) -> Result<u64, RelayError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
                    rusqlite::params![conversation_id],
                    |row| row.get(0),
                )
                .map_err(|e| RelayError::Storage(e.to_string()))?;
            Ok(count as u64)
        })
    }
}

// ============================================================================
// Helper functions shared by the repositories.
// ============================================================================

fn user_exists(conn: &Connection, id: &str) -> Result<bool, RelayError> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM users WHERE id = ?1)",
        rusqlite::params![id],
        |row| row.get(0),
    )
    .map_err(|e| RelayError::Storage(e.to_string()))
}

fn conversation_exists(conn: &Connection, id: &str) -> Result<bool, RelayError> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM conversations WHERE id = ?1)",
        rusqlite::params![id],
        |row| row.get(0),
    )
    .map_err(|e| RelayError::Storage(e.to_string()))
}

fn insert_message(
    conn: &Connection,
    conversation_id: &str,
    message: &NewMessage<'_>,
) -> Result<String, RelayError> {
    let id = new_id();
    conn.execute(
        "INSERT INTO messages (id, conversation_id, speaker, content, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![
            id,
            conversation_id,
            message.speaker.as_str(),
            message.content,
            message.timestamp.timestamp_millis(),
        ],
    )
    .map_err(|e| RelayError::Storage(format!("Failed to save message: {}", e)))?;
    Ok(id)
}

fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis).single().unwrap_or_default()
}

fn row_to_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: row.get(0)?,
        user_id: row.get(1)?,
        created_at: millis_to_datetime(row.get(2)?),
    })
}

fn row_to_message(row: &rusqlite::Row<'_>) -> Result<Message, RelayError> {
    let id: String = row
        .get(0)
        .map_err(|e| RelayError::Storage(e.to_string()))?;
    let conversation_id: String = row
        .get(1)
        .map_err(|e| RelayError::Storage(e.to_string()))?;
    let speaker_str: String = row
        .get(2)
        .map_err(|e| RelayError::Storage(e.to_string()))?;
    let content: String = row
        .get(3)
        .map_err(|e| RelayError::Storage(e.to_string()))?;
    let timestamp: i64 = row
        .get(4)
        .map_err(|e| RelayError::Storage(e.to_string()))?;

    let speaker: Speaker = speaker_str
        .parse()
        .map_err(|e| RelayError::Storage(format!("Corrupt message row {}: {}", id, e)))?;

    Ok(Message {
        id,
        conversation_id,
        speaker,
        content,
        timestamp: millis_to_datetime(timestamp),
    })
}

/// Extension trait for rusqlite to support optional query results.
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>, rusqlite::Error>;
}

impl<T> OptionalExt<T> for Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>, rusqlite::Error> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
