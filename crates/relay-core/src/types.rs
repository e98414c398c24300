use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::RelayError;

// =============================================================================
// Enums
// =============================================================================

/// Who authored a turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    /// The human on the other side of the relay.
    User,
    /// The hosted model.
    Assistant,
}

impl Speaker {
    /// Column / wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Speaker::User => "user",
            Speaker::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Speaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Speaker {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Speaker::User),
            "assistant" => Ok(Speaker::Assistant),
            other => Err(RelayError::Validation(format!(
                "unknown speaker '{}', expected 'user' or 'assistant'",
                other
            ))),
        }
    }
}

// =============================================================================
// Entities
// =============================================================================

/// One utterance as sent to the model: a role plus its text.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Speaker,
    pub text: String,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Speaker::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Speaker::Assistant,
            text: text.into(),
        }
    }
}

/// A registered user. The credential hash never leaves the storage crate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub created_at: DateTime<Utc>,
}

/// A conversation owned by exactly one user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
}

/// A stored, immutable message within a conversation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub speaker: Speaker,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// The model-facing view of this message.
    pub fn to_turn(&self) -> Turn {
        Turn {
            role: self.speaker,
            text: self.content.clone(),
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Generate a fresh, random entity identifier (UUIDv4, hyphenated).
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Parse a client-supplied timestamp.
///
/// Accepts RFC 3339 (`2024-05-01T12:00:00Z`, `...+02:00`) as well as naive
/// ISO-8601 datetimes without an offset, which are taken to be UTC.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, RelayError> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Ok(naive.and_utc());
        }
    }
    Err(RelayError::Validation(format!(
        "invalid timestamp '{}': expected ISO-8601",
        raw
    )))
}

/// Render a timestamp the way the API returns it (RFC 3339, UTC, millis).
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}
