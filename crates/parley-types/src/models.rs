use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A chat message as stored in the message log.
///
/// Records are immutable once appended. `seq` is the insertion order and
/// breaks ties between records sharing a `created_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub seq: i64,
    pub username: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    /// Transcript line used in history replay.
    pub fn transcript_line(&self) -> String {
        format!("{}: {}", self.username, self.text)
    }
}

/// Server-issued proof of identity, referenced by an opaque token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub token: String,
    pub username: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}
