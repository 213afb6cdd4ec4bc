//! Database row types. These map directly to SQLite rows.
//! Distinct from parley-types models to keep the DB layer independent.

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use parley_types::models::{ChatMessage, Session};
use uuid::Uuid;

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub password: String,
    pub created_at: String,
}

pub struct MessageRow {
    pub seq: i64,
    pub id: String,
    pub username: String,
    pub text: String,
    pub created_at: String,
}

pub struct SessionRow {
    pub token: String,
    pub username: String,
    pub created_at: String,
    pub expires_at: String,
}

/// Fixed-precision RFC 3339 so stored timestamps sort lexically.
pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    let ts = DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("corrupt timestamp '{}'", raw))?;
    Ok(ts.with_timezone(&Utc))
}

impl TryFrom<MessageRow> for ChatMessage {
    type Error = anyhow::Error;

    fn try_from(row: MessageRow) -> Result<Self> {
        Ok(ChatMessage {
            id: row
                .id
                .parse::<Uuid>()
                .with_context(|| format!("corrupt message id '{}'", row.id))?,
            seq: row.seq,
            username: row.username,
            text: row.text,
            created_at: parse_ts(&row.created_at)?,
        })
    }
}

impl TryFrom<SessionRow> for Session {
    type Error = anyhow::Error;

    fn try_from(row: SessionRow) -> Result<Self> {
        Ok(Session {
            created_at: parse_ts(&row.created_at)?,
            expires_at: parse_ts(&row.expires_at)?,
            token: row.token,
            username: row.username,
        })
    }
}
