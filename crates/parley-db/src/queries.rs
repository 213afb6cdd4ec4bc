use crate::models::{MessageRow, SessionRow, UserRow, format_ts, parse_ts};
use crate::Database;
use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};

impl Database {
    // -- Users --

    pub fn create_user(&self, id: &str, username: &str, password_hash: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, password, created_at) VALUES (?1, ?2, ?3, ?4)",
                (id, username, password_hash, format_ts(Utc::now())),
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user_by_username(conn, username))
    }

    // -- Messages --

    /// Append one message in a single transaction and return the stored row.
    ///
    /// `created_at` never moves backwards: a clock that stepped back is clamped
    /// to the previous record's timestamp.
    pub fn append_message(
        &self,
        id: &str,
        username: &str,
        text: &str,
        now: DateTime<Utc>,
    ) -> Result<MessageRow> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let last: Option<String> = tx
                .query_row(
                    "SELECT created_at FROM messages ORDER BY seq DESC LIMIT 1",
                    [],
                    |row| row.get(0),
                )
                .optional()?;

            let created_at = match last {
                Some(raw) => now.max(parse_ts(&raw)?),
                None => now,
            };
            let created_at = format_ts(created_at);

            tx.execute(
                "INSERT INTO messages (id, username, text, created_at) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![id, username, text, created_at],
            )?;
            let seq = tx.last_insert_rowid();
            tx.commit()?;

            Ok(MessageRow {
                seq,
                id: id.to_string(),
                username: username.to_string(),
                text: text.to_string(),
                created_at,
            })
        })
    }

    /// The `limit` most recent messages, oldest first.
    pub fn recent_messages(&self, limit: u32) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| query_recent_messages(conn, limit))
    }

    // -- Sessions --

    pub fn insert_session(
        &self,
        token: &str,
        username: &str,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sessions (token, username, created_at, expires_at) VALUES (?1, ?2, ?3, ?4)",
                (token, username, format_ts(created_at), format_ts(expires_at)),
            )?;
            Ok(())
        })
    }

    pub fn get_session(&self, token: &str) -> Result<Option<SessionRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT token, username, created_at, expires_at FROM sessions WHERE token = ?1",
                    [token],
                    |row| {
                        Ok(SessionRow {
                            token: row.get(0)?,
                            username: row.get(1)?,
                            created_at: row.get(2)?,
                            expires_at: row.get(3)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
    }

    /// Returns the number of rows removed (0 when the token was already gone).
    pub fn delete_session(&self, token: &str) -> Result<usize> {
        self.with_conn(|conn| Ok(conn.execute("DELETE FROM sessions WHERE token = ?1", [token])?))
    }

    pub fn delete_expired_sessions(&self, now: DateTime<Utc>) -> Result<usize> {
        self.with_conn(|conn| {
            Ok(conn.execute(
                "DELETE FROM sessions WHERE expires_at <= ?1",
                [format_ts(now)],
            )?)
        })
    }
}

fn query_user_by_username(conn: &Connection, username: &str) -> Result<Option<UserRow>> {
    let mut stmt =
        conn.prepare("SELECT id, username, password, created_at FROM users WHERE username = ?1")?;

    let row = stmt
        .query_row([username], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                username: row.get(1)?,
                password: row.get(2)?,
                created_at: row.get(3)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn query_recent_messages(conn: &Connection, limit: u32) -> Result<Vec<MessageRow>> {
    let mut stmt = conn.prepare(
        "SELECT seq, id, username, text, created_at
         FROM messages
         ORDER BY seq DESC
         LIMIT ?1",
    )?;

    let mut rows = stmt
        .query_map([limit], |row| {
            Ok(MessageRow {
                seq: row.get(0)?,
                id: row.get(1)?,
                username: row.get(2)?,
                text: row.get(3)?,
                created_at: row.get(4)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    // Newest-first from the index walk; callers want a readable transcript.
    rows.reverse();
    Ok(rows)
}
