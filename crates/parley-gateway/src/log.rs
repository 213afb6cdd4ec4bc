use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::error;
use uuid::Uuid;

use parley_db::Database;
use parley_types::errors::PersistenceError;
use parley_types::models::ChatMessage;

/// Append-only durable message store.
#[async_trait]
pub trait MessageLog: Send + Sync {
    /// Persist one message atomically. On error nothing was written.
    async fn append(&self, username: &str, text: &str) -> Result<ChatMessage, PersistenceError>;

    /// The `limit` most recently appended records, oldest first.
    async fn recent(&self, limit: u32) -> Result<Vec<ChatMessage>, PersistenceError>;
}

/// [`MessageLog`] backed by the SQLite `messages` table.
#[derive(Clone)]
pub struct SqliteMessageLog {
    db: Arc<Database>,
}

impl SqliteMessageLog {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl MessageLog for SqliteMessageLog {
    async fn append(&self, username: &str, text: &str) -> Result<ChatMessage, PersistenceError> {
        let db = self.db.clone();
        let id = Uuid::new_v4().to_string();
        let username = username.to_string();
        let text = text.to_string();

        // Run blocking DB insert off the async runtime
        let row = tokio::task::spawn_blocking(move || {
            db.append_message(&id, &username, &text, Utc::now())
        })
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            PersistenceError::WriteFailed(e.to_string())
        })?
        .map_err(|e| {
            error!("Message append failed: {:#}", e);
            PersistenceError::WriteFailed(e.to_string())
        })?;

        ChatMessage::try_from(row).map_err(|e| PersistenceError::WriteFailed(e.to_string()))
    }

    async fn recent(&self, limit: u32) -> Result<Vec<ChatMessage>, PersistenceError> {
        let db = self.db.clone();
        let rows = tokio::task::spawn_blocking(move || db.recent_messages(limit))
            .await
            .map_err(|e| PersistenceError::ReadFailed(e.to_string()))?
            .map_err(|e| {
                error!("History fetch failed: {:#}", e);
                PersistenceError::ReadFailed(e.to_string())
            })?;

        rows.into_iter()
            .map(|row| ChatMessage::try_from(row).map_err(|e| PersistenceError::ReadFailed(e.to_string())))
            .collect()
    }
}
