use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD as B64;
use chrono::{Duration, SubsecRound, Utc};
use tracing::{debug, warn};

use parley_db::Database;
use parley_types::models::Session;

pub const DEFAULT_SESSION_TTL_HOURS: i64 = 24;

/// Issues and resolves opaque session tokens.
///
/// Sessions live in the same database for HTTP handlers and the channel
/// upgrade. Lifetime is a fixed TTL from issue; expired rows resolve to none
/// and are pruned by the server's maintenance loop.
#[derive(Clone)]
pub struct SessionAuthority {
    db: Arc<Database>,
    ttl: Duration,
}

impl SessionAuthority {
    pub fn new(db: Arc<Database>, ttl: Duration) -> Self {
        Self { db, ttl }
    }

    pub async fn create(&self, username: &str) -> anyhow::Result<Session> {
        let bytes: [u8; 32] = rand::random();
        // Stored with microsecond precision
        let now = Utc::now().trunc_subsecs(6);
        let session = Session {
            token: B64.encode(bytes),
            username: username.to_string(),
            created_at: now,
            expires_at: now + self.ttl,
        };

        let db = self.db.clone();
        let row = session.clone();
        tokio::task::spawn_blocking(move || {
            db.insert_session(&row.token, &row.username, row.created_at, row.expires_at)
        })
        .await??;

        debug!("Session issued for {}", session.username);
        Ok(session)
    }

    /// Pure lookup. Expired sessions are reported as absent.
    pub async fn current_session(&self, token: &str) -> anyhow::Result<Option<Session>> {
        let db = self.db.clone();
        let token = token.to_string();
        let row = tokio::task::spawn_blocking(move || db.get_session(&token)).await??;

        let Some(row) = row else {
            return Ok(None);
        };
        let session = Session::try_from(row)?;
        if session.is_expired(Utc::now()) {
            return Ok(None);
        }
        Ok(Some(session))
    }

    /// Resolve a token to its username. Storage errors count as no session.
    pub async fn authenticate(&self, token: &str) -> Option<String> {
        match self.current_session(token).await {
            Ok(session) => session.map(|s| s.username),
            Err(e) => {
                warn!("Session lookup failed: {:#}", e);
                None
            }
        }
    }

    /// Idempotent: destroying an absent session is not an error.
    pub async fn destroy(&self, token: &str) -> anyhow::Result<()> {
        let db = self.db.clone();
        let token = token.to_string();
        let removed = tokio::task::spawn_blocking(move || db.delete_session(&token)).await??;
        debug!("Logout removed {} session(s)", removed);
        Ok(())
    }

    pub async fn prune_expired(&self) -> anyhow::Result<usize> {
        let db = self.db.clone();
        Ok(tokio::task::spawn_blocking(move || db.delete_expired_sessions(Utc::now())).await??)
    }
}
