use std::sync::Arc;

use anyhow::{Context, anyhow};
use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use tracing::{error, info};
use uuid::Uuid;

use parley_db::Database;
use parley_types::errors::AuthError;

use crate::error::ApiError;

/// Username -> Argon2id hash records in the `users` table.
///
/// Hashing and verification are CPU-bound and run on the blocking pool.
#[derive(Clone)]
pub struct CredentialStore {
    db: Arc<Database>,
}

impl CredentialStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub async fn exists(&self, username: &str) -> anyhow::Result<bool> {
        let db = self.db.clone();
        let username = username.to_string();
        let user = tokio::task::spawn_blocking(move || db.get_user_by_username(&username)).await??;
        Ok(user.is_some())
    }

    pub async fn verify(&self, username: &str, password: &str) -> anyhow::Result<bool> {
        match self.check(username, password).await {
            Ok(()) => Ok(true),
            Err(ApiError::Auth(_)) => Ok(false),
            Err(e) => Err(anyhow!(e)),
        }
    }

    /// Like [`verify`](Self::verify), but tells an unknown user apart from a
    /// wrong password.
    pub async fn check(&self, username: &str, password: &str) -> Result<(), ApiError> {
        let db = self.db.clone();
        let username = username.to_string();
        let password = password.to_string();

        tokio::task::spawn_blocking(move || -> Result<(), ApiError> {
            let user = db
                .get_user_by_username(&username)?
                .ok_or(AuthError::UserNotFound)?;

            let parsed_hash = PasswordHash::new(&user.password).map_err(|e| {
                error!("Stored hash for {} is unreadable: {}", username, e);
                anyhow!("unreadable password hash")
            })?;

            Argon2::default()
                .verify_password(password.as_bytes(), &parsed_hash)
                .map_err(|_| AuthError::InvalidCredentials)?;

            Ok(())
        })
        .await
        .context("credential check task failed")?
    }

    /// Create a user with a freshly salted hash. Fails if the username is taken.
    pub async fn provision(&self, username: &str, password: &str) -> anyhow::Result<Uuid> {
        if username.is_empty() || password.is_empty() {
            return Err(anyhow!("username and password must not be empty"));
        }

        let db = self.db.clone();
        let username = username.to_string();
        let password = password.to_string();

        tokio::task::spawn_blocking(move || -> anyhow::Result<Uuid> {
            if db.get_user_by_username(&username)?.is_some() {
                return Err(anyhow!("user '{}' already exists", username));
            }

            // Hash password with Argon2id
            let salt = SaltString::generate(&mut OsRng);
            let password_hash = Argon2::default()
                .hash_password(password.as_bytes(), &salt)
                .map_err(|e| anyhow!("hashing failed: {}", e))?
                .to_string();

            let user_id = Uuid::new_v4();
            db.create_user(&user_id.to_string(), &username, &password_hash)?;
            info!("Provisioned user {}", username);
            Ok(user_id)
        })
        .await?
    }
}
