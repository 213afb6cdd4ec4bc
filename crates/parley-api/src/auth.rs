use std::sync::Arc;

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::HeaderMap,
};
use axum_extra::extract::cookie::CookieJar;
use tracing::{info, warn};

use parley_db::Database;
use parley_gateway::{BroadcastHub, NotificationSink, notify};
use parley_types::api::{LoginRequest, LoginResponse, LogoutResponse, SessionResponse};
use parley_types::errors::{AuthError, SessionError};
use parley_types::models::Session;

use crate::bot::TelegramBot;
use crate::credentials::CredentialStore;
use crate::error::ApiError;
use crate::middleware::{expired_session_cookie, session_cookie, session_token};
use crate::sessions::SessionAuthority;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub credentials: CredentialStore,
    pub sessions: SessionAuthority,
    pub hub: BroadcastHub,
    /// Login alerts; `None` when no sink is configured.
    pub notifier: Option<Arc<dyn NotificationSink>>,
    /// Webhook command handler; `None` unless Telegram is configured.
    pub bot: Option<TelegramBot>,
}

impl AppStateInner {
    /// Verify credentials and issue a session. The login alert is dispatched
    /// only after the decision, and never affects the result.
    pub async fn login(&self, username: &str, password: &str) -> Result<Session, ApiError> {
        self.credentials.check(username, password).await?;
        let session = self.sessions.create(username).await?;

        if let Some(sink) = &self.notifier {
            notify::dispatch(sink.clone(), format!("{} logged in", username));
        }

        Ok(session)
    }
}

pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<(CookieJar, Json<LoginResponse>), ApiError> {
    let req = match body {
        Ok(Json(req)) => req,
        Err(rejection) => {
            warn!("Login body rejected: {}", rejection);
            return Err(AuthError::MissingFields.into());
        }
    };
    let (username, password) = req.fields().ok_or(AuthError::MissingFields)?;

    let session = match state.login(username, password).await {
        Ok(session) => session,
        Err(e) => {
            warn!("Login failed for {}: {}", username, e.code());
            return Err(e);
        }
    };
    info!("{} logged in", session.username);

    let jar = jar.add(session_cookie(session.token.clone()));
    Ok((
        jar,
        Json(LoginResponse {
            success: true,
            username: session.username,
            token: session.token,
        }),
    ))
}

pub async fn session(
    State(state): State<AppState>,
    jar: CookieJar,
    headers: HeaderMap,
) -> Result<Json<SessionResponse>, ApiError> {
    let token = session_token(&jar, &headers).ok_or(SessionError::NotFound)?;
    let session = state
        .sessions
        .current_session(&token)
        .await?
        .ok_or(SessionError::NotFound)?;

    Ok(Json(SessionResponse {
        username: session.username,
    }))
}

pub async fn logout(
    State(state): State<AppState>,
    jar: CookieJar,
    headers: HeaderMap,
) -> Result<(CookieJar, Json<LogoutResponse>), ApiError> {
    if let Some(token) = session_token(&jar, &headers) {
        state.sessions.destroy(&token).await?;
    }

    Ok((
        jar.remove(expired_session_cookie()),
        Json(LogoutResponse { success: true }),
    ))
}
