pub mod config;
pub mod maintenance;

use std::path::Path;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{State, WebSocketUpgrade},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
};
use axum_extra::extract::cookie::CookieJar;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use parley_api::auth::{self, AppState, AppStateInner};
use parley_api::bot::{self, TelegramBot};
use parley_api::credentials::CredentialStore;
use parley_api::middleware::session_token;
use parley_api::notify::TelegramNotifier;
use parley_api::sessions::SessionAuthority;
use parley_db::Database;
use parley_gateway::{BroadcastHub, HubConfig, NotificationSink, SqliteMessageLog, connection};
use parley_types::api::HealthResponse;

use crate::config::Config;

/// Wire the collaborators together around one database.
pub fn build_state(db: Arc<Database>, config: &Config) -> anyhow::Result<AppState> {
    let (notifier, bot): (Option<Arc<dyn NotificationSink>>, Option<TelegramBot>) =
        match &config.telegram {
            Some(telegram) => {
                info!("Telegram notifications enabled for chat {}", telegram.chat_id);
                let client = Arc::new(TelegramNotifier::new(
                    &telegram.bot_token,
                    telegram.chat_id.clone(),
                )?);
                let telegram_bot = TelegramBot::new(client.clone(), &telegram.bot_token);
                (Some(client as Arc<dyn NotificationSink>), Some(telegram_bot))
            }
            None => {
                info!("Telegram notifications disabled");
                (None, None)
            }
        };

    let mirror = if config.mirror_messages {
        notifier.clone()
    } else {
        None
    };

    let hub = BroadcastHub::new(
        Arc::new(SqliteMessageLog::new(db.clone())),
        HubConfig {
            history_limit: config.history_limit,
            max_message_len: config.max_message_len,
            mirror,
        },
    );

    Ok(Arc::new(AppStateInner {
        credentials: CredentialStore::new(db.clone()),
        sessions: SessionAuthority::new(db.clone(), config.session_ttl),
        hub,
        notifier,
        bot,
        db,
    }))
}

pub fn build_router(state: AppState, static_dir: &Path) -> Router {
    let mut router: Router<AppState> = Router::new()
        .route("/login", post(auth::login))
        .route("/session", get(auth::session))
        .route("/logout", get(auth::logout))
        .route("/ws", get(ws_upgrade))
        .route("/health", get(health));

    // The path embeds the bot token, so it only exists when one is configured.
    if let Some(telegram_bot) = &state.bot {
        router = router.route(telegram_bot.webhook_path(), post(bot::webhook));
    }

    router
        .fallback_service(ServeDir::new(static_dir))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// The session is resolved once here, from the same cookie the HTTP
/// endpoints use; the channel never looks it up again.
async fn ws_upgrade(
    State(state): State<AppState>,
    jar: CookieJar,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let username = match session_token(&jar, &headers) {
        Some(token) => state.sessions.authenticate(&token).await,
        None => None,
    };
    let hub = state.hub.clone();

    ws.on_upgrade(move |socket| connection::handle_connection(socket, hub, username))
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let db = state.db.clone();
    let alive = match tokio::task::spawn_blocking(move || db.ping()).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            error!("Health check: database ping failed: {:#}", e);
            false
        }
        Err(e) => {
            error!("Health check task failed: {}", e);
            false
        }
    };

    let (status, label) = if alive {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
    };
    (
        status,
        Json(HealthResponse {
            status: label.to_string(),
        }),
    )
}

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, header};
    use tower::ServiceExt;

    use super::*;
    use crate::config::TelegramConfig;

    async fn app() -> Router {
        app_with(Config::default()).await
    }

    async fn app_with(config: Config) -> Router {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let state = build_state(db, &config).unwrap();
        state.credentials.provision("alice", "secret").await.unwrap();
        build_router(state, Path::new("public"))
    }

    async fn body_json(resp: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn login_request(body: &str) -> Request<Body> {
        Request::post("/login")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_login_sets_session_cookie() {
        let resp = app()
            .await
            .oneshot(login_request(r#"{"username":"alice","password":"secret"}"#))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        let cookie = resp.headers()[header::SET_COOKIE].to_str().unwrap().to_string();
        assert!(cookie.starts_with("parley_session="));
        assert!(cookie.contains("HttpOnly"));

        let body = body_json(resp).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["username"], "alice");
    }

    #[tokio::test]
    async fn test_login_failures_are_machine_readable() {
        let cases = [
            (r#"{"username":"alice"}"#, StatusCode::BAD_REQUEST, "MissingFields"),
            ("not json", StatusCode::BAD_REQUEST, "MissingFields"),
            (r#"{"username":"mallory","password":"x"}"#, StatusCode::UNAUTHORIZED, "UserNotFound"),
            (r#"{"username":"alice","password":"x"}"#, StatusCode::UNAUTHORIZED, "InvalidCredentials"),
        ];

        let app = app().await;
        for (body, status, code) in cases {
            let resp = app.clone().oneshot(login_request(body)).await.unwrap();
            assert_eq!(resp.status(), status, "body {}", body);
            assert_eq!(body_json(resp).await["error"], code);
        }
    }

    #[tokio::test]
    async fn test_session_without_cookie_is_unauthorized() {
        let resp = app()
            .await
            .oneshot(Request::get("/session").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(resp).await["error"], "NotFound");
    }

    #[tokio::test]
    async fn test_logout_without_session_succeeds() {
        let resp = app()
            .await
            .oneshot(Request::get("/logout").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["success"], true);
    }

    #[tokio::test]
    async fn test_health() {
        let resp = app()
            .await
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["status"], "ok");
    }

    fn webhook_request(path: &str, body: &str) -> Request<Body> {
        Request::post(path)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_bot_webhook_is_routed_only_with_a_token() {
        let update = r#"{"update_id":1,"message":{"chat":{"id":5},"text":"hello"}}"#;

        let resp = app()
            .await
            .oneshot(webhook_request("/bot123:abc", update))
            .await
            .unwrap();
        assert_ne!(resp.status(), StatusCode::OK);

        let app = app_with(Config {
            telegram: Some(TelegramConfig {
                bot_token: "123:abc".into(),
                chat_id: "-100".into(),
            }),
            ..Config::default()
        })
        .await;

        let resp = app
            .clone()
            .oneshot(webhook_request("/bot123:abc", update))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        // Unparseable updates are still acknowledged.
        let resp = app
            .clone()
            .oneshot(webhook_request("/bot123:abc", "not json"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = app
            .oneshot(webhook_request("/bot999:wrong", update))
            .await
            .unwrap();
        assert_ne!(resp.status(), StatusCode::OK);
    }
}
