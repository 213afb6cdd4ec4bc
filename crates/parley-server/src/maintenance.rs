use std::time::Duration;

use tracing::{error, info};

use parley_api::auth::AppState;

/// Background task that checks the database is alive and prunes expired
/// sessions, once per `interval`.
pub async fn run_maintenance_loop(state: AppState, interval: Duration) {
    let mut interval = tokio::time::interval(interval);

    loop {
        interval.tick().await;

        let db = state.db.clone();
        match tokio::task::spawn_blocking(move || db.ping()).await {
            Ok(Ok(())) => info!("Database ping ok"),
            Ok(Err(e)) => error!("Database ping failed: {:#}", e),
            Err(e) => error!("Database ping task failed: {}", e),
        }

        match state.sessions.prune_expired().await {
            Ok(count) => {
                if count > 0 {
                    info!("Maintenance: pruned {} expired sessions", count);
                }
            }
            Err(e) => {
                error!("Session prune error: {:#}", e);
            }
        }
    }
}
