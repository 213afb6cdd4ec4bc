use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use parley_types::errors::NotificationError;

/// Best-effort outbound notification channel.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, text: &str) -> Result<(), NotificationError>;
}

/// Fire-and-forget delivery. Failures are logged and dropped; the caller
/// never waits on the sink.
pub fn dispatch(sink: Arc<dyn NotificationSink>, text: String) {
    tokio::spawn(async move {
        match sink.notify(&text).await {
            Ok(()) => debug!("Notification delivered"),
            Err(e) => warn!("Notification dropped: {}", e),
        }
    });
}
