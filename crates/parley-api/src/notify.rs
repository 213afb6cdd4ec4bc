use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use parley_gateway::NotificationSink;
use parley_types::errors::NotificationError;

const TELEGRAM_API: &str = "https://api.telegram.org";

/// Outbound requests give up after this long; the sink is best-effort.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
}

/// Posts notices to a Telegram chat through the Bot API `sendMessage` method.
pub struct TelegramNotifier {
    client: reqwest::Client,
    endpoint: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(bot_token: &str, chat_id: String) -> anyhow::Result<Self> {
        Self::with_base_url(&format!("{}/bot{}", TELEGRAM_API, bot_token), chat_id)
    }

    /// `base_url` is everything before `/sendMessage`.
    pub fn with_base_url(base_url: &str, chat_id: String) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/sendMessage", base_url.trim_end_matches('/')),
            chat_id,
        })
    }

    /// Send `text` to an arbitrary chat, e.g. a reply to a bot command.
    pub async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), NotificationError> {
        self.client
            .post(&self.endpoint)
            .json(&SendMessage { chat_id, text })
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            // reqwest errors embed the URL, which carries the bot token.
            .map_err(|e| NotificationError::Unreachable(e.without_url().to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl NotificationSink for TelegramNotifier {
    async fn notify(&self, text: &str) -> Result<(), NotificationError> {
        self.send_message(&self.chat_id, text).await
    }
}
