//! Inbound side of the Telegram bot: the webhook Telegram posts updates to.

use std::sync::Arc;

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::auth::AppState;
use crate::notify::TelegramNotifier;

const START_REPLY: &str = "Hello! The bot is running. Send /help for help.";
const HELP_REPLY: &str = "This is the Parley chat bot. /start - start, /help - help.";

/// The subset of a Bot API `Update` the bot reads.
#[derive(Debug, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<IncomingMessage>,
}

#[derive(Debug, Deserialize)]
pub struct IncomingMessage {
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotCommand {
    Start,
    Help,
}

impl BotCommand {
    /// `/start`, `/help`, and their `@botname` forms. Anything after the
    /// first word is ignored.
    pub fn parse(text: &str) -> Option<Self> {
        let word = text.split_whitespace().next()?;
        let name = word.strip_prefix('/')?;
        let name = name.split_once('@').map_or(name, |(name, _)| name);
        match name {
            "start" => Some(Self::Start),
            "help" => Some(Self::Help),
            _ => None,
        }
    }

    pub fn reply(&self) -> &'static str {
        match self {
            Self::Start => START_REPLY,
            Self::Help => HELP_REPLY,
        }
    }
}

pub struct TelegramBot {
    client: Arc<TelegramNotifier>,
    webhook_path: String,
}

impl TelegramBot {
    pub fn new(client: Arc<TelegramNotifier>, bot_token: &str) -> Self {
        Self {
            client,
            webhook_path: format!("/bot{}", bot_token),
        }
    }

    /// Route Telegram is configured to post updates to.
    pub fn webhook_path(&self) -> &str {
        &self.webhook_path
    }

    /// Answer a command update. The reply is sent in the background and a
    /// failure is only logged.
    pub fn handle(&self, update: Update) -> Option<BotCommand> {
        let message = update.message?;
        let command = BotCommand::parse(message.text.as_deref()?)?;

        let client = self.client.clone();
        let chat_id = message.chat.id.to_string();
        tokio::spawn(async move {
            if let Err(e) = client.send_message(&chat_id, command.reply()).await {
                warn!("Bot reply to chat {} failed: {}", chat_id, e);
            }
        });

        Some(command)
    }
}

/// Always 200 once routed, so Telegram does not redeliver updates we cannot use.
pub async fn webhook(
    State(state): State<AppState>,
    body: Result<Json<Update>, JsonRejection>,
) -> StatusCode {
    let Some(bot) = &state.bot else {
        return StatusCode::NOT_FOUND;
    };

    match body {
        Ok(Json(update)) => {
            let update_id = update.update_id;
            match bot.handle(update) {
                Some(command) => info!("Bot answered {:?} (update {})", command, update_id),
                None => debug!("Bot ignored update {}", update_id),
            }
        }
        Err(rejection) => warn!("Webhook body rejected: {}", rejection),
    }

    StatusCode::OK
}
