use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, bail};

use parley_api::sessions::DEFAULT_SESSION_TTL_HOURS;
use parley_gateway::hub::{DEFAULT_HISTORY_LIMIT, DEFAULT_MAX_MESSAGE_LEN};

#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
}

/// Server settings, read from `PARLEY_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub static_dir: PathBuf,
    pub session_ttl: chrono::Duration,
    pub history_limit: u32,
    pub max_message_len: usize,
    /// Both token and chat id must be set; otherwise notifications are off.
    pub telegram: Option<TelegramConfig>,
    pub mirror_messages: bool,
    pub db_ping_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3000,
            db_path: "parley.db".into(),
            static_dir: "public".into(),
            session_ttl: chrono::Duration::hours(DEFAULT_SESSION_TTL_HOURS),
            history_limit: DEFAULT_HISTORY_LIMIT,
            max_message_len: DEFAULT_MAX_MESSAGE_LEN,
            telegram: None,
            mirror_messages: false,
            db_ping_interval: Duration::from_secs(300),
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let defaults = Self::default();
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let ttl_hours: i64 = parse_or(&get, "PARLEY_SESSION_TTL_HOURS", DEFAULT_SESSION_TTL_HOURS)?;
        if ttl_hours <= 0 {
            bail!("PARLEY_SESSION_TTL_HOURS must be positive, got {}", ttl_hours);
        }

        let history_limit: u32 = parse_or(&get, "PARLEY_HISTORY_LIMIT", defaults.history_limit)?;
        if history_limit > DEFAULT_HISTORY_LIMIT {
            bail!(
                "PARLEY_HISTORY_LIMIT must be at most {}, got {}",
                DEFAULT_HISTORY_LIMIT,
                history_limit
            );
        }

        let max_message_len: usize =
            parse_or(&get, "PARLEY_MAX_MESSAGE_LEN", defaults.max_message_len)?;
        if max_message_len == 0 {
            bail!("PARLEY_MAX_MESSAGE_LEN must be positive");
        }

        // tokio::time::interval panics on a zero period.
        let ping_secs: u64 =
            parse_or(&get, "PARLEY_DB_PING_SECS", defaults.db_ping_interval.as_secs())?;
        if ping_secs == 0 {
            bail!("PARLEY_DB_PING_SECS must be positive");
        }

        let telegram = match (get("PARLEY_TELEGRAM_BOT_TOKEN"), get("PARLEY_TELEGRAM_CHAT_ID")) {
            (Some(bot_token), Some(chat_id)) => Some(TelegramConfig { bot_token, chat_id }),
            _ => None,
        };

        Ok(Self {
            host: get("PARLEY_HOST").unwrap_or(defaults.host),
            port: parse_or(&get, "PARLEY_PORT", defaults.port)?,
            db_path: get("PARLEY_DB_PATH").map(PathBuf::from).unwrap_or(defaults.db_path),
            static_dir: get("PARLEY_STATIC_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.static_dir),
            session_ttl: chrono::Duration::hours(ttl_hours),
            history_limit,
            max_message_len,
            telegram,
            mirror_messages: parse_or(&get, "PARLEY_MIRROR_MESSAGES", defaults.mirror_messages)?,
            db_ping_interval: Duration::from_secs(ping_secs),
        })
    }
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match get(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} has an invalid value '{}'", name, raw)),
        None => Ok(default),
    }
}
