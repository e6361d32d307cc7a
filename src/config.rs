//! Configuration and settings management
//!
//! Loads settings from environment variables (and optional `config/*` files)
//! and defines the runtime constants of the relay.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Interval between two polling ticks
pub const POLL_INTERVAL_SECS: u64 = 2;
/// Directory where downloaded recordings are stored until delivered
pub const VIDEO_DIR: &str = "videos";
/// Location of the single-entry token cache
pub const TOKEN_CACHE_PATH: &str = ".cache/token.cache";
/// User agent reported to the doorbell vendor
pub const USER_AGENT: &str = "slack-bot";
/// Default timeout for outgoing HTTP requests
pub const HTTP_TIMEOUT_SECS: u64 = 120;

/// Errors raised while resolving settings
#[derive(Error, Debug)]
pub enum SettingsError {
    /// The configuration sources could not be read
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    /// A required value is absent or empty
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    /// A value is present but cannot be used
    #[error("Invalid value for {name}: {reason}")]
    Invalid {
        /// Environment variable name
        name: &'static str,
        /// Human readable reason
        reason: String,
    },
}

/// Ring account credentials
#[derive(Clone)]
pub struct RingSettings {
    /// Account e-mail
    pub username: String,
    /// Account password
    pub password: String,
    /// One-time code for accounts with two-factor authentication
    pub otp: Option<String>,
    /// User agent reported to the vendor API
    pub user_agent: String,
}

impl std::fmt::Debug for RingSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingSettings")
            .field("username", &self.username)
            .field("password", &"[MASKED]")
            .field("otp", &self.otp.as_ref().map(|_| "[MASKED]"))
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

/// Destination chat platform and its credentials
#[derive(Clone, PartialEq, Eq)]
pub enum ChatSettings {
    /// Slack bot token and channel ID
    Slack {
        /// `xoxb-` bot token
        token: String,
        /// Channel ID (e.g. `C0123456789`)
        channel_id: String,
    },
    /// Telegram bot token and chat ID
    Telegram {
        /// Bot API token
        token: String,
        /// Numeric chat ID, kept as text for the channel abstraction
        chat_id: String,
    },
}

impl ChatSettings {
    /// Destination channel identifier
    #[must_use]
    pub fn channel_id(&self) -> &str {
        match self {
            Self::Slack { channel_id, .. } => channel_id,
            Self::Telegram { chat_id, .. } => chat_id,
        }
    }

    /// Short backend name for logs
    #[must_use]
    pub const fn backend_name(&self) -> &'static str {
        match self {
            Self::Slack { .. } => "slack",
            Self::Telegram { .. } => "telegram",
        }
    }
}

impl std::fmt::Debug for ChatSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatSettings")
            .field("backend", &self.backend_name())
            .field("channel_id", &self.channel_id())
            .finish_non_exhaustive()
    }
}

/// Validated application settings
#[derive(Debug, Clone)]
pub struct Settings {
    /// Ring credentials
    pub ring: RingSettings,
    /// Chat destination
    pub chat: ChatSettings,
    /// Delay between polling ticks
    pub poll_interval: Duration,
    /// Directory for downloaded recordings
    pub video_dir: PathBuf,
    /// Token cache file
    pub token_cache_path: PathBuf,
    /// Timeout applied to vendor and chat HTTP requests
    pub http_timeout: Duration,
}

/// Raw values as they come out of the configuration sources
#[derive(Debug, Deserialize, Default)]
struct RawSettings {
    ring_username: Option<String>,
    ring_password: Option<String>,
    ring_otp: Option<String>,
    ring_user_agent: Option<String>,
    chat_backend: Option<String>,
    slack_bot_token: Option<String>,
    slack_channel_id: Option<String>,
    telegram_bot_token: Option<String>,
    telegram_chat_id: Option<String>,
    poll_interval_secs: Option<u64>,
    video_dir: Option<String>,
    token_cache_path: Option<String>,
    http_timeout_secs: Option<u64>,
}

/// Builds the layered configuration source.
///
/// # Errors
///
/// Returns a `ConfigError` if a present configuration file cannot be parsed.
pub fn build_config() -> Result<Config, ConfigError> {
    let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

    Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
        // Not checked into git
        .add_source(File::with_name("config/local").required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        // UPPER_SNAKE_CASE is mapped to snake_case; empty values count as unset
        .add_source(Environment::default().ignore_empty(true))
        .build()
}

impl Settings {
    /// Load and validate settings from the environment and config files.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError::Missing` naming the first absent variable.
    pub fn new() -> Result<Self, SettingsError> {
        Self::from_config(build_config()?)
    }

    /// Validate settings from an already built configuration.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError` if a required value is missing or malformed.
    pub fn from_config(config: Config) -> Result<Self, SettingsError> {
        let raw: RawSettings = config.try_deserialize()?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawSettings) -> Result<Self, SettingsError> {
        let ring = RingSettings {
            username: required(raw.ring_username, "RING_USERNAME")?,
            password: required(raw.ring_password, "RING_PASSWORD")?,
            otp: non_empty(raw.ring_otp),
            user_agent: non_empty(raw.ring_user_agent).unwrap_or_else(|| USER_AGENT.to_string()),
        };

        let backend = non_empty(raw.chat_backend).unwrap_or_else(|| "slack".to_string());
        let chat = match backend.to_ascii_lowercase().as_str() {
            "slack" => ChatSettings::Slack {
                token: required(raw.slack_bot_token, "SLACK_BOT_TOKEN")?,
                channel_id: required(raw.slack_channel_id, "SLACK_CHANNEL_ID")?,
            },
            "telegram" => {
                let token = required(raw.telegram_bot_token, "TELEGRAM_BOT_TOKEN")?;
                let chat_id = required(raw.telegram_chat_id, "TELEGRAM_CHAT_ID")?;
                if chat_id.parse::<i64>().is_err() {
                    return Err(SettingsError::Invalid {
                        name: "TELEGRAM_CHAT_ID",
                        reason: format!("'{chat_id}' is not a numeric chat id"),
                    });
                }
                ChatSettings::Telegram { token, chat_id }
            }
            other => {
                return Err(SettingsError::Invalid {
                    name: "CHAT_BACKEND",
                    reason: format!("unknown backend '{other}' (expected slack or telegram)"),
                })
            }
        };

        let poll_interval_secs = raw.poll_interval_secs.unwrap_or(POLL_INTERVAL_SECS);
        if poll_interval_secs == 0 {
            return Err(SettingsError::Invalid {
                name: "POLL_INTERVAL_SECS",
                reason: "must be at least 1".to_string(),
            });
        }
        let http_timeout_secs = raw.http_timeout_secs.unwrap_or(HTTP_TIMEOUT_SECS);
        if http_timeout_secs == 0 {
            return Err(SettingsError::Invalid {
                name: "HTTP_TIMEOUT_SECS",
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            ring,
            chat,
            poll_interval: Duration::from_secs(poll_interval_secs),
            video_dir: PathBuf::from(non_empty(raw.video_dir).unwrap_or_else(|| VIDEO_DIR.into())),
            token_cache_path: PathBuf::from(
                non_empty(raw.token_cache_path).unwrap_or_else(|| TOKEN_CACHE_PATH.into()),
            ),
            http_timeout: Duration::from_secs(http_timeout_secs),
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required(value: Option<String>, name: &'static str) -> Result<String, SettingsError> {
    non_empty(value).ok_or(SettingsError::Missing(name))
}
