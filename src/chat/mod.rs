//! Chat platform clients
//!
//! The notifier only needs two calls from a chat platform, described by
//! [`ChatClient`]. Slack is the default backend; Telegram is available for
//! teams that live there.

pub mod slack;
pub mod telegram;

pub use slack::SlackClient;
pub use telegram::TelegramClient;

use crate::config::ChatSettings;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while talking to a chat platform
#[derive(Error, Debug)]
pub enum ChatError {
    /// The platform answered but did not acknowledge the request
    #[error("API error: {0}")]
    Api(String),
    /// Connectivity issues
    #[error("Network error: {0}")]
    Network(String),
    /// Reading the local file failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Channel identifier not usable by this backend
    #[error("Invalid channel: {0}")]
    InvalidChannel(String),
}

impl From<reqwest::Error> for ChatError {
    fn from(e: reqwest::Error) -> Self {
        Self::Network(e.to_string())
    }
}

/// Minimal chat platform surface
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Upload a file with a title and an accompanying comment
    async fn upload_file(
        &self,
        channel: &str,
        path: &Path,
        title: &str,
        caption: &str,
    ) -> Result<(), ChatError>;

    /// Post a plain text message
    async fn post_message(&self, channel: &str, text: &str) -> Result<(), ChatError>;
}

/// Build the client for the configured backend.
#[must_use]
pub fn client_for(settings: &ChatSettings, timeout: Duration) -> Arc<dyn ChatClient> {
    match settings {
        ChatSettings::Slack { token, .. } => Arc::new(SlackClient::new(token.clone(), timeout)),
        ChatSettings::Telegram { token, .. } => Arc::new(TelegramClient::new(token.clone())),
    }
}
