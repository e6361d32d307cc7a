//! Telegram Bot API client

use super::{ChatClient, ChatError};
use async_trait::async_trait;
use std::path::Path;
use teloxide::prelude::*;
use teloxide::types::{ChatId, InputFile};
use teloxide::RequestError;

/// Telegram caption limit
const MAX_CAPTION_CHARS: usize = 1024;

impl From<RequestError> for ChatError {
    fn from(e: RequestError) -> Self {
        match e {
            RequestError::Api(api) => Self::Api(api.to_string()),
            RequestError::Io(io) => Self::Io(std::io::Error::other(io.to_string())),
            other => Self::Network(other.to_string()),
        }
    }
}

fn parse_chat_id(channel: &str) -> Result<ChatId, ChatError> {
    channel
        .trim()
        .parse::<i64>()
        .map(ChatId)
        .map_err(|_| ChatError::InvalidChannel(channel.to_string()))
}

/// Telegram bot client
pub struct TelegramClient {
    bot: Bot,
}

impl TelegramClient {
    /// Create a client for the given bot token.
    #[must_use]
    pub fn new(token: String) -> Self {
        Self {
            bot: Bot::new(token),
        }
    }
}

#[async_trait]
impl ChatClient for TelegramClient {
    async fn upload_file(
        &self,
        channel: &str,
        path: &Path,
        _title: &str,
        caption: &str,
    ) -> Result<(), ChatError> {
        let chat_id = parse_chat_id(channel)?;
        // The title is already the first caption line
        let caption = crate::http::truncate_str(caption, MAX_CAPTION_CHARS);
        self.bot
            .send_video(chat_id, InputFile::file(path.to_path_buf()))
            .caption(caption)
            .await?;
        Ok(())
    }

    async fn post_message(&self, channel: &str, text: &str) -> Result<(), ChatError> {
        let chat_id = parse_chat_id(channel)?;
        self.bot.send_message(chat_id, text.to_string()).await?;
        Ok(())
    }
}
