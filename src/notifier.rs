//! Delivery of recordings and text notifications to the chat channel
//!
//! The local video is removed only once the platform acknowledged the upload;
//! on any failure it stays on disk for manual recovery.

use crate::chat::ChatClient;
use chrono::{DateTime, TimeZone};
use std::fmt::Display;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Timestamp format used in captions
pub const CAPTION_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Capitalize the first letter of an event kind (`motion` → `Motion`).
fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect()
    })
}

/// Title shown above the video
#[must_use]
pub fn video_title(device_name: &str, event_kind: &str) -> String {
    format!("🔔 {device_name} - {}", capitalize(event_kind))
}

/// Title plus a human-readable time and an optional extra line
#[must_use]
pub fn video_caption<Tz>(
    device_name: &str,
    event_kind: &str,
    timestamp: &DateTime<Tz>,
    message: Option<&str>,
) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let mut caption = format!(
        "{}\n📅 {}",
        video_title(device_name, event_kind),
        timestamp.format(CAPTION_TIME_FORMAT)
    );
    if let Some(message) = message.filter(|m| !m.is_empty()) {
        caption.push('\n');
        caption.push_str(message);
    }
    caption
}

/// Sends recordings and messages to one fixed channel
#[derive(Clone)]
pub struct Notifier {
    client: Arc<dyn ChatClient>,
    channel_id: String,
}

impl Notifier {
    /// Create a notifier posting to `channel_id`.
    #[must_use]
    pub fn new(client: Arc<dyn ChatClient>, channel_id: impl Into<String>) -> Self {
        Self {
            client,
            channel_id: channel_id.into(),
        }
    }

    /// Destination channel
    #[must_use]
    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    /// Upload a recording with its caption.
    ///
    /// Returns `true` once the platform acknowledged the upload and the local
    /// file was removed. A missing file, an API error or a transport error
    /// return `false` and leave the file untouched.
    pub async fn send_video<Tz>(
        &self,
        video_path: &Path,
        device_name: &str,
        event_kind: &str,
        timestamp: &DateTime<Tz>,
        message: Option<&str>,
    ) -> bool
    where
        Tz: TimeZone,
        Tz::Offset: Display,
    {
        if !video_path.exists() {
            error!(path = %video_path.display(), "❌ Video file not found");
            return false;
        }

        let title = video_title(device_name, event_kind);
        let caption = video_caption(device_name, event_kind, timestamp, message);

        info!(channel = %self.channel_id, "💬 Uploading video to channel...");
        match self
            .client
            .upload_file(&self.channel_id, video_path, &title, &caption)
            .await
        {
            Ok(()) => {
                info!("✅ Video uploaded successfully");
                match tokio::fs::remove_file(video_path).await {
                    Ok(()) => info!(path = %video_path.display(), "🗑️ Cleaned up local video file"),
                    Err(e) => warn!(path = %video_path.display(), "Failed to remove video: {e}"),
                }
                true
            }
            Err(e) => {
                error!("❌ Failed to upload video: {e}");
                false
            }
        }
    }

    /// Post a plain text message, to `channel_override` if given.
    pub async fn send_message(&self, text: &str, channel_override: Option<&str>) -> bool {
        let channel = channel_override.unwrap_or(&self.channel_id);
        match self.client.post_message(channel, text).await {
            Ok(()) => true,
            Err(e) => {
                error!(channel, "❌ Error sending message: {e}");
                false
            }
        }
    }
}
