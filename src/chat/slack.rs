//! Slack Web API client
//!
//! Files go through the external upload flow:
//! `files.getUploadURLExternal` → POST bytes → `files.completeUploadExternal`.

use super::{ChatClient, ChatError};
use crate::http::{check_status, create_http_client};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client as HttpClient;
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

const SLACK_API_BASE: &str = "https://slack.com/api";

/// Checks the `ok` flag every Slack Web API response carries.
///
/// # Errors
///
/// Returns `ChatError::Api` with Slack's error code when `ok` is false, or
/// when the body is not a Slack response at all.
pub fn parse_ack(body: &str) -> Result<Value, ChatError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| ChatError::Api(format!("unexpected response: {e}")))?;
    if value.get("ok").and_then(Value::as_bool) == Some(true) {
        Ok(value)
    } else {
        let error = value
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unknown_error");
        Err(ChatError::Api(error.to_string()))
    }
}

/// Slack bot client
pub struct SlackClient {
    http: HttpClient,
    token: String,
    api_base: String,
}

impl SlackClient {
    /// Create a client authenticated with a bot token.
    #[must_use]
    pub fn new(token: String, timeout: Duration) -> Self {
        Self {
            http: create_http_client(timeout, "doorbell-relay"),
            token,
            api_base: SLACK_API_BASE.to_string(),
        }
    }

    async fn call(&self, method: &str, params: &[(&str, &str)]) -> Result<Value, ChatError> {
        let response = self
            .http
            .post(format!("{}/{method}", self.api_base))
            .bearer_auth(&self.token)
            .form(params)
            .send()
            .await?;
        let response = check_status(response)
            .await
            .map_err(|(_, message)| ChatError::Api(message))?;
        parse_ack(&response.text().await?)
    }
}

#[async_trait]
impl ChatClient for SlackClient {
    async fn upload_file(
        &self,
        channel: &str,
        path: &Path,
        title: &str,
        caption: &str,
    ) -> Result<(), ChatError> {
        let data = tokio::fs::read(path).await?;
        let filename = path
            .file_name()
            .map_or_else(|| "video.mp4".to_string(), |n| n.to_string_lossy().into_owned());
        let length = data.len().to_string();

        let ticket = self
            .call(
                "files.getUploadURLExternal",
                &[("filename", filename.as_str()), ("length", length.as_str())],
            )
            .await?;
        let upload_url = ticket
            .get("upload_url")
            .and_then(Value::as_str)
            .ok_or_else(|| ChatError::Api("missing upload_url".to_string()))?;
        let file_id = ticket
            .get("file_id")
            .and_then(Value::as_str)
            .ok_or_else(|| ChatError::Api("missing file_id".to_string()))?;

        debug!(file_id, bytes = data.len(), "Uploading file bytes to Slack");
        let form = Form::new().part("file", Part::bytes(data).file_name(filename));
        let response = self.http.post(upload_url).multipart(form).send().await?;
        check_status(response)
            .await
            .map_err(|(_, message)| ChatError::Api(message))?;

        let files = json!([{ "id": file_id, "title": title }]).to_string();
        self.call(
            "files.completeUploadExternal",
            &[
                ("files", files.as_str()),
                ("channel_id", channel),
                ("initial_comment", caption),
            ],
        )
        .await?;
        Ok(())
    }

    async fn post_message(&self, channel: &str, text: &str) -> Result<(), ChatError> {
        self.call("chat.postMessage", &[("channel", channel), ("text", text)])
            .await?;
        Ok(())
    }
}
