//! HTTP utilities shared by the vendor and chat clients

use reqwest::{Client as HttpClient, Response, StatusCode};
use std::time::Duration;

/// Maximum number of characters of an error body kept in messages
const MAX_ERROR_BODY_CHARS: usize = 500;

/// Creates an HTTP client with the given request timeout and user agent.
#[must_use]
pub fn create_http_client(timeout: Duration, user_agent: &str) -> HttpClient {
    HttpClient::builder()
        .timeout(timeout)
        .user_agent(user_agent.to_string())
        .build()
        .unwrap_or_else(|_| HttpClient::new())
}

/// Turns a non-success response into a short, log-friendly message.
///
/// Returns the response back untouched on success.
///
/// # Errors
///
/// Returns the status code and a cleaned-up description of the body.
pub async fn check_status(response: Response) -> Result<Response, (StatusCode, String)> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err((status, describe_error_body(status, &body)))
}

/// Formats an error body, hiding HTML error pages from proxies and
/// truncating long payloads.
#[must_use]
pub fn describe_error_body(status: StatusCode, body: &str) -> String {
    let trimmed = body.trim_start();
    let is_html = trimmed.starts_with("<!DOCTYPE")
        || trimmed.starts_with("<html")
        || trimmed.starts_with("<HTML");

    if is_html {
        format!("{status} (Server returned HTML error page)")
    } else if body.chars().count() > MAX_ERROR_BODY_CHARS {
        format!("{status} - {}... (truncated)", truncate_str(body, MAX_ERROR_BODY_CHARS))
    } else if body.is_empty() {
        status.to_string()
    } else {
        format!("{status} - {body}")
    }
}

/// Truncates a string to at most `max_chars` characters.
#[must_use]
pub fn truncate_str(s: impl AsRef<str>, max_chars: usize) -> String {
    s.as_ref().chars().take(max_chars).collect()
}
