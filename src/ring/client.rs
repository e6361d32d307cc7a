//! reqwest implementation of the Ring REST and OAuth endpoints
//!
//! Only the handful of calls the relay needs are implemented.

use super::auth::{Auth, OAuthApi};
use super::token_cache::AuthToken;
use super::{Device, DoorbellSession, Recording, RecordingId, RingError};
use crate::http::check_status;
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{Client as HttpClient, RequestBuilder, Response, StatusCode};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

const OAUTH_ENDPOINT: &str = "https://oauth.ring.com/oauth/token";
const API_BASE: &str = "https://api.ring.com";
const OAUTH_CLIENT_ID: &str = "ring_official_android";
const API_VERSION: &str = "11";

/// Device groups that carry a camera, in the order they are listed
const VIDEO_DEVICE_GROUPS: &[&str] = &["doorbots", "authorized_doorbots", "stickup_cams"];

/// Maps a failed token request to the error kind the caller acts on.
#[must_use]
pub fn classify_oauth_failure(status: StatusCode, message: String) -> RingError {
    match status {
        StatusCode::PRECONDITION_FAILED => RingError::Requires2fa,
        StatusCode::TOO_MANY_REQUESTS => RingError::RateLimited(message),
        StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            RingError::Authentication(message)
        }
        _ => RingError::Api(message),
    }
}

/// Returns the hardware ID stored in `path`, creating one if needed.
///
/// The vendor ties sessions to this ID, so it is kept next to the token cache.
#[must_use]
pub fn load_or_create_hardware_id(path: &Path) -> String {
    if let Ok(existing) = std::fs::read_to_string(path) {
        let existing = existing.trim();
        if !existing.is_empty() {
            return existing.to_string();
        }
    }
    let id = uuid::Uuid::new_v4().to_string();
    let written = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or(Ok(()), std::fs::create_dir_all)
        .and_then(|()| std::fs::write(path, &id));
    if let Err(e) = written {
        warn!(path = %path.display(), "Could not persist hardware id: {e}");
    }
    id
}

/// Ring OAuth token endpoint
pub struct RingOAuth {
    http: HttpClient,
    hardware_id: String,
    endpoint: String,
}

impl RingOAuth {
    /// Create a token client using the shared HTTP client.
    #[must_use]
    pub fn new(http: HttpClient, hardware_id: String) -> Self {
        Self {
            http,
            hardware_id,
            endpoint: OAUTH_ENDPOINT.to_string(),
        }
    }

    /// Send token requests to `endpoint` instead of the Ring OAuth server.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    async fn request_token(
        &self,
        body: Value,
        otp: Option<&str>,
    ) -> Result<AuthToken, RingError> {
        let mut request = self
            .http
            .post(&self.endpoint)
            .header("2fa-support", "true")
            .header("hardware_id", &self.hardware_id)
            .json(&body);
        if let Some(code) = otp {
            request = request.header("2fa-code", code);
        }

        let response = request.send().await?;
        let response = check_status(response)
            .await
            .map_err(|(status, message)| classify_oauth_failure(status, message))?;
        let text = response.text().await?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[async_trait]
impl OAuthApi for RingOAuth {
    async fn fetch_token(
        &self,
        username: &str,
        password: &str,
        otp: Option<&str>,
    ) -> Result<AuthToken, RingError> {
        debug!(otp = otp.is_some(), "Requesting token with password grant");
        let body = json!({
            "client_id": OAUTH_CLIENT_ID,
            "grant_type": "password",
            "scope": "client",
            "username": username,
            "password": password,
        });
        self.request_token(body, otp).await
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<AuthToken, RingError> {
        debug!("Requesting token with refresh grant");
        let body = json!({
            "client_id": OAUTH_CLIENT_ID,
            "grant_type": "refresh_token",
            "scope": "client",
            "refresh_token": refresh_token,
        });
        self.request_token(body, None).await
    }
}

/// Extracts the camera devices from a `ring_devices` payload.
#[must_use]
pub fn parse_video_devices(payload: &Value) -> Vec<Device> {
    VIDEO_DEVICE_GROUPS
        .iter()
        .filter_map(|group| payload.get(*group).and_then(Value::as_array))
        .flatten()
        .filter_map(|attrs| {
            let id = attrs.get("id").and_then(Value::as_u64)?;
            let name = attrs
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or("Unnamed device")
                .to_string();
            let has_subscription = attrs
                .pointer("/features/show_recordings")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            Some(Device {
                id,
                name,
                has_subscription,
            })
        })
        .collect()
}

/// Extracts the newest entry of a `history?limit=1` payload.
#[must_use]
pub fn parse_latest_recording(payload: &Value) -> Option<Recording> {
    let entry = payload.as_array()?.first()?;
    let id = entry.get("id").and_then(Value::as_u64)?;
    let kind = entry
        .get("kind")
        .and_then(Value::as_str)
        .unwrap_or("motion")
        .to_string();
    Some(Recording { id, kind })
}

/// Authenticated Ring API session
pub struct RingSession {
    http: HttpClient,
    auth: Arc<Auth>,
    api_base: String,
    hardware_id: String,
    user_agent: String,
    devices: RwLock<Vec<Device>>,
}

impl RingSession {
    /// Create a session on top of an authenticated handle.
    #[must_use]
    pub fn new(http: HttpClient, auth: Arc<Auth>, hardware_id: String, user_agent: &str) -> Self {
        Self {
            http,
            auth,
            api_base: API_BASE.to_string(),
            hardware_id,
            user_agent: user_agent.to_string(),
            devices: RwLock::new(Vec::new()),
        }
    }

    /// Point the session at another REST base URL (no trailing slash).
    #[must_use]
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    /// Send an authorized request, refreshing the token once on a 401.
    async fn send<F>(&self, build: F) -> Result<Response, RingError>
    where
        F: Fn(&str) -> RequestBuilder + Send + Sync,
    {
        let token = self.auth.access_token().await?;
        let mut response = build(&token).send().await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            info!("🔄 Access token rejected, refreshing...");
            self.auth.refresh().await?;
            let token = self.auth.access_token().await?;
            response = build(&token).send().await?;
        }

        check_status(response)
            .await
            .map_err(|(status, message)| match status {
                StatusCode::UNAUTHORIZED => RingError::Authentication(message),
                _ => RingError::Api(message),
            })
    }

    async fn get_json(&self, path: &str, query: &[(&str, &str)]) -> Result<Value, RingError> {
        let url = format!("{}{path}", self.api_base);
        let response = self
            .send(|token| self.http.get(&url).query(query).bearer_auth(token))
            .await?;
        let text = response.text().await?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[async_trait]
impl DoorbellSession for RingSession {
    async fn create_session(&self) -> Result<(), RingError> {
        let url = format!("{}/clients_api/session", self.api_base);
        let body = json!({
            "device": {
                "hardware_id": self.hardware_id,
                "metadata": {
                    "api_version": API_VERSION,
                    "device_model": format!("ring-doorbell:{}", self.user_agent),
                },
                "os": "android",
            }
        });
        self.send(|token| self.http.post(&url).json(&body).bearer_auth(token))
            .await?;
        debug!("Ring session registered");
        Ok(())
    }

    async fn refresh_data(&self) -> Result<(), RingError> {
        let payload = self.get_json("/clients_api/ring_devices", &[]).await?;
        let devices = parse_video_devices(&payload);
        *self.devices.write().unwrap_or_else(PoisonError::into_inner) = devices;
        Ok(())
    }

    fn video_devices(&self) -> Vec<Device> {
        self.devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn latest_recording(&self, device: &Device) -> Result<Option<Recording>, RingError> {
        let path = format!("/clients_api/doorbots/{}/history", device.id);
        let payload = self.get_json(&path, &[("limit", "1")]).await?;
        Ok(parse_latest_recording(&payload))
    }

    async fn recording_url(
        &self,
        _device: &Device,
        recording_id: RecordingId,
    ) -> Result<String, RingError> {
        let path = format!("/clients_api/dings/{recording_id}/recording");
        let payload = self
            .get_json(&path, &[("disable_redirect", "true")])
            .await?;
        payload
            .get("url")
            .and_then(Value::as_str)
            .map(ToString::to_string)
            .ok_or_else(|| RingError::Api(format!("no url for recording {recording_id}")))
    }

    async fn download_recording(
        &self,
        device: &Device,
        recording_id: RecordingId,
        destination: &Path,
    ) -> Result<(), RingError> {
        // Signed URLs are short-lived; ask for one right before downloading
        let url = self.recording_url(device, recording_id).await?;
        let response = self.http.get(&url).send().await?;
        let response = check_status(response)
            .await
            .map_err(|(_, message)| RingError::Api(message))?;

        if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(destination).await?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            file.write_all(&chunk?).await?;
        }
        file.flush().await?;
        debug!(path = %destination.display(), "Recording {recording_id} written");
        Ok(())
    }

    async fn close(&self) {
        self.auth.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring::TokenCache;
    use std::sync::Mutex;
    use tokio::io::AsyncReadExt;
    use tokio::net::{TcpListener, TcpStream};

    type Requests = Arc<Mutex<Vec<String>>>;

    /// Answers one connection per scripted response and records every raw
    /// request, lowercased.
    async fn scripted_server(responses: Vec<(u16, &'static str)>) -> (String, Requests) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let base = format!("http://{}", listener.local_addr().expect("addr"));
        let requests: Requests = Arc::default();
        let log = requests.clone();
        tokio::spawn(async move {
            for (status, body) in responses {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                let request = read_request(&mut stream).await;
                log.lock().expect("lock").push(request.to_ascii_lowercase());
                let reason = StatusCode::from_u16(status)
                    .ok()
                    .and_then(|s| s.canonical_reason())
                    .unwrap_or("");
                let reply = format!(
                    "HTTP/1.1 {status} {reason}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.write_all(reply.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });
        (base, requests)
    }

    async fn read_request(stream: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0_u8; 4096];
        let mut expected = None;
        loop {
            if let Some(total) = expected {
                if buf.len() >= total {
                    break;
                }
            }
            let n = stream.read(&mut chunk).await.unwrap_or(0);
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            if expected.is_none() {
                if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                    let head = String::from_utf8_lossy(&buf[..end]).to_string();
                    let length = head
                        .lines()
                        .filter_map(|line| line.split_once(':'))
                        .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                        .unwrap_or(0);
                    expected = Some(end + 4 + length);
                }
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    fn test_http() -> HttpClient {
        HttpClient::builder().no_proxy().build().expect("client")
    }

    fn temp_cache() -> TokenCache {
        TokenCache::new(
            std::env::temp_dir()
                .join(format!("doorbell-relay-{}", uuid::Uuid::new_v4()))
                .join("token.cache"),
        )
    }

    fn stale_token() -> AuthToken {
        serde_json::from_value(json!({
            "access_token": "stale",
            "refresh_token": "refresh-1",
            "expires_in": 3600
        }))
        .expect("valid token")
    }

    const FRESH_TOKEN: &str =
        r#"{"access_token":"fresh","refresh_token":"refresh-2","expires_in":3600}"#;
    const DEVICES: &str =
        r#"{"doorbots":[{"id":7,"description":"Front Door","features":{"show_recordings":true}}]}"#;

    fn session_for(base: &str, cache: &TokenCache) -> RingSession {
        let http = test_http();
        let oauth = Arc::new(
            RingOAuth::new(http.clone(), "hw-1".to_string())
                .with_endpoint(format!("{base}/oauth/token")),
        );
        let auth = Arc::new(Auth::new(stale_token(), oauth, cache.updater()));
        RingSession::new(http, auth, "hw-1".to_string(), "slack-bot").with_api_base(base)
    }

    #[tokio::test]
    async fn test_rejected_token_is_refreshed_and_request_retried() {
        let (base, requests) = scripted_server(vec![
            (401, r#"{"error":"unauthorized"}"#),
            (200, FRESH_TOKEN),
            (200, DEVICES),
        ])
        .await;
        let cache = temp_cache();
        let session = session_for(&base, &cache);

        session.refresh_data().await.expect("refresh after retry");

        let requests = requests.lock().expect("lock").clone();
        assert_eq!(requests.len(), 3);
        assert!(requests[0].starts_with("get /clients_api/ring_devices"));
        assert!(requests[0].contains("authorization: bearer stale"));
        assert!(requests[1].starts_with("post /oauth/token"));
        assert!(requests[1].contains(r#""grant_type":"refresh_token""#));
        assert!(requests[1].contains(r#""refresh_token":"refresh-1""#));
        assert!(requests[2].starts_with("get /clients_api/ring_devices"));
        assert!(requests[2].contains("authorization: bearer fresh"));

        assert_eq!(session.video_devices().len(), 1);
        let cached = cache.load().expect("readable").expect("written by updater");
        assert_eq!(cached.access_token, "fresh");
        assert_eq!(cached.refresh_token.as_deref(), Some("refresh-2"));
    }

    #[tokio::test]
    async fn test_second_rejection_is_not_retried() {
        let (base, requests) = scripted_server(vec![
            (401, r#"{"error":"unauthorized"}"#),
            (200, FRESH_TOKEN),
            (401, r#"{"error":"unauthorized"}"#),
        ])
        .await;
        let session = session_for(&base, &temp_cache());

        let err = session.refresh_data().await.err().expect("should fail");

        assert!(matches!(err, RingError::Authentication(_)));
        assert_eq!(requests.lock().expect("lock").len(), 3);
    }

    #[tokio::test]
    async fn test_token_endpoint_status_mapping() {
        let (base, requests) = scripted_server(vec![
            (412, ""),
            (429, r#"{"error":"too many requests"}"#),
            (401, r#"{"error":"invalid_grant"}"#),
            (200, FRESH_TOKEN),
        ])
        .await;
        let oauth =
            RingOAuth::new(test_http(), "hw-1".to_string()).with_endpoint(format!("{base}/oauth/token"));

        let first = oauth.fetch_token("me@example.com", "hunter2", None).await;
        assert!(matches!(first, Err(RingError::Requires2fa)));
        let second = oauth.fetch_token("me@example.com", "hunter2", Some("123456")).await;
        assert!(matches!(second, Err(RingError::RateLimited(_))));
        let third = oauth.fetch_token("me@example.com", "hunter2", Some("123456")).await;
        assert!(matches!(third, Err(RingError::Authentication(_))));
        let token = oauth
            .fetch_token("me@example.com", "hunter2", Some("123456"))
            .await
            .expect("token");
        assert_eq!(token.access_token, "fresh");

        let requests = requests.lock().expect("lock").clone();
        assert!(!requests[0].contains("2fa-code"));
        assert!(requests[0].contains("hardware_id: hw-1"));
        assert!(requests[0].contains(r#""grant_type":"password""#));
        assert!(requests[3].contains("2fa-code: 123456"));
    }

    #[test]
    fn test_video_devices_in_listing_order() {
        let payload = json!({
            "chimes": [{ "id": 1, "description": "Chime" }],
            "stickup_cams": [{ "id": 30, "description": "Garage", "features": {} }],
            "doorbots": [
                { "id": 7, "description": "Front Door", "features": { "show_recordings": false } },
                { "id": 8, "description": "Back Door", "features": { "show_recordings": true } }
            ],
            "authorized_doorbots": [{ "id": 20, "description": "Neighbour" }]
        });

        let devices = parse_video_devices(&payload);
        let ids: Vec<_> = devices.iter().map(|d| d.id).collect();

        assert_eq!(ids, vec![7, 8, 20, 30]);
        assert_eq!(devices[0].name, "Front Door");
        assert!(!devices[0].has_subscription);
        assert!(devices[1].has_subscription);
        assert!(!devices[3].has_subscription);
    }

    #[test]
    fn test_devices_without_id_skipped() {
        let payload = json!({ "doorbots": [{ "description": "Broken" }, { "id": 3 }] });
        let devices = parse_video_devices(&payload);
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].name, "Unnamed device");
    }

    #[test]
    fn test_latest_recording() {
        let payload = json!([
            { "id": 7_000_000_000_123_u64, "kind": "ding", "created_at": "2024-01-01T00:00:00Z" },
            { "id": 1, "kind": "motion" }
        ]);
        assert_eq!(
            parse_latest_recording(&payload),
            Some(Recording {
                id: 7_000_000_000_123,
                kind: "ding".to_string()
            })
        );
        assert_eq!(parse_latest_recording(&json!([])), None);
        assert_eq!(parse_latest_recording(&json!({"error": "x"})), None);
    }

    #[test]
    fn test_oauth_failure_classification() {
        assert!(matches!(
            classify_oauth_failure(StatusCode::PRECONDITION_FAILED, String::new()),
            RingError::Requires2fa
        ));
        assert!(classify_oauth_failure(StatusCode::TOO_MANY_REQUESTS, "slow".into()).is_rate_limited());
        assert!(matches!(
            classify_oauth_failure(StatusCode::UNAUTHORIZED, "nope".into()),
            RingError::Authentication(_)
        ));
        assert!(matches!(
            classify_oauth_failure(StatusCode::INTERNAL_SERVER_ERROR, "boom".into()),
            RingError::Api(_)
        ));
    }

    #[test]
    fn test_hardware_id_is_stable() {
        let path = std::env::temp_dir()
            .join(format!("doorbell-relay-{}", uuid::Uuid::new_v4()))
            .join("hardware_id");
        let first = load_or_create_hardware_id(&path);
        let second = load_or_create_hardware_id(&path);
        assert_eq!(first, second);
        assert_eq!(first.len(), 36);
    }
}
