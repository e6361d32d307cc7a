//! Ring doorbell account access
//!
//! Defines the vendor-facing seam used by the poller ([`DoorbellSession`]),
//! the credential lifecycle ([`auth`], [`token_cache`]) and the reqwest-based
//! implementation of both ([`client`]).

pub mod auth;
pub mod client;
pub mod token_cache;

pub use auth::{Auth, Authenticator, OAuthApi};
pub use client::{RingOAuth, RingSession};
pub use token_cache::{AuthToken, TokenCache, TokenUpdater};

use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

/// Vendor-assigned device identifier
pub type DeviceId = u64;
/// Vendor-assigned identifier of a single recorded event
pub type RecordingId = u64;

/// Errors that can occur while talking to the Ring service
#[derive(Error, Debug)]
pub enum RingError {
    /// The account needs a one-time code that was not accepted or supplied
    #[error("Two-factor authentication required")]
    Requires2fa,
    /// The vendor is throttling login attempts for this account
    #[error("Account is rate-limited: {0}")]
    RateLimited(String),
    /// Credentials were rejected
    #[error("Authentication error: {0}")]
    Authentication(String),
    /// Non-success status from the REST API
    #[error("API error: {0}")]
    Api(String),
    /// Connectivity issues
    #[error("Network error: {0}")]
    Network(String),
    /// Unexpected payload shape
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// Local file system failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// The credential handle was closed
    #[error("Session is closed")]
    Closed,
}

impl RingError {
    /// Whether the error asks the operator to wait before logging in again
    #[must_use]
    pub const fn is_rate_limited(&self) -> bool {
        matches!(self, Self::Requires2fa | Self::RateLimited(_))
    }
}

impl From<reqwest::Error> for RingError {
    fn from(e: reqwest::Error) -> Self {
        Self::Network(e.to_string())
    }
}

/// A camera-capable device of the account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    /// Device identifier
    pub id: DeviceId,
    /// User-facing description, e.g. "Front Door"
    pub name: String,
    /// Whether a recording plan is active (required to download videos)
    pub has_subscription: bool,
}

/// Most recent recorded event of a device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recording {
    /// Recording identifier
    pub id: RecordingId,
    /// Event kind as reported by the vendor (`motion`, `ding`, `on_demand`)
    pub kind: String,
}

/// Authenticated connection to the doorbell service
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DoorbellSession: Send + Sync {
    /// Register this client with the service
    async fn create_session(&self) -> Result<(), RingError>;
    /// Re-fetch the device list
    async fn refresh_data(&self) -> Result<(), RingError>;
    /// Video devices from the last refresh, in vendor listing order
    fn video_devices(&self) -> Vec<Device>;
    /// Latest recording of a device, `None` if the vendor reports nothing
    async fn latest_recording(&self, device: &Device) -> Result<Option<Recording>, RingError>;
    /// Playable URL of a recording
    async fn recording_url(
        &self,
        device: &Device,
        recording_id: RecordingId,
    ) -> Result<String, RingError>;
    /// Download a recording to `destination`, overwriting any existing file
    async fn download_recording(
        &self,
        device: &Device,
        recording_id: RecordingId,
        destination: &Path,
    ) -> Result<(), RingError>;
    /// Release the session
    async fn close(&self);
}
