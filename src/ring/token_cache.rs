//! Single-entry persistent cache for the Ring OAuth token
//!
//! The cache file holds exactly one serialized [`AuthToken`], the one from the
//! most recent session. Every write replaces the whole file.

use super::RingError;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Callback invoked with every freshly obtained token
pub type TokenUpdater = Arc<dyn Fn(&AuthToken) + Send + Sync>;

/// OAuth credential issued by the vendor
///
/// Only the fields the client needs are typed; anything else the vendor sends
/// is kept in `extra` so a cached token round-trips unchanged.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthToken {
    /// Bearer token for API calls
    pub access_token: String,
    /// Token for the refresh grant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Lifetime in seconds, as issued
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    /// Absolute expiry as a unix timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<f64>,
    /// Usually `bearer`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    /// Vendor fields not modelled above
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AuthToken {
    /// Fill in `expires_at` from `expires_in` relative to now.
    #[must_use]
    pub fn stamped(mut self) -> Self {
        if self.expires_at.is_none() {
            if let Some(expires_in) = self.expires_in {
                #[allow(clippy::cast_precision_loss)]
                let now = Utc::now().timestamp() as f64;
                #[allow(clippy::cast_precision_loss)]
                let lifetime = expires_in as f64;
                self.expires_at = Some(now + lifetime);
            }
        }
        self
    }

    /// Whether the token is past its expiry. Tokens without one never expire.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        #[allow(clippy::cast_precision_loss)]
        let now = Utc::now().timestamp() as f64;
        self.expires_at.is_some_and(|at| at <= now)
    }
}

impl std::fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthToken")
            .field("access_token", &"[MASKED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[MASKED]"))
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// File-backed token cache
#[derive(Debug, Clone)]
pub struct TokenCache {
    path: PathBuf,
}

impl TokenCache {
    /// Create a cache stored at `path`. Nothing is touched until the first write.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the cache file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a cache file is present
    #[must_use]
    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Read the cached token, `Ok(None)` if there is no cache file.
    ///
    /// # Errors
    ///
    /// Returns `RingError::Io` if the file cannot be read and
    /// `RingError::Json` if it does not hold a token.
    pub fn load(&self) -> Result<Option<AuthToken>, RingError> {
        if !self.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&self.path)?;
        let token = serde_json::from_str(&contents)?;
        Ok(Some(token))
    }

    /// Replace the cached token.
    ///
    /// The token is written next to the cache file and renamed over it, so a
    /// reader never sees a partial file.
    ///
    /// # Errors
    ///
    /// Returns `RingError::Io` or `RingError::Json` on failure.
    pub fn store(&self, token: &AuthToken) -> Result<(), RingError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let serialized = serde_json::to_string(token)?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serialized)?;
        fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), "Token cache written");
        Ok(())
    }

    /// Build the refresh callback handed to [`super::Auth`].
    #[must_use]
    pub fn updater(&self) -> TokenUpdater {
        let cache = self.clone();
        Arc::new(move |token: &AuthToken| match cache.store(token) {
            Ok(()) => info!("🔄 Token updated and cached."),
            Err(e) => error!(path = %cache.path.display(), "❌ Failed to cache token: {e}"),
        })
    }
}
