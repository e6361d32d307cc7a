//! Login handshake and credential lifecycle
//!
//! [`Authenticator`] decides between the cached token and a fresh login.
//! [`Auth`] is the credential handle the session uses afterwards; it refreshes
//! the token on demand and reports every new token through the injected
//! [`TokenUpdater`].

use super::token_cache::{AuthToken, TokenCache, TokenUpdater};
use super::RingError;
use crate::config::RingSettings;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Token endpoint of the vendor
#[async_trait]
pub trait OAuthApi: Send + Sync {
    /// Password grant. `otp` is sent only when the account asked for it.
    async fn fetch_token(
        &self,
        username: &str,
        password: &str,
        otp: Option<&str>,
    ) -> Result<AuthToken, RingError>;

    /// Refresh-token grant
    async fn refresh_token(&self, refresh_token: &str) -> Result<AuthToken, RingError>;
}

/// Credential handle shared by the vendor session
pub struct Auth {
    token: RwLock<AuthToken>,
    oauth: Arc<dyn OAuthApi>,
    on_update: TokenUpdater,
    closed: AtomicBool,
}

impl Auth {
    /// Wrap an existing token. No validity check is made here; an invalid
    /// token surfaces on the first API call.
    #[must_use]
    pub fn new(token: AuthToken, oauth: Arc<dyn OAuthApi>, on_update: TokenUpdater) -> Self {
        Self {
            token: RwLock::new(token),
            oauth,
            on_update,
            closed: AtomicBool::new(false),
        }
    }

    /// Current bearer token, refreshed first if it has expired.
    ///
    /// # Errors
    ///
    /// Returns `RingError::Closed` after [`Auth::close`], or the refresh error.
    pub async fn access_token(&self) -> Result<String, RingError> {
        if self.is_closed() {
            return Err(RingError::Closed);
        }
        let expired = {
            let token = self.token.read().await;
            token.is_expired() && token.refresh_token.is_some()
        };
        if expired {
            debug!("Access token expired, refreshing");
            self.refresh().await?;
        }
        Ok(self.token.read().await.access_token.clone())
    }

    /// Exchange the refresh token for a new token and report it.
    ///
    /// # Errors
    ///
    /// Returns `RingError::Authentication` when there is no refresh token, or
    /// whatever the token endpoint returned.
    pub async fn refresh(&self) -> Result<(), RingError> {
        if self.is_closed() {
            return Err(RingError::Closed);
        }
        let refresh_token = self.token.read().await.refresh_token.clone().ok_or_else(|| {
            RingError::Authentication("token has no refresh_token".to_string())
        })?;

        let fresh = self.oauth.refresh_token(&refresh_token).await?.stamped();
        (self.on_update)(&fresh);
        *self.token.write().await = fresh;
        Ok(())
    }

    /// Snapshot of the current token
    pub async fn token(&self) -> AuthToken {
        self.token.read().await.clone()
    }

    /// Stop handing out tokens. Safe to call more than once.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!("Auth handle closed");
        }
    }

    /// Close the handle as soon as `shutdown` is cancelled. Calls still in
    /// flight afterwards fail with `RingError::Closed`.
    pub fn close_on(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let auth = Arc::clone(self);
        tokio::spawn(async move {
            shutdown.cancelled().await;
            info!("🔒 Shutdown requested, closing Ring session...");
            auth.close();
        })
    }

    /// Whether [`Auth::close`] was called
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Obtains an [`Auth`] with as few login handshakes as possible
pub struct Authenticator {
    username: String,
    password: String,
    otp: Option<String>,
    cache: TokenCache,
    oauth: Arc<dyn OAuthApi>,
    auth: Option<Arc<Auth>>,
}

impl Authenticator {
    /// Create an authenticator for the given account.
    #[must_use]
    pub fn new(credentials: &RingSettings, cache: TokenCache, oauth: Arc<dyn OAuthApi>) -> Self {
        Self {
            username: credentials.username.clone(),
            password: credentials.password.clone(),
            otp: credentials.otp.clone(),
            cache,
            oauth,
            auth: None,
        }
    }

    /// Return a credential handle, from the cache if possible.
    ///
    /// With a cache file present the cached token is used as is. Otherwise a
    /// password login is made; if the account asks for a one-time code, the
    /// login is repeated once with the configured code. Fresh tokens are
    /// written to the cache.
    ///
    /// # Errors
    ///
    /// Returns `RingError::Requires2fa` / `RingError::RateLimited` when the
    /// operator has to wait, `RingError::Authentication` for rejected
    /// credentials, or a transport error.
    pub async fn authenticate(&mut self) -> Result<Arc<Auth>, RingError> {
        match self.cache.load() {
            Ok(Some(token)) => {
                info!("⏳ Loading cached authentication token...");
                return Ok(self.install(token));
            }
            Ok(None) => {}
            Err(e) => warn!(
                path = %self.cache.path().display(),
                "⌛ Cached token unreadable ({e}), fetching new token..."
            ),
        }

        let token = match self
            .oauth
            .fetch_token(&self.username, &self.password, None)
            .await
        {
            Err(RingError::Requires2fa) => {
                let Some(otp) = self.otp.as_deref() else {
                    return Err(RingError::Requires2fa);
                };
                info!("🔐 One-time code required, retrying login with RING_OTP");
                self.oauth
                    .fetch_token(&self.username, &self.password, Some(otp))
                    .await?
            }
            other => other?,
        }
        .stamped();

        (self.cache.updater())(&token);
        Ok(self.install(token))
    }

    fn install(&mut self, token: AuthToken) -> Arc<Auth> {
        let auth = Arc::new(Auth::new(token, self.oauth.clone(), self.cache.updater()));
        self.auth = Some(auth.clone());
        auth
    }

    /// Release the credential handle, if any.
    pub fn close(&mut self) {
        if let Some(auth) = self.auth.take() {
            info!("🔒 Closing authentication session...");
            auth.close();
        }
    }
}
