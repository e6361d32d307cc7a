//! Bot lifecycle: login, session setup, polling, shutdown

use crate::config::Settings;
use crate::notifier::Notifier;
use crate::poller::EventPoller;
use crate::ring::{Auth, Authenticator, DoorbellSession, RingError};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Builds the vendor session once a credential handle is available
pub type SessionFactory = Box<dyn Fn(Arc<Auth>) -> Arc<dyn DoorbellSession> + Send + Sync>;

/// Reasons the bot could not start
#[derive(Error, Debug)]
pub enum BotError {
    /// Too many login attempts or a one-time code is needed
    #[error("Account is rate-limited, wait an hour before trying again ({0})")]
    RateLimited(#[source] RingError),
    /// Credentials or cached token rejected
    #[error("Authentication error: {0}")]
    Authentication(#[source] RingError),
    /// Session could not be created
    #[error("Failed to create Ring session: {0}")]
    Session(#[source] RingError),
    /// The account has no camera devices
    #[error("No video devices found in Ring account")]
    NoDevices,
    /// Local file system failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<RingError> for BotError {
    fn from(e: RingError) -> Self {
        if e.is_rate_limited() {
            Self::RateLimited(e)
        } else if matches!(e, RingError::Authentication(_)) {
            Self::Authentication(e)
        } else {
            Self::Session(e)
        }
    }
}

/// Polls the doorbell account and relays new recordings
pub struct Bot {
    authenticator: Authenticator,
    notifier: Notifier,
    connect: SessionFactory,
    session: Option<Arc<dyn DoorbellSession>>,
    poll_interval: Duration,
    video_dir: PathBuf,
    shutdown: CancellationToken,
}

impl Bot {
    /// Assemble a bot from its collaborators.
    #[must_use]
    pub fn new(
        authenticator: Authenticator,
        notifier: Notifier,
        connect: SessionFactory,
        settings: &Settings,
    ) -> Self {
        Self {
            authenticator,
            notifier,
            connect,
            session: None,
            poll_interval: settings.poll_interval,
            video_dir: settings.video_dir.clone(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Token to hand to the signal handler. Cancelling it ends the polling
    /// loop at the next tick boundary.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Log in, list devices and poll until shutdown.
    ///
    /// # Errors
    ///
    /// Returns `BotError` if startup fails; the bot is stopped in that case.
    pub async fn start(&mut self) -> Result<(), BotError> {
        info!("🚀 Starting...");
        let session = match self.connect_session().await {
            Ok(session) => session,
            Err(e) => {
                error!("🔒 {e}");
                self.stop().await;
                return Err(e);
            }
        };

        let devices = session.video_devices();
        if devices.is_empty() {
            error!("❌ No video devices found in Ring account.");
            self.stop().await;
            return Err(BotError::NoDevices);
        }
        info!("📷 Connected video devices:");
        for device in &devices {
            info!("🟢 {} (ID: {})", device.name, device.id);
        }

        if let Err(e) = tokio::fs::create_dir_all(&self.video_dir).await {
            error!(path = %self.video_dir.display(), "❌ Cannot create video directory: {e}");
            self.stop().await;
            return Err(e.into());
        }

        info!(
            "👂 Polling for new video events every {} seconds...",
            self.poll_interval.as_secs()
        );
        let mut poller = EventPoller::new(
            session,
            self.notifier.clone(),
            self.video_dir.clone(),
            self.shutdown.clone(),
        );
        poller.run(self.poll_interval).await;

        self.stop().await;
        Ok(())
    }

    async fn connect_session(&mut self) -> Result<Arc<dyn DoorbellSession>, BotError> {
        info!("🚪 Logging in with Ring credentials...");
        let auth = self.authenticator.authenticate().await?;
        // detached; it ends with the shutdown token
        drop(auth.close_on(self.shutdown.clone()));

        let session = (self.connect)(auth);
        self.session = Some(session.clone());
        session.create_session().await?;
        session.refresh_data().await?;
        info!("✅ Ring session created");
        Ok(session)
    }

    /// Stop polling and release the session. Safe to call more than once.
    pub async fn stop(&mut self) {
        info!("🛑 Stopping bot...");
        self.shutdown.cancel();
        if let Some(session) = self.session.take() {
            session.close().await;
        }
        self.authenticator.close();
        info!("✅ Bot stopped gracefully");
    }
}
