//! New-event detection
//!
//! Each tick compares the latest recording id of every device with the last
//! one seen. The first sighting of a device is only a baseline; a different id
//! afterwards is a new event. State advances before the event is handled, so
//! a failed delivery is never retried (at-most-once).

use crate::notifier::Notifier;
use crate::ring::{Device, DeviceId, DoorbellSession, Recording, RecordingId};
use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What a single observation did to a device's state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// The vendor reported no recording
    Empty,
    /// First id seen for the device; recorded, nothing else
    Baseline(RecordingId),
    /// Same id as last time
    Unchanged,
    /// A new recording appeared
    Changed {
        /// Id seen on the previous tick
        previous: RecordingId,
        /// Id seen now
        current: RecordingId,
    },
}

/// Last-seen recording id per device, for the lifetime of the process
#[derive(Debug, Default, Clone)]
pub struct RecordingState {
    last_seen: HashMap<DeviceId, RecordingId>,
}

impl RecordingState {
    /// Empty state: every device starts unseen.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `latest` for `device` and report the transition.
    ///
    /// `None` and `0` count as "nothing reported" and leave the state alone.
    pub fn observe(&mut self, device: DeviceId, latest: Option<RecordingId>) -> Observation {
        let Some(current) = latest.filter(|id| *id != 0) else {
            return Observation::Empty;
        };
        match self.last_seen.insert(device, current) {
            None => Observation::Baseline(current),
            Some(previous) if previous == current => Observation::Unchanged,
            Some(previous) => Observation::Changed { previous, current },
        }
    }

    /// Last id seen for `device`
    #[must_use]
    pub fn last_seen(&self, device: DeviceId) -> Option<RecordingId> {
        self.last_seen.get(&device).copied()
    }

    /// Number of devices with a baseline
    #[must_use]
    pub fn len(&self) -> usize {
        self.last_seen.len()
    }

    /// Whether no device has been seen yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.last_seen.is_empty()
    }
}

/// Result of handling one detected event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// Device has no recording plan, nothing downloaded
    NoSubscription,
    /// Download reported success but no file appeared
    MissingDownload,
    /// Video uploaded and local copy removed
    Delivered,
    /// Upload was not acknowledged; local copy kept
    DeliveryFailed,
    /// An error interrupted the pipeline
    Failed,
}

/// Local path of a device's most recent download
#[must_use]
pub fn video_path(video_dir: &Path, device: DeviceId) -> PathBuf {
    video_dir.join(format!("{device}_latest.mp4"))
}

/// Polls the session and relays new recordings through the notifier
pub struct EventPoller {
    session: Arc<dyn DoorbellSession>,
    notifier: Notifier,
    state: RecordingState,
    video_dir: PathBuf,
    shutdown: CancellationToken,
}

impl EventPoller {
    /// Create a poller. `shutdown` ends [`EventPoller::run`] and silences
    /// errors from calls interrupted by teardown.
    #[must_use]
    pub fn new(
        session: Arc<dyn DoorbellSession>,
        notifier: Notifier,
        video_dir: impl Into<PathBuf>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            session,
            notifier,
            state: RecordingState::new(),
            video_dir: video_dir.into(),
            shutdown,
        }
    }

    /// Current detection state
    #[must_use]
    pub fn state(&self) -> &RecordingState {
        &self.state
    }

    /// Tick every `interval` until shutdown is requested.
    ///
    /// Ticks never overlap: the next one is scheduled only after the previous
    /// tick, downloads and uploads included, has finished.
    pub async fn run(&mut self, interval: Duration) {
        while !self.shutdown.is_cancelled() {
            self.poll_once().await;

            tokio::select! {
                () = self.shutdown.cancelled() => break,
                () = tokio::time::sleep(interval) => {}
            }
        }
        debug!("Polling loop finished");
    }

    /// Run a single tick over all video devices, in listing order.
    pub async fn poll_once(&mut self) {
        if let Err(e) = self.session.refresh_data().await {
            if !self.shutdown.is_cancelled() {
                error!("❌ Error refreshing device data: {e}");
            }
            return;
        }

        for device in self.session.video_devices() {
            if self.shutdown.is_cancelled() {
                debug!("Shutdown requested, ending tick early");
                return;
            }
            if let Err(e) = self.poll_device(&device).await {
                if self.shutdown.is_cancelled() {
                    return;
                }
                error!(device_id = device.id, "❌ Error polling device {}: {e:#}", device.name);
            }
        }
    }

    async fn poll_device(&mut self, device: &Device) -> Result<()> {
        let latest = self
            .session
            .latest_recording(device)
            .await
            .context("fetching latest recording")?;

        let observation = self
            .state
            .observe(device.id, latest.as_ref().map(|r| r.id));
        match (observation, latest) {
            (Observation::Baseline(id), _) => {
                debug!(device_id = device.id, recording_id = id, "Baseline captured");
            }
            (Observation::Changed { previous, current }, Some(recording)) => {
                info!(
                    device_id = device.id,
                    previous, current, "🔔 New event detected on {}", device.name
                );
                let timestamp = Local::now();
                let path = video_path(&self.video_dir, device.id);
                let outcome = self
                    .handle_event(device, &recording, &path, &timestamp)
                    .await;
                debug!(device_id = device.id, recording_id = current, ?outcome, "Event handled");
            }
            _ => {}
        }
        Ok(())
    }

    /// Download a recording and pass it to the notifier. Never fails; every
    /// problem is logged and reported in the outcome.
    pub async fn handle_event(
        &self,
        device: &Device,
        recording: &Recording,
        video_path: &Path,
        timestamp: &DateTime<Local>,
    ) -> EventOutcome {
        match self
            .try_handle_event(device, recording, video_path, timestamp)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(device_id = device.id, "❌ Error downloading/sending video: {e:#}");
                EventOutcome::Failed
            }
        }
    }

    async fn try_handle_event(
        &self,
        device: &Device,
        recording: &Recording,
        video_path: &Path,
        timestamp: &DateTime<Local>,
    ) -> Result<EventOutcome> {
        if !device.has_subscription {
            warn!(
                device_id = device.id,
                "❌ Device {} does not have an active Ring subscription, cannot download video",
                device.name
            );
            return Ok(EventOutcome::NoSubscription);
        }

        info!("📥 Downloading recording...");
        let url = self
            .session
            .recording_url(device, recording.id)
            .await
            .context("fetching recording url")?;
        info!("🔗 Recording URL: {url}");

        self.session
            .download_recording(device, recording.id, video_path)
            .await
            .context("downloading recording")?;

        if !video_path.exists() {
            error!(path = %video_path.display(), "❌ Failed to download video");
            return Ok(EventOutcome::MissingDownload);
        }
        info!(path = %video_path.display(), "✅ Video downloaded");

        let delivered = self
            .notifier
            .send_video(video_path, &device.name, &recording.kind, timestamp, None)
            .await;
        Ok(if delivered {
            EventOutcome::Delivered
        } else {
            EventOutcome::DeliveryFailed
        })
    }
}
