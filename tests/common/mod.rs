#![allow(dead_code)]

use async_trait::async_trait;
use doorbell_relay::chat::{ChatClient, ChatError};
use doorbell_relay::ring::{
    AuthToken, Device, DeviceId, DoorbellSession, OAuthApi, Recording, RecordingId, RingError,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

pub fn device(id: DeviceId, name: &str, has_subscription: bool) -> Device {
    Device {
        id,
        name: name.to_string(),
        has_subscription,
    }
}

pub fn temp_dir() -> PathBuf {
    std::env::temp_dir().join(format!("doorbell-relay-it-{}", uuid::Uuid::new_v4()))
}

/// Scripted vendor session: each device returns the next queued id per tick
/// and repeats the last one once the queue is empty.
#[derive(Default)]
pub struct FakeSession {
    devices: Vec<Device>,
    scripts: Mutex<HashMap<DeviceId, VecDeque<Option<RecordingId>>>>,
    last: Mutex<HashMap<DeviceId, Option<RecordingId>>>,
    failing_lookups: Mutex<HashSet<DeviceId>>,
    failing_downloads: Mutex<HashSet<DeviceId>>,
    pub downloads: Mutex<Vec<(DeviceId, RecordingId)>>,
    pub refreshes: AtomicUsize,
    pub closed: AtomicBool,
    stop_after_refreshes: Mutex<Option<(usize, CancellationToken)>>,
}

impl FakeSession {
    pub fn new(devices: Vec<Device>) -> Self {
        Self {
            devices,
            ..Self::default()
        }
    }

    pub fn script(self, device: DeviceId, ids: &[Option<RecordingId>]) -> Self {
        self.scripts
            .lock()
            .expect("lock")
            .insert(device, ids.iter().copied().collect());
        self
    }

    pub fn failing_lookup(self, device: DeviceId) -> Self {
        self.failing_lookups.lock().expect("lock").insert(device);
        self
    }

    pub fn failing_download(self, device: DeviceId) -> Self {
        self.failing_downloads.lock().expect("lock").insert(device);
        self
    }

    /// Cancel `token` during the given refresh, ending the polling loop
    pub fn stop_after(&self, refreshes: usize, token: CancellationToken) {
        *self.stop_after_refreshes.lock().expect("lock") = Some((refreshes, token));
    }

    pub fn downloads(&self) -> Vec<(DeviceId, RecordingId)> {
        self.downloads.lock().expect("lock").clone()
    }
}

#[async_trait]
impl DoorbellSession for FakeSession {
    async fn create_session(&self) -> Result<(), RingError> {
        Ok(())
    }

    async fn refresh_data(&self) -> Result<(), RingError> {
        let count = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((limit, token)) = &*self.stop_after_refreshes.lock().expect("lock") {
            if count >= *limit {
                token.cancel();
            }
        }
        Ok(())
    }

    fn video_devices(&self) -> Vec<Device> {
        self.devices.clone()
    }

    async fn latest_recording(&self, device: &Device) -> Result<Option<Recording>, RingError> {
        if self.failing_lookups.lock().expect("lock").contains(&device.id) {
            return Err(RingError::Api("503 Service Unavailable".to_string()));
        }
        let next = self
            .scripts
            .lock()
            .expect("lock")
            .get_mut(&device.id)
            .and_then(VecDeque::pop_front);
        let mut last = self.last.lock().expect("lock");
        let id = match next {
            Some(id) => {
                last.insert(device.id, id);
                id
            }
            None => last.get(&device.id).copied().flatten(),
        };
        Ok(id.map(|id| Recording {
            id,
            kind: "motion".to_string(),
        }))
    }

    async fn recording_url(
        &self,
        _device: &Device,
        recording_id: RecordingId,
    ) -> Result<String, RingError> {
        Ok(format!("https://recordings.example/{recording_id}.mp4"))
    }

    async fn download_recording(
        &self,
        device: &Device,
        recording_id: RecordingId,
        destination: &Path,
    ) -> Result<(), RingError> {
        self.downloads
            .lock()
            .expect("lock")
            .push((device.id, recording_id));
        if self.failing_downloads.lock().expect("lock").contains(&device.id) {
            return Err(RingError::Network("connection reset".to_string()));
        }
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(destination, format!("video {recording_id}"))?;
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    pub channel: String,
    pub file_name: String,
    pub title: String,
    pub caption: String,
}

/// Chat client that records uploads and can be told to reject them
#[derive(Default)]
pub struct FakeChat {
    pub uploads: Mutex<Vec<Upload>>,
    pub messages: Mutex<Vec<(String, String)>>,
    pub reject_uploads: bool,
}

impl FakeChat {
    pub fn rejecting() -> Self {
        Self {
            reject_uploads: true,
            ..Self::default()
        }
    }

    pub fn uploads(&self) -> Vec<Upload> {
        self.uploads.lock().expect("lock").clone()
    }
}

#[async_trait]
impl ChatClient for FakeChat {
    async fn upload_file(
        &self,
        channel: &str,
        path: &Path,
        title: &str,
        caption: &str,
    ) -> Result<(), ChatError> {
        if self.reject_uploads {
            return Err(ChatError::Api("not_in_channel".to_string()));
        }
        self.uploads.lock().expect("lock").push(Upload {
            channel: channel.to_string(),
            file_name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            title: title.to_string(),
            caption: caption.to_string(),
        });
        Ok(())
    }

    async fn post_message(&self, channel: &str, text: &str) -> Result<(), ChatError> {
        self.messages
            .lock()
            .expect("lock")
            .push((channel.to_string(), text.to_string()));
        Ok(())
    }
}

/// Token endpoint returning queued login results
#[derive(Default)]
pub struct FakeOAuth {
    pub logins: Mutex<VecDeque<Result<AuthToken, RingError>>>,
    pub login_calls: AtomicUsize,
}

impl FakeOAuth {
    pub fn with_logins(logins: Vec<Result<AuthToken, RingError>>) -> Self {
        Self {
            logins: Mutex::new(logins.into()),
            login_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl OAuthApi for FakeOAuth {
    async fn fetch_token(
        &self,
        _username: &str,
        _password: &str,
        _otp: Option<&str>,
    ) -> Result<AuthToken, RingError> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        self.logins
            .lock()
            .expect("lock")
            .pop_front()
            .unwrap_or_else(|| Err(RingError::Authentication("no scripted login".to_string())))
    }

    async fn refresh_token(&self, _refresh_token: &str) -> Result<AuthToken, RingError> {
        Err(RingError::Authentication("refresh not scripted".to_string()))
    }
}

pub fn token(access: &str) -> AuthToken {
    serde_json::from_value(serde_json::json!({ "access_token": access, "expires_in": 3600 }))
        .expect("valid token")
}
