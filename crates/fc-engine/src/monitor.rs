//! Location provider seam and monitor task lifecycle.
//!
//! Providers push [`ProviderEvent`]s through a channel; there is no polling
//! loop. [`MonitorHandle`] owns the cancellation token of the running task
//! and the status the task reports.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use fc_core::LocationSample;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("location monitor is already running")]
    AlreadyRunning,
    #[error("failed to subscribe to location updates: {0}")]
    Subscribe(String),
}

/// An update pushed by a location provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderEvent {
    Sample(LocationSample),
    /// The provider could not produce a fix.
    NoFix,
    PermissionDenied,
    PermissionGranted,
}

/// A push-based source of location updates.
///
/// Dropping the receiver returned by `subscribe` unsubscribes.
#[async_trait]
pub trait LocationProvider: Send + Sync {
    async fn subscribe(&self) -> Result<mpsc::Receiver<ProviderEvent>, MonitorError>;
}

/// Provider fed through an in-process channel.
///
/// Each `subscribe` hands out the receiver once; the sender side is returned
/// by [`ChannelProvider::new`].
#[derive(Debug)]
pub struct ChannelProvider {
    receiver: Mutex<Option<mpsc::Receiver<ProviderEvent>>>,
}

impl ChannelProvider {
    pub fn new(capacity: usize) -> (Self, mpsc::Sender<ProviderEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                receiver: Mutex::new(Some(rx)),
            },
            tx,
        )
    }
}

#[async_trait]
impl LocationProvider for ChannelProvider {
    async fn subscribe(&self) -> Result<mpsc::Receiver<ProviderEvent>, MonitorError> {
        self.receiver
            .lock()
            .map_err(|_| MonitorError::Subscribe("provider lock poisoned".to_string()))?
            .take()
            .ok_or_else(|| MonitorError::Subscribe("channel already subscribed".to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorStatus {
    Stopped,
    Running,
    /// Location permission was revoked; samples are ignored until it is
    /// granted again.
    PermissionDisabled,
}

impl MonitorStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Running => "running",
            Self::PermissionDisabled => "permission_disabled",
        }
    }
}

/// Controls the monitor task.
///
/// Each start creates a fresh cancellation token so stop followed by start
/// works. The permission flag outlives a run: a revoked permission stays
/// revoked until the provider grants it again.
#[derive(Debug)]
pub struct MonitorHandle {
    running: AtomicBool,
    permission_denied: AtomicBool,
    cancel_token: Mutex<CancellationToken>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Default for MonitorHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl MonitorHandle {
    pub fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
            permission_denied: AtomicBool::new(false),
            cancel_token: Mutex::new(CancellationToken::new()),
            task: Mutex::new(None),
        }
    }

    pub fn status(&self) -> MonitorStatus {
        if self.permission_denied.load(Ordering::Acquire) {
            MonitorStatus::PermissionDisabled
        } else if self.running.load(Ordering::Acquire) {
            MonitorStatus::Running
        } else {
            MonitorStatus::Stopped
        }
    }

    /// Records a permission change. Returns `true` if the flag changed.
    pub(crate) fn set_permission(&self, granted: bool) -> bool {
        self.permission_denied.swap(!granted, Ordering::AcqRel) == granted
    }

    /// Claims the handle for a new run and returns the task's token.
    pub(crate) fn begin(&self) -> Result<CancellationToken, MonitorError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(MonitorError::AlreadyRunning);
        }
        let token = CancellationToken::new();
        let child = token.child_token();
        if let Ok(mut current) = self.cancel_token.lock() {
            *current = token;
        }
        Ok(child)
    }

    pub(crate) fn attach(&self, task: JoinHandle<()>) {
        if let Ok(mut slot) = self.task.lock() {
            *slot = Some(task);
        }
    }

    /// Marks the run finished. Called by the task on exit.
    pub(crate) fn finish(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// Cancels the running task and waits for it to exit.
    pub async fn stop(&self) {
        if let Ok(token) = self.cancel_token.lock() {
            token.cancel();
        }
        let task = self.task.lock().ok().and_then(|mut slot| slot.take());
        if let Some(task) = task {
            if let Err(err) = task.await {
                tracing::warn!(error = %err, "monitor task ended abnormally");
            }
        }
        self.finish();
    }

    /// Waits for the task to exit on its own, once the provider closes.
    pub async fn wait(&self) {
        let task = self.task.lock().ok().and_then(|mut slot| slot.take());
        if let Some(task) = task {
            if let Err(err) = task.await {
                tracing::warn!(error = %err, "monitor task ended abnormally");
            }
        }
        self.finish();
    }
}
