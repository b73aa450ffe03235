//! Fire-and-forget notifications for region entry and exit alerts.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;

/// Default request timeout for webhook calls.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("invalid webhook URL: {reason}")]
    InvalidUrl { reason: String },
    /// Failed to build HTTP client.
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("webhook responded with status {status}")]
    Status { status: u16 },
}

/// Destination for user-facing alerts.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, title: &str, message: &str) -> Result<(), NotifyError>;
}

/// Writes alerts to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, title: &str, message: &str) -> Result<(), NotifyError> {
        tracing::info!(title, message, "notification");
        Ok(())
    }
}

/// Posts alerts as JSON to an HTTP endpoint.
///
/// # Thread Safety
///
/// Clones share the underlying HTTP connection pool.
#[derive(Clone)]
pub struct WebhookNotifier {
    http: reqwest::Client,
    url: reqwest::Url,
}

impl fmt::Debug for WebhookNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Webhook paths often embed a secret token.
        f.debug_struct("WebhookNotifier")
            .field("host", &self.url.host_str())
            .finish_non_exhaustive()
    }
}

impl WebhookNotifier {
    /// Creates a notifier for an `http` or `https` URL.
    pub fn new(url: &str) -> Result<Self, NotifyError> {
        let url = reqwest::Url::parse(url.trim()).map_err(|err| NotifyError::InvalidUrl {
            reason: err.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(NotifyError::InvalidUrl {
                reason: format!("unsupported scheme {}", url.scheme()),
            });
        }

        let http = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(NotifyError::ClientBuild)?;

        Ok(Self { http, url })
    }
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    title: &'a str,
    message: &'a str,
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, title: &str, message: &str) -> Result<(), NotifyError> {
        let response = self
            .http
            .post(self.url.clone())
            .json(&WebhookPayload { title, message })
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Status {
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}

/// Sends a notification on a detached task. Failures are logged and dropped.
pub fn dispatch(notifier: Arc<dyn Notifier>, title: String, message: String) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(err) = notifier.notify(&title, &message).await {
            tracing::warn!(error = %err, title, "notification failed");
        }
    })
}
