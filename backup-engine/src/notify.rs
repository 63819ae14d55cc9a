//! Cycle outcome notifications.
//!
//! Every event is logged, broadcast to in-process subscribers and, when a
//! webhook is configured, POSTed as JSON. Delivery failures are logged and
//! never fail the cycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::store::BackupRecord;
use crate::utils::errors::{BackupError, Result};

const BROADCAST_CAPACITY: usize = 64;
const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupNotification {
    pub timestamp: DateTime<Utc>,
    pub status: NotificationStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BackupNotification {
    pub fn success(record: &BackupRecord, duration: Duration) -> Self {
        Self {
            timestamp: Utc::now(),
            status: NotificationStatus::Success,
            message: format!("Backup {} completed", record.filename),
            filename: Some(record.filename.clone()),
            size_bytes: Some(record.size_bytes),
            duration_ms: duration.as_millis() as u64,
            error: None,
        }
    }

    /// Only the error kind and message are reported, never internals.
    pub fn failure(err: &BackupError, duration: Duration) -> Self {
        Self {
            timestamp: Utc::now(),
            status: NotificationStatus::Error,
            message: format!("Backup cycle failed: {}", err),
            filename: match err {
                BackupError::Integrity { filename, .. } => Some(filename.clone()),
                _ => None,
            },
            size_bytes: None,
            duration_ms: duration.as_millis() as u64,
            error: Some(err.kind().to_string()),
        }
    }
}

struct Webhook {
    client: reqwest::Client,
    url: String,
}

#[derive(Clone)]
pub struct Notifier {
    tx: broadcast::Sender<BackupNotification>,
    webhook: Option<std::sync::Arc<Webhook>>,
}

impl Notifier {
    pub fn new(webhook_url: Option<String>) -> Result<Self> {
        let webhook = match webhook_url {
            Some(url) => {
                let client = reqwest::Client::builder()
                    .timeout(WEBHOOK_TIMEOUT)
                    .build()
                    .map_err(|e| BackupError::Config(format!("failed to build HTTP client: {}", e)))?;
                Some(std::sync::Arc::new(Webhook { client, url }))
            }
            None => None,
        };

        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Ok(Self { tx, webhook })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BackupNotification> {
        self.tx.subscribe()
    }

    pub async fn notify(&self, event: BackupNotification) {
        match event.status {
            NotificationStatus::Success => info!(
                filename = event.filename.as_deref().unwrap_or(""),
                size_bytes = event.size_bytes.unwrap_or(0),
                duration_ms = event.duration_ms,
                "{}",
                event.message
            ),
            NotificationStatus::Error => error!(
                kind = event.error.as_deref().unwrap_or(""),
                duration_ms = event.duration_ms,
                "{}",
                event.message
            ),
        }

        // No subscribers is fine.
        let _ = self.tx.send(event.clone());

        if let Some(webhook) = &self.webhook {
            let sent = webhook
                .client
                .post(&webhook.url)
                .json(&event)
                .send()
                .await
                .and_then(|resp| resp.error_for_status());
            if let Err(e) = sent {
                warn!(url = %webhook.url, error = %e, "Failed to deliver backup notification");
            }
        }
    }
}
