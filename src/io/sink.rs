//! Notification sink interface
//!
//! Sinks are driven by the notify worker, never by the engine, so a slow
//! or failing sink cannot stall detection.

use crate::io::notify_channel::Notification;
use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

/// Delivery failure for one notification on one sink
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("mqtt error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Endpoint answered with a non-success status
    #[error("http status {0}")]
    Status(u16),
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Short label for logs and metrics
    fn name(&self) -> &'static str;

    async fn notify(&self, notification: &Notification) -> Result<(), SinkError>;
}

/// Writes each notification as a structured log line
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn notify(&self, n: &Notification) -> Result<(), SinkError> {
        info!(
            id = %n.id,
            site = %n.site,
            region_id = %n.region_id,
            kind = %n.kind,
            ts = %n.at_timestamp_ms,
            "geofence_transition"
        );
        Ok(())
    }
}
