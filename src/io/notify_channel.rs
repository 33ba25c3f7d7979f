//! Typed channel from the engine to the notify worker
//!
//! Provides a non-blocking way to hand transitions off the detection path.
//! Uses a bounded mpsc channel to prevent unbounded memory growth.

use crate::domain::types::{TransitionEvent, TransitionKind};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

/// What notification sinks receive
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: Uuid,
    pub site: String,
    pub region_id: String,
    pub kind: TransitionKind,
    /// Engine timestamp of the transition (ms)
    pub at_timestamp_ms: u64,
    /// Wall clock at hand-off to the sinks
    #[serde(serialize_with = "serialize_rfc3339_ms")]
    pub emitted_at: DateTime<Utc>,
}

impl Notification {
    pub fn from_event(event: TransitionEvent, site: &str) -> Self {
        Self {
            id: Uuid::now_v7(),
            site: site.to_string(),
            region_id: event.region_id,
            kind: event.kind,
            at_timestamp_ms: event.at_timestamp_ms,
            emitted_at: Utc::now(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

fn serialize_rfc3339_ms<S>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Why a transition did not reach the notify worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyDrop {
    Full,
    Closed,
}

/// Sender handle for transitions
///
/// Non-blocking - if the channel is full, the transition is dropped.
#[derive(Debug, Clone)]
pub struct NotifySender {
    tx: mpsc::Sender<TransitionEvent>,
}

impl NotifySender {
    pub fn new(tx: mpsc::Sender<TransitionEvent>) -> Self {
        Self { tx }
    }

    /// Hand a transition to the worker without waiting
    pub fn send(&self, event: TransitionEvent) -> Result<(), NotifyDrop> {
        self.tx.try_send(event).map_err(|e| match e {
            TrySendError::Full(_) => NotifyDrop::Full,
            TrySendError::Closed(_) => NotifyDrop::Closed,
        })
    }

    /// Free slots left in the channel
    pub fn capacity(&self) -> usize {
        self.tx.capacity()
    }
}

/// Create a new notify channel pair
///
/// Buffer size bounds how many transitions can wait for slow sinks.
pub fn create_notify_channel(
    buffer_size: usize,
) -> (NotifySender, mpsc::Receiver<TransitionEvent>) {
    let (tx, rx) = mpsc::channel(buffer_size);
    (NotifySender::new(tx), rx)
}
