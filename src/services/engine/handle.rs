//! Caller side of the engine queue
//!
//! Cheap to clone; shared by the position sources, the HTTP API and the
//! tick scheduler.

use super::{Command, EngineStatus};
use crate::domain::error::GeofenceError;
use crate::domain::types::{PositionFix, Region, RegionSpec};
use crate::infra::clock::Clock;
use crate::infra::metrics::Metrics;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<Command>,
    clock: Arc<dyn Clock>,
    metrics: Arc<Metrics>,
    /// Rate-limits drop warnings to 1 per second across all sources
    last_drop_warn: Arc<Mutex<Option<Instant>>>,
}

/// Create the engine queue
///
/// Returns (handle, receiver); hand the receiver to `GeofenceEngine::run`.
pub fn engine_channel(
    buffer_size: usize,
    clock: Arc<dyn Clock>,
    metrics: Arc<Metrics>,
) -> (EngineHandle, mpsc::Receiver<Command>) {
    let (tx, rx) = mpsc::channel(buffer_size);
    let handle = EngineHandle { tx, clock, metrics, last_drop_warn: Arc::new(Mutex::new(None)) };
    (handle, rx)
}

impl EngineHandle {
    /// Engine time, for stamping fixes that arrive without a timestamp
    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Raw queue sender, used by the tick scheduler
    pub fn command_sender(&self) -> mpsc::Sender<Command> {
        self.tx.clone()
    }

    /// Commands currently waiting in the queue
    pub fn queue_depth(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// Enqueue a fix without waiting
    ///
    /// Returns false if the fix was dropped (queue full or engine gone).
    pub fn submit_fix(&self, fix: PositionFix, source: &'static str) -> bool {
        match self.tx.try_send(Command::Fix(fix)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.metrics.record_fix_dropped();
                let mut last = self.last_drop_warn.lock();
                if last.map_or(true, |at| at.elapsed() > Duration::from_secs(1)) {
                    warn!(source = %source, "fix_dropped: engine queue full");
                    *last = Some(Instant::now());
                }
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    pub async fn register(&self, spec: RegionSpec) -> Result<Region, GeofenceError> {
        self.request(|reply| Command::Register { spec, reply }).await?
    }

    pub async fn update(&self, spec: RegionSpec) -> Result<Region, GeofenceError> {
        self.request(|reply| Command::Update { spec, reply }).await?
    }

    pub async fn unregister(&self, id: &str) -> Result<Region, GeofenceError> {
        let id = id.to_string();
        self.request(|reply| Command::Unregister { id, reply }).await?
    }

    pub async fn get(&self, id: &str) -> Result<Option<Region>, GeofenceError> {
        let id = id.to_string();
        self.request(|reply| Command::Get { id, reply }).await
    }

    pub async fn list(&self) -> Result<Vec<Region>, GeofenceError> {
        self.request(|reply| Command::List { reply }).await
    }

    pub async fn status(&self) -> Result<EngineStatus, GeofenceError> {
        self.request(|reply| Command::Status { reply }).await
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, GeofenceError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx.send(make(reply_tx)).await.map_err(|_| GeofenceError::EngineClosed)?;
        reply_rx.await.map_err(|_| GeofenceError::EngineClosed)
    }
}
