//! Single-writer geofence engine
//!
//! The engine owns the region store, the transition detector and the
//! dispatcher. One task consumes the command queue, so fixes, ticks and
//! region mutations are applied strictly in queue order:
//! - `Fix` - evaluate a position against every region
//! - `Tick` - dwell deadlines and region expiry
//! - `Register` / `Update` / `Unregister` - region mutations with replies
//! - `Get` / `List` / `Status` - read-only snapshots

mod handle;
mod handlers;

pub use handle::{engine_channel, EngineHandle};

use crate::domain::error::GeofenceError;
use crate::domain::types::{PositionFix, Region, RegionSpec};
use crate::infra::clock::Clock;
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::notify_channel::NotifySender;
use crate::services::detector::TransitionDetector;
use crate::services::dispatcher::EventDispatcher;
use crate::services::region_store::RegionStore;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::info;

/// Reply channel for a request command
pub type Reply<T> = oneshot::Sender<T>;

/// Work items consumed by the engine task
#[derive(Debug)]
pub enum Command {
    Fix(PositionFix),
    Tick,
    Register { spec: RegionSpec, reply: Reply<Result<Region, GeofenceError>> },
    Update { spec: RegionSpec, reply: Reply<Result<Region, GeofenceError>> },
    Unregister { id: String, reply: Reply<Result<Region, GeofenceError>> },
    Get { id: String, reply: Reply<Option<Region>> },
    List { reply: Reply<Vec<Region>> },
    Status { reply: Reply<EngineStatus> },
}

/// Detector view of one region
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionStatus {
    pub region: Region,
    pub inside: bool,
    pub dwell_deadline_ms: Option<u64>,
    pub confirmed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatus {
    pub last_fix_ms: Option<u64>,
    pub regions: Vec<RegionStatus>,
}

/// Geofence evaluation core
pub struct GeofenceEngine {
    /// Registered regions
    pub(crate) store: RegionStore,
    /// Per-region inside/dwell state
    pub(crate) detector: TransitionDetector,
    /// Dedup and notify hand-off
    pub(crate) dispatcher: EventDispatcher,
    /// Time source for expiry anchoring and ticks
    pub(crate) clock: Arc<dyn Clock>,
    /// Metrics collector
    pub(crate) metrics: Arc<Metrics>,
    /// Fix quality gate in meters (0 disables)
    pub(crate) max_fix_accuracy_m: f64,
}

impl GeofenceEngine {
    pub fn new(
        config: &Config,
        clock: Arc<dyn Clock>,
        notify: NotifySender,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            store: RegionStore::new(),
            detector: TransitionDetector::new(),
            dispatcher: EventDispatcher::new(notify, metrics.clone()),
            clock,
            metrics,
            max_fix_accuracy_m: config.max_fix_accuracy_m(),
        }
    }

    /// Consume commands until the queue closes or shutdown is signalled
    pub async fn run(
        &mut self,
        mut command_rx: mpsc::Receiver<Command>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(regions = %self.store.len(), "engine_started");

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                command = command_rx.recv() => {
                    match command {
                        Some(c) => self.process_command(c),
                        None => break, // All handles dropped
                    }
                }
            }
        }

        info!("engine_stopped");
    }

    /// Apply a single command, answering requests over their reply channel
    pub fn process_command(&mut self, command: Command) {
        match command {
            Command::Fix(fix) => {
                // Rejections are logged and counted inside on_fix
                let _ = self.on_fix(&fix);
            }
            Command::Tick => {
                let now_ms = self.clock.now_ms();
                self.on_tick(now_ms);
            }
            Command::Register { spec, reply } => {
                let _ = reply.send(self.register(spec));
            }
            Command::Update { spec, reply } => {
                let _ = reply.send(self.update(spec));
            }
            Command::Unregister { id, reply } => {
                let _ = reply.send(self.unregister(&id));
            }
            Command::Get { id, reply } => {
                let _ = reply.send(self.get(&id));
            }
            Command::List { reply } => {
                let _ = reply.send(self.list());
            }
            Command::Status { reply } => {
                let _ = reply.send(self.status());
            }
        }
    }

    /// Number of registered regions
    pub fn region_count(&self) -> usize {
        self.store.len()
    }
}
