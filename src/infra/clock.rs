//! Engine time source and dwell tick scheduling
//!
//! All engine timestamps are milliseconds in one timebase. The system clock
//! uses UNIX epoch milliseconds so fixes stamped by external sources line up
//! with scheduler ticks, clamped so it never runs backwards.

use crate::services::engine::Command;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Monotonic millisecond clock
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// Get current epoch milliseconds
#[inline]
pub fn epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Wall clock in epoch ms that never goes backwards
#[derive(Debug, Default)]
pub struct SystemClock {
    last_ms: AtomicU64,
}

impl SystemClock {
    pub fn new() -> Self {
        Self { last_ms: AtomicU64::new(0) }
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        let now = epoch_ms();
        let prev = self.last_ms.fetch_max(now, Ordering::Relaxed);
        prev.max(now)
    }
}

/// Clock driven by hand, for tests and offline replay
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicU64,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self { now_ms: AtomicU64::new(start_ms) }
    }

    /// Move the clock forward; earlier values are ignored
    pub fn set(&self, ms: u64) {
        self.now_ms.fetch_max(ms, Ordering::Relaxed);
    }

    pub fn advance(&self, ms: u64) {
        self.now_ms.fetch_add(ms, Ordering::Relaxed);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::Relaxed)
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now_ms(&self) -> u64 {
        (**self).now_ms()
    }
}

/// Enqueue a `Tick` on the engine queue every `interval` until shutdown
///
/// Ticks are idempotent, so a tick that finds the queue full is skipped.
pub fn schedule_tick(
    interval: Duration,
    queue: mpsc::Sender<Command>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(interval_ms = %interval.as_millis(), "tick_scheduler_started");

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    match queue.try_send(Command::Tick) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => debug!("tick_skipped_queue_full"),
                        Err(TrySendError::Closed(_)) => break,
                    }
                }
            }
        }

        info!("tick_scheduler_stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_never_goes_backwards() {
        let clock = SystemClock::new();
        clock.last_ms.store(u64::MAX - 1, Ordering::Relaxed);
        assert_eq!(clock.now_ms(), u64::MAX - 1);
    }

    #[test]
    fn test_system_clock_tracks_epoch() {
        let clock = SystemClock::new();
        let before = epoch_ms();
        let now = clock.now_ms();
        assert!(now >= before);
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(1_000);
        assert_eq!(clock.now_ms(), 1_000);
        clock.advance(250);
        assert_eq!(clock.now_ms(), 1_250);
        clock.set(900);
        assert_eq!(clock.now_ms(), 1_250);
        clock.set(2_000);
        assert_eq!(clock.now_ms(), 2_000);
    }

    #[tokio::test]
    async fn test_schedule_tick_enqueues_ticks() {
        let (tx, mut rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = schedule_tick(Duration::from_millis(10), tx, shutdown_rx);

        let first = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        assert!(matches!(first, Some(Command::Tick)));

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
