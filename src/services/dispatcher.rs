//! Transition deduplication and hand-off to the notify channel
//!
//! Per region we remember which kinds were emitted since the last opposite
//! crossing (ENTER/DWELL vs EXIT). A candidate whose kind is already in
//! that set is suppressed. Crossings the region does not watch still clear
//! the opposite kinds via `observe_boundary`, so an ENTER-only region
//! re-arms after the device leaves.

use crate::domain::types::{TransitionEvent, TransitionKind, TransitionSet};
use crate::infra::metrics::Metrics;
use crate::io::notify_channel::{NotifyDrop, NotifySender};
use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// What happened to a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Forwarded,
    Suppressed,
    /// Accepted by dedup but the notify channel was full or closed
    Dropped,
}

pub struct EventDispatcher {
    emitted: FxHashMap<String, TransitionSet>,
    sender: NotifySender,
    metrics: Arc<Metrics>,
    last_drop_warn: Option<Instant>,
}

impl EventDispatcher {
    pub fn new(sender: NotifySender, metrics: Arc<Metrics>) -> Self {
        Self { emitted: FxHashMap::default(), sender, metrics, last_drop_warn: None }
    }

    /// Forward a candidate unless it repeats the current episode
    pub fn on_candidate(&mut self, event: TransitionEvent) -> DispatchOutcome {
        let kind = event.kind;
        let set = self.emitted.entry(event.region_id.clone()).or_default();
        if set.contains(kind) {
            debug!(region_id = %event.region_id, kind = %kind, "transition_suppressed");
            self.metrics.record_suppressed();
            return DispatchOutcome::Suppressed;
        }
        clear_opposites(set, kind);
        set.insert(kind);

        match self.sender.send(event) {
            Ok(()) => {
                self.metrics.record_transition(kind);
                DispatchOutcome::Forwarded
            }
            Err(reason) => {
                self.metrics.record_notify_dropped();
                let should_warn = self
                    .last_drop_warn
                    .map_or(true, |at| at.elapsed() > Duration::from_secs(1));
                if should_warn {
                    match reason {
                        NotifyDrop::Full => warn!("notify_dropped: channel full"),
                        NotifyDrop::Closed => warn!("notify_dropped: channel closed"),
                    }
                    self.last_drop_warn = Some(Instant::now());
                }
                DispatchOutcome::Dropped
            }
        }
    }

    /// Apply the opposite-kind reset for a crossing the region does not watch
    pub fn observe_boundary(&mut self, region_id: &str, kind: TransitionKind) {
        if let Some(set) = self.emitted.get_mut(region_id) {
            clear_opposites(set, kind);
        }
    }

    /// Drop bookkeeping for an unregistered or replaced region
    pub fn clear(&mut self, region_id: &str) {
        self.emitted.remove(region_id);
    }

    /// Kinds emitted for a region since its last opposite crossing
    pub fn emitted(&self, region_id: &str) -> TransitionSet {
        self.emitted.get(region_id).copied().unwrap_or_default()
    }
}

fn clear_opposites(set: &mut TransitionSet, kind: TransitionKind) {
    for other in TransitionKind::ALL {
        if kind.is_opposite(other) {
            set.remove(other);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::notify_channel::create_notify_channel;
    use crate::domain::types::TransitionEvent;
    use tokio::sync::mpsc;

    fn dispatcher(capacity: usize) -> (EventDispatcher, mpsc::Receiver<TransitionEvent>, Arc<Metrics>) {
        let (sender, rx) = create_notify_channel(capacity);
        let metrics = Arc::new(Metrics::new());
        (EventDispatcher::new(sender, metrics.clone()), rx, metrics)
    }

    fn ev(region: &str, kind: TransitionKind, ts: u64) -> TransitionEvent {
        TransitionEvent::new(region, kind, ts)
    }

    #[test]
    fn test_forwards_first_and_suppresses_repeat() {
        let (mut d, mut rx, metrics) = dispatcher(8);

        assert_eq!(d.on_candidate(ev("home", TransitionKind::Enter, 1)), DispatchOutcome::Forwarded);
        assert_eq!(d.on_candidate(ev("home", TransitionKind::Enter, 2)), DispatchOutcome::Suppressed);

        assert_eq!(rx.try_recv().unwrap().at_timestamp_ms, 1);
        assert!(rx.try_recv().is_err());
        assert_eq!(metrics.transitions_total(TransitionKind::Enter), 1);
        assert_eq!(metrics.suppressed_total(), 1);
    }

    #[test]
    fn test_opposite_rearms() {
        let (mut d, _rx, _) = dispatcher(8);

        assert_eq!(d.on_candidate(ev("a", TransitionKind::Enter, 1)), DispatchOutcome::Forwarded);
        assert_eq!(d.on_candidate(ev("a", TransitionKind::Dwell, 2)), DispatchOutcome::Forwarded);
        assert_eq!(d.on_candidate(ev("a", TransitionKind::Exit, 3)), DispatchOutcome::Forwarded);
        assert!(d.emitted("a").contains(TransitionKind::Exit));
        assert!(!d.emitted("a").contains(TransitionKind::Enter));
        assert_eq!(d.on_candidate(ev("a", TransitionKind::Exit, 4)), DispatchOutcome::Suppressed);
        assert_eq!(d.on_candidate(ev("a", TransitionKind::Enter, 5)), DispatchOutcome::Forwarded);
        assert_eq!(d.on_candidate(ev("a", TransitionKind::Dwell, 6)), DispatchOutcome::Forwarded);
    }

    #[test]
    fn test_regions_are_independent() {
        let (mut d, _rx, _) = dispatcher(8);
        assert_eq!(d.on_candidate(ev("a", TransitionKind::Enter, 1)), DispatchOutcome::Forwarded);
        assert_eq!(d.on_candidate(ev("b", TransitionKind::Enter, 1)), DispatchOutcome::Forwarded);
    }

    #[test]
    fn test_boundary_rearms_single_direction_region() {
        let (mut d, _rx, _) = dispatcher(8);

        assert_eq!(d.on_candidate(ev("home", TransitionKind::Enter, 1)), DispatchOutcome::Forwarded);
        d.observe_boundary("home", TransitionKind::Exit);
        assert_eq!(d.on_candidate(ev("home", TransitionKind::Enter, 3)), DispatchOutcome::Forwarded);
    }

    #[test]
    fn test_clear_forgets_region() {
        let (mut d, _rx, _) = dispatcher(8);
        d.on_candidate(ev("home", TransitionKind::Enter, 1));
        d.clear("home");
        assert!(d.emitted("home").is_empty());
        assert_eq!(d.on_candidate(ev("home", TransitionKind::Enter, 2)), DispatchOutcome::Forwarded);
    }

    #[test]
    fn test_full_channel_drops_and_counts() {
        let (mut d, _rx, metrics) = dispatcher(1);

        assert_eq!(d.on_candidate(ev("a", TransitionKind::Enter, 1)), DispatchOutcome::Forwarded);
        assert_eq!(d.on_candidate(ev("b", TransitionKind::Enter, 1)), DispatchOutcome::Dropped);
        assert_eq!(metrics.notify_dropped(), 1);
        // Dropped transitions still count toward dedup
        assert_eq!(d.on_candidate(ev("b", TransitionKind::Enter, 2)), DispatchOutcome::Suppressed);
    }
}
