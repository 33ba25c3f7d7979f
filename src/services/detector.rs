//! Per-region ENTER/EXIT/DWELL detection
//!
//! The detector keeps one `RegionState` per registered region and compares
//! each new fix against the previous inside/outside decision. It emits raw
//! candidates only; deduplication happens in the dispatcher.
//!
//! Dwell uses an absolute deadline (`entry timestamp + dwell delay`) checked
//! on every fix and on every scheduler tick, so a device that stops reporting
//! while inside still gets its DWELL.

use crate::domain::error::GeofenceError;
use crate::domain::geo::is_inside;
use crate::domain::types::{PositionFix, Region, TransitionEvent, TransitionKind};
use crate::services::region_store::RegionStore;
use rustc_hash::FxHashMap;
use serde::Serialize;
use smallvec::SmallVec;

/// Detection state for one region
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionState {
    pub last_inside: bool,
    /// Dwell deadline; set only while inside, DWELL watched and not yet confirmed
    pub dwell_deadline_ms: Option<u64>,
    pub confirmed: bool,
    /// False until the first fix evaluated against this region
    pub primed: bool,
}

/// Output of one fix or tick evaluation
#[derive(Debug, Default)]
pub struct Evaluation {
    /// Watched transitions, ordered by region id then emission order
    pub candidates: SmallVec<[TransitionEvent; 4]>,
    /// Physical crossings the region does not watch
    pub boundaries: SmallVec<[TransitionEvent; 4]>,
}

impl Evaluation {
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty() && self.boundaries.is_empty()
    }

    fn crossing(&mut self, region: &Region, kind: TransitionKind, ts: u64) {
        let event = TransitionEvent::new(&region.id, kind, ts);
        if region.watches(kind) {
            self.candidates.push(event);
        } else {
            self.boundaries.push(event);
        }
    }
}

#[derive(Debug, Default)]
pub struct TransitionDetector {
    states: FxHashMap<String, RegionState>,
    last_fix_ms: Option<u64>,
}

impl TransitionDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Timestamp of the last accepted fix
    pub fn last_fix_ms(&self) -> Option<u64> {
        self.last_fix_ms
    }

    /// Create fresh state for a newly registered region
    pub fn track(&mut self, region_id: &str) {
        self.states.insert(region_id.to_string(), RegionState::default());
    }

    /// Drop state for an unregistered region
    pub fn forget(&mut self, region_id: &str) {
        self.states.remove(region_id);
    }

    /// Restart detection for a replaced region
    pub fn reset(&mut self, region_id: &str) {
        self.track(region_id);
    }

    pub fn state(&self, region_id: &str) -> Option<&RegionState> {
        self.states.get(region_id)
    }

    /// Evaluate a fix against every region in the store
    ///
    /// A fix not strictly newer than the last accepted one is rejected
    /// without touching any state.
    pub fn on_fix(
        &mut self,
        fix: &PositionFix,
        store: &RegionStore,
    ) -> Result<Evaluation, GeofenceError> {
        if let Some(last) = self.last_fix_ms {
            if fix.timestamp_ms <= last {
                return Err(GeofenceError::StaleFix {
                    timestamp_ms: fix.timestamp_ms,
                    last_accepted_ms: last,
                });
            }
        }
        self.last_fix_ms = Some(fix.timestamp_ms);

        let ts = fix.timestamp_ms;
        let mut eval = Evaluation::default();

        for region in sorted_regions(store) {
            let inside = is_inside(fix.position, region);
            let state = self.states.entry(region.id.clone()).or_default();

            if !state.primed {
                state.primed = true;
                if inside {
                    if region.initial_trigger {
                        eval.crossing(region, TransitionKind::Enter, ts);
                    }
                    arm_dwell(state, region, ts);
                }
            } else if !state.last_inside && inside {
                eval.crossing(region, TransitionKind::Enter, ts);
                arm_dwell(state, region, ts);
            } else if state.last_inside && !inside {
                state.dwell_deadline_ms = None;
                state.confirmed = false;
                eval.crossing(region, TransitionKind::Exit, ts);
            }

            state.last_inside = inside;
            check_dwell(state, region, ts, &mut eval);
        }

        Ok(eval)
    }

    /// Dwell check only; the last fix timestamp is left alone
    pub fn on_tick(&mut self, now_ms: u64, store: &RegionStore) -> Evaluation {
        let mut eval = Evaluation::default();
        for region in sorted_regions(store) {
            if let Some(state) = self.states.get_mut(&region.id) {
                check_dwell(state, region, now_ms, &mut eval);
            }
        }
        eval
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.states.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

fn sorted_regions(store: &RegionStore) -> SmallVec<[&Region; 8]> {
    let mut regions: SmallVec<[&Region; 8]> = store.iter().collect();
    regions.sort_unstable_by(|a, b| a.id.cmp(&b.id));
    regions
}

fn arm_dwell(state: &mut RegionState, region: &Region, entered_at: u64) {
    state.confirmed = false;
    if region.watches(TransitionKind::Dwell) {
        let delay = region.dwell_delay_ms.unwrap_or(0) as u64;
        state.dwell_deadline_ms = Some(entered_at.saturating_add(delay));
    }
}

fn check_dwell(state: &mut RegionState, region: &Region, now_ms: u64, eval: &mut Evaluation) {
    if !state.last_inside || state.confirmed {
        return;
    }
    if let Some(deadline) = state.dwell_deadline_ms {
        if now_ms >= deadline {
            state.confirmed = true;
            state.dwell_deadline_ms = None;
            eval.candidates.push(TransitionEvent::new(&region.id, TransitionKind::Dwell, now_ms));
        }
    }
}
