//! Command handlers for the GeofenceEngine
//!
//! Region mutations keep the store, detector state and dedup bookkeeping
//! in lockstep. Fix and tick handlers never block.

use super::{EngineStatus, GeofenceEngine, RegionStatus};
use crate::domain::error::GeofenceError;
use crate::domain::types::{PositionFix, Region, RegionSpec, TransitionEvent};
use crate::services::detector::Evaluation;
use crate::services::dispatcher::DispatchOutcome;
use std::time::Instant;
use tracing::{debug, info};

impl GeofenceEngine {
    /// Validate and add a region with fresh detector state
    pub fn register(&mut self, spec: RegionSpec) -> Result<Region, GeofenceError> {
        let region = spec.into_region(self.clock.now_ms())?;
        self.store.register(region.clone())?;
        self.detector.track(&region.id);
        self.dispatcher.clear(&region.id);
        self.metrics.set_regions_active(self.store.len());

        info!(
            region_id = %region.id,
            center = %region.center,
            radius_m = %region.radius_meters,
            transitions = %region.transitions,
            "region_registered"
        );
        Ok(region)
    }

    /// Replace a region; detection for it restarts from scratch
    pub fn update(&mut self, spec: RegionSpec) -> Result<Region, GeofenceError> {
        let region = spec.into_region(self.clock.now_ms())?;
        let previous = self.store.update(region.clone())?;
        self.detector.reset(&region.id);
        self.dispatcher.clear(&region.id);

        info!(
            region_id = %region.id,
            radius_m = %region.radius_meters,
            previous_radius_m = %previous.radius_meters,
            transitions = %region.transitions,
            "region_updated"
        );
        Ok(region)
    }

    /// Remove a region together with its detector and dedup state
    pub fn unregister(&mut self, id: &str) -> Result<Region, GeofenceError> {
        let region = self.store.unregister(id)?;
        self.detector.forget(id);
        self.dispatcher.clear(id);
        self.metrics.set_regions_active(self.store.len());

        info!(region_id = %id, "region_unregistered");
        Ok(region)
    }

    pub fn get(&self, id: &str) -> Option<Region> {
        self.store.get(id).cloned()
    }

    pub fn list(&self) -> Vec<Region> {
        self.store.list()
    }

    pub fn status(&self) -> EngineStatus {
        let regions = self
            .store
            .list()
            .into_iter()
            .map(|region| {
                let state = self.detector.state(&region.id).copied().unwrap_or_default();
                RegionStatus {
                    region,
                    inside: state.last_inside,
                    dwell_deadline_ms: state.dwell_deadline_ms,
                    confirmed: state.confirmed,
                }
            })
            .collect();
        EngineStatus { last_fix_ms: self.detector.last_fix_ms(), regions }
    }

    /// Remove regions whose expiry is at or before `now_ms`
    pub fn expire(&mut self, now_ms: u64) -> Vec<String> {
        let expired = self.store.expired(now_ms);
        for id in &expired {
            if self.store.unregister(id).is_ok() {
                self.detector.forget(id);
                self.dispatcher.clear(id);
                self.metrics.record_region_expired();
                info!(region_id = %id, now_ms = %now_ms, "region_expired");
            }
        }
        if !expired.is_empty() {
            self.metrics.set_regions_active(self.store.len());
        }
        expired
    }

    /// Evaluate a fix; returns the transitions forwarded to the notify channel
    ///
    /// Rejected fixes are counted and logged at debug level here, so callers
    /// may ignore the error.
    pub fn on_fix(&mut self, fix: &PositionFix) -> Result<Vec<TransitionEvent>, GeofenceError> {
        let process_start = Instant::now();

        if let Err(e) = self.check_fix(fix) {
            self.metrics.record_fix_rejected();
            debug!(error = %e, position = %fix.position, ts = %fix.timestamp_ms, "fix_rejected");
            return Err(e);
        }

        // Stale check runs before expiry; a stale fix changes nothing
        if let Some(last) = self.detector.last_fix_ms() {
            if fix.timestamp_ms <= last {
                self.metrics.record_fix_stale();
                let err = GeofenceError::StaleFix { timestamp_ms: fix.timestamp_ms, last_accepted_ms: last };
                debug!(error = %err, "fix_stale");
                return Err(err);
            }
        }

        self.expire(fix.timestamp_ms);

        let eval = match self.detector.on_fix(fix, &self.store) {
            Ok(eval) => eval,
            Err(e) => {
                self.metrics.record_fix_stale();
                debug!(error = %e, "fix_stale");
                return Err(e);
            }
        };

        let forwarded = self.dispatch(eval);

        // Record processing latency (lock-free)
        let latency_us = process_start.elapsed().as_micros() as u64;
        self.metrics.record_fix_processed(latency_us);
        Ok(forwarded)
    }

    /// Expiry and dwell deadlines at `now_ms`
    pub fn on_tick(&mut self, now_ms: u64) -> Vec<TransitionEvent> {
        self.metrics.record_tick();
        self.expire(now_ms);
        let eval = self.detector.on_tick(now_ms, &self.store);
        self.dispatch(eval)
    }

    fn check_fix(&self, fix: &PositionFix) -> Result<(), GeofenceError> {
        fix.validate()?;
        if self.max_fix_accuracy_m > 0.0 && fix.accuracy_meters > self.max_fix_accuracy_m {
            return Err(GeofenceError::InaccurateFix {
                accuracy_m: fix.accuracy_meters,
                limit_m: self.max_fix_accuracy_m,
            });
        }
        Ok(())
    }

    fn dispatch(&mut self, eval: Evaluation) -> Vec<TransitionEvent> {
        for boundary in &eval.boundaries {
            self.dispatcher.observe_boundary(&boundary.region_id, boundary.kind);
        }

        let mut forwarded = Vec::with_capacity(eval.candidates.len());
        for event in eval.candidates {
            let copy = event.clone();
            if self.dispatcher.on_candidate(event) == DispatchOutcome::Forwarded {
                debug!(region_id = %copy.region_id, kind = %copy.kind, ts = %copy.at_timestamp_ms, "transition_forwarded");
                forwarded.push(copy);
            }
        }
        forwarded
    }
}
