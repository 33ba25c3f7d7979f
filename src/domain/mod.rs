//! Domain models - core geofence types and geometry
//!
//! This module contains the canonical data types used throughout the system:
//! - `Region` / `RegionSpec` - monitored circular areas and their config shape
//! - `PositionFix` - a timestamped position observation
//! - `TransitionEvent` - ENTER/EXIT/DWELL detected for a region
//! - `GeofenceError` - recoverable errors returned to callers
//! - `geo` - haversine distance and containment

pub mod error;
pub mod geo;
pub mod types;

// Re-export commonly used types at module level
pub use error::GeofenceError;
pub use types::{
    LatLon, PositionFix, Region, RegionSpec, TransitionEvent, TransitionKind, TransitionSet,
};
