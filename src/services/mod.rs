//! Services - detection logic and state management
//!
//! This module contains the core geofence services:
//! - `engine` - Single-writer command loop owning all detection state
//! - `region_store` - Registered regions keyed by id
//! - `detector` - Per-region ENTER/EXIT/DWELL detection
//! - `dispatcher` - Transition dedup and notify hand-off
//! - `notify_worker` - Async delivery to notification sinks

pub mod detector;
pub mod dispatcher;
pub mod engine;
pub mod notify_worker;
pub mod region_store;

// Re-export commonly used types
pub use detector::TransitionDetector;
pub use dispatcher::EventDispatcher;
pub use engine::{engine_channel, Command, EngineHandle, GeofenceEngine};
pub use notify_worker::NotifyWorker;
pub use region_store::RegionStore;
