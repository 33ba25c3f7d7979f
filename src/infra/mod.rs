//! Infrastructure - configuration, metrics, time and broker
//!
//! This module contains infrastructure concerns:
//! - `config` - Application configuration (TOML loading, defaults)
//! - `metrics` - Lock-free metrics collection
//! - `clock` - Engine time source and dwell tick scheduler
//! - `broker` - Embedded MQTT broker (rumqttd)

pub mod broker;
pub mod clock;
pub mod config;
pub mod metrics;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use metrics::Metrics;
