//! IO modules - external system interfaces
//!
//! Position sources:
//! - `mqtt` - MQTT subscriber for JSON fixes
//! - `fix_listener` - TCP listener for newline-delimited JSON fixes
//! - `nmea` - Serial GPS receiver (NMEA GGA)
//! - `fix_payload` - JSON fix decoding shared by the sources
//!
//! Notification delivery:
//! - `notify_channel` - Bounded channel between engine and notify worker
//! - `sink` - Sink trait plus the log sink
//! - `jsonl_sink`, `mqtt_sink`, `webhook_sink` - Delivery targets
//!
//! Management:
//! - `api` - HTTP region API, fix ingest and /metrics
//! - `prometheus` - Prometheus text formatting

pub mod api;
pub mod fix_listener;
pub mod fix_payload;
pub mod jsonl_sink;
pub mod mqtt;
pub mod mqtt_sink;
pub mod nmea;
pub mod notify_channel;
pub mod prometheus;
pub mod sink;
pub mod webhook_sink;

// Re-export commonly used types
pub use api::{start_api_server, ApiState};
pub use fix_listener::start_fix_listener;
pub use fix_payload::parse_fix_payload;
pub use jsonl_sink::JsonlSink;
pub use mqtt_sink::MqttSink;
pub use nmea::GpsReader;
pub use notify_channel::{create_notify_channel, Notification, NotifySender};
pub use sink::{LogSink, NotificationSink, SinkError};
pub use webhook_sink::WebhookSink;
