//! geofenced - geofence evaluation and notification daemon
//!
//! Evaluates position fixes against circular regions and notifies on
//! ENTER / EXIT / DWELL transitions.
//!
//! Module structure:
//! - `domain/` - Core types (Region, PositionFix, TransitionEvent) and geometry
//! - `io/` - External interfaces (MQTT, TCP, GPS, HTTP API, sinks)
//! - `services/` - Engine, detector, dispatcher, notify worker
//! - `infra/` - Infrastructure (Config, Metrics, Clock, Broker)

use clap::Parser;
use geofence_engine::infra::clock::schedule_tick;
use geofence_engine::infra::{Clock, Config, Metrics, SystemClock};
use geofence_engine::io::{
    create_notify_channel, start_api_server, start_fix_listener, ApiState, GpsReader, JsonlSink, LogSink,
    MqttSink, NotificationSink, WebhookSink,
};
use geofence_engine::services::{engine_channel, GeofenceEngine, NotifyWorker};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Geofence daemon
#[derive(Parser, Debug)]
#[command(name = "geofenced", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, env = "CONFIG_FILE", default_value = "config/dev.toml")]
    config: String,
}

/// Build the sinks enabled in `[notify]`
fn build_sinks(config: &Config) -> Vec<Box<dyn NotificationSink>> {
    let mut sinks: Vec<Box<dyn NotificationSink>> = Vec::new();

    if config.notify_log() {
        sinks.push(Box::new(LogSink));
    }
    if let Some(path) = config.notify_jsonl_file() {
        sinks.push(Box::new(JsonlSink::new(path)));
    }
    if let Some(topic) = config.notify_mqtt_topic() {
        sinks.push(Box::new(MqttSink::new(config, topic)));
    }
    if let Some(url) = config.notify_webhook_url() {
        match WebhookSink::new(url, config.notify_webhook_timeout_ms()) {
            Ok(sink) => sinks.push(Box::new(sink)),
            Err(e) => error!(url = %url, error = %e, "webhook_sink_disabled"),
        }
    }

    sinks
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Structured logging, level via RUST_LOG (default: info)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(git_hash = %env!("GIT_HASH"), "geofenced starting");

    let args = Args::parse();
    let config = Config::load_from_path(&args.config);

    info!(
        config_file = %config.config_file(),
        site_id = %config.site_id(),
        tick_interval_ms = %config.tick_interval_ms(),
        max_fix_accuracy_m = %config.max_fix_accuracy_m(),
        mqtt_enabled = %config.mqtt_enabled(),
        mqtt_host = %config.mqtt_host(),
        mqtt_port = %config.mqtt_port(),
        mqtt_fix_topic = %config.mqtt_fix_topic(),
        fix_listener_enabled = %config.fix_listener_enabled(),
        gps_enabled = %config.gps_enabled(),
        api_port = %config.api_port(),
        seed_regions = %config.regions().len(),
        "config_loaded"
    );

    if config.broker_enabled() {
        geofence_engine::infra::broker::start_embedded_broker(&config);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let metrics = Arc::new(Metrics::new());

    // Notify path: engine -> bounded channel -> worker -> sinks
    let (notify_tx, notify_rx) = create_notify_channel(config.notify_queue_size());
    let worker = NotifyWorker::new(config.site_id().to_string(), build_sinks(&config), notify_rx, metrics.clone());
    let worker_task = tokio::spawn(worker.run());

    // Engine with seed regions applied before any fix is queued
    let (engine_handle, command_rx) = engine_channel(config.command_queue_size(), clock.clone(), metrics.clone());
    let mut engine = GeofenceEngine::new(&config, clock, notify_tx, metrics.clone());
    for spec in config.regions() {
        if let Err(e) = engine.register(spec.clone()) {
            warn!(region_id = %spec.id, error = %e, "seed_region_rejected");
        }
    }

    let engine_shutdown = shutdown_rx.clone();
    let engine_task = tokio::spawn(async move {
        engine.run(command_rx, engine_shutdown).await;
    });

    schedule_tick(
        Duration::from_millis(config.tick_interval_ms()),
        engine_handle.command_sender(),
        shutdown_rx.clone(),
    );

    // Position sources
    if config.mqtt_enabled() {
        let mqtt_config = config.clone();
        let mqtt_engine = engine_handle.clone();
        let mqtt_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) =
                geofence_engine::io::mqtt::start_mqtt_client(&mqtt_config, mqtt_engine, mqtt_shutdown).await
            {
                error!(error = %e, "MQTT client error");
            }
        });
    }

    if config.fix_listener_enabled() {
        let port = config.fix_listener_port();
        let listener_engine = engine_handle.clone();
        let listener_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = start_fix_listener(port, listener_engine, listener_shutdown).await {
                error!(error = %e, "fix listener error");
            }
        });
    }

    if config.gps_enabled() {
        let reader = GpsReader::new(&config, engine_handle.clone());
        tokio::spawn(reader.run(shutdown_rx.clone()));
    }

    // Region API and /metrics (if port > 0)
    let api_port = config.api_port();
    if api_port > 0 {
        let state = Arc::new(ApiState {
            engine: engine_handle.clone(),
            metrics: metrics.clone(),
            site_id: config.site_id().to_string(),
        });
        let api_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = start_api_server(api_port, state, api_shutdown).await {
                error!(error = %e, "API server error");
            }
        });
    }

    // Periodic metrics summary
    let report_metrics = metrics.clone();
    let report_engine = engine_handle.clone();
    let metrics_interval = config.metrics_interval_secs();
    let mut report_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(metrics_interval));
        loop {
            tokio::select! {
                _ = report_shutdown.changed() => {
                    if *report_shutdown.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    report_metrics.set_command_queue_depth(report_engine.queue_depth() as u64);
                    report_metrics.report().log();
                }
            }
        }
    });

    // Handle shutdown on Ctrl+C
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_tx.send(true);
    });

    // Engine exits on shutdown and drops the notify sender, which lets the
    // worker drain what is already queued
    drop(engine_handle);
    engine_task.await?;
    worker_task.await?;

    info!("geofenced shutdown complete");
    Ok(())
}
