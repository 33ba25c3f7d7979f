//! MQTT position source
//!
//! Subscribes to the configured fix topic and pushes decoded fixes onto the
//! engine queue.

use crate::infra::config::Config;
use crate::io::fix_payload::parse_fix_payload;
use crate::services::engine::EngineHandle;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Start the MQTT client and forward fixes to the engine
///
/// Fixes are submitted without blocking the MQTT eventloop; drops are
/// counted by the engine handle.
pub async fn start_mqtt_client(
    config: &Config,
    engine: EngineHandle,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let client_id = format!("geofence-fixes-{}", std::process::id());
    let mut mqttoptions = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
    mqttoptions.set_keep_alive(Duration::from_secs(30));

    // Set credentials if configured
    if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
        mqttoptions.set_credentials(username, password);
    }

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 100);
    client.subscribe(config.mqtt_fix_topic(), QoS::AtMostOnce).await?;

    info!(
        topic = %config.mqtt_fix_topic(),
        host = %config.mqtt_host(),
        port = %config.mqtt_port(),
        "mqtt_fix_source_subscribed"
    );

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("mqtt_shutdown");
                    return Ok(());
                }
            }
            result = eventloop.poll() => {
                match result {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let json_str = match std::str::from_utf8(&publish.payload) {
                            Ok(s) => s,
                            Err(e) => {
                                warn!(error = %e, "mqtt_payload_invalid_utf8");
                                continue;
                            }
                        };

                        match parse_fix_payload(json_str, engine.now_ms()) {
                            Ok(fixes) => {
                                debug!(topic = %publish.topic, fix_count = %fixes.len(), "mqtt_fixes_received");
                                for fix in fixes {
                                    engine.submit_fix(fix, "mqtt");
                                }
                            }
                            Err(e) => {
                                debug!(topic = %publish.topic, error = %e, "mqtt_fix_parse_failed");
                            }
                        }
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("mqtt_connected");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(error = %e, "mqtt_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }
}
