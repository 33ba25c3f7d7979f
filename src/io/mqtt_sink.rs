//! MQTT notification publisher
//!
//! Publishes each notification as JSON to the configured topic with QoS 1
//! (at-least-once on the wire; the engine itself is at-most-once).

use crate::infra::config::Config;
use crate::io::notify_channel::Notification;
use crate::io::sink::{NotificationSink, SinkError};
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct MqttSink {
    client: AsyncClient,
    topic: String,
}

impl MqttSink {
    /// Connect to the configured broker and spawn the event loop driver
    pub fn new(config: &Config, topic: &str) -> Self {
        let client_id = format!("geofence-notify-{}", std::process::id());
        let mut mqttoptions = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
        mqttoptions.set_keep_alive(Duration::from_secs(30));
        mqttoptions.set_clean_session(true);

        // Set credentials if configured
        if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
            mqttoptions.set_credentials(username, password);
        }

        let (client, mut eventloop) = AsyncClient::new(mqttoptions, 100);

        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("mqtt_notify_connected");
                    }
                    Ok(Event::Incoming(Packet::PubAck(_))) => {
                        debug!("mqtt_notify_puback");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "mqtt_notify_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        info!(topic = %topic, "mqtt_sink_initialized");
        Self { client, topic: topic.to_string() }
    }
}

#[async_trait]
impl NotificationSink for MqttSink {
    fn name(&self) -> &'static str {
        "mqtt"
    }

    async fn notify(&self, notification: &Notification) -> Result<(), SinkError> {
        let json = serde_json::to_vec(notification)?;
        self.client.publish(&self.topic, QoS::AtLeastOnce, false, json).await?;
        Ok(())
    }
}
