//! Notify worker - delivers transitions to sinks off the hot path
//!
//! The engine hands transitions to a bounded channel; this worker wraps each
//! one into a `Notification` and delivers it to every sink in order. Failures
//! are logged and counted, never retried.

use crate::domain::types::TransitionEvent;
use crate::infra::metrics::Metrics;
use crate::io::notify_channel::Notification;
use crate::io::sink::NotificationSink;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{info, warn};

pub struct NotifyWorker {
    site_id: String,
    sinks: Vec<Box<dyn NotificationSink>>,
    event_rx: mpsc::Receiver<TransitionEvent>,
    metrics: Arc<Metrics>,
}

impl NotifyWorker {
    pub fn new(
        site_id: String,
        sinks: Vec<Box<dyn NotificationSink>>,
        event_rx: mpsc::Receiver<TransitionEvent>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { site_id, sinks, event_rx, metrics }
    }

    /// Run the worker until the channel closes (engine dropped its sender)
    pub async fn run(mut self) {
        let sink_names: Vec<&str> = self.sinks.iter().map(|s| s.name()).collect();
        info!(sinks = ?sink_names, "notify_worker_started");

        while let Some(event) = self.event_rx.recv().await {
            let notification = Notification::from_event(event, &self.site_id);
            self.deliver(&notification).await;
        }

        info!("notify_worker_stopped");
    }

    /// Deliver one notification to every sink
    pub async fn deliver(&self, notification: &Notification) {
        let start = Instant::now();
        for sink in &self.sinks {
            if let Err(e) = sink.notify(notification).await {
                self.metrics.record_sink_failure();
                warn!(
                    sink = %sink.name(),
                    region_id = %notification.region_id,
                    kind = %notification.kind,
                    error = %e,
                    "sink_delivery_failed"
                );
            }
        }
        self.metrics.record_delivery(start.elapsed().as_micros() as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::TransitionKind;
    use crate::io::sink::SinkError;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        seen: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl NotificationSink for RecordingSink {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn notify(&self, n: &Notification) -> Result<(), SinkError> {
            self.seen.lock().push(format!("{}:{}", n.region_id, n.kind));
            Ok(())
        }
    }

    struct FailingSink;

    #[async_trait]
    impl NotificationSink for FailingSink {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn notify(&self, _n: &Notification) -> Result<(), SinkError> {
            Err(SinkError::Status(503))
        }
    }

    #[tokio::test]
    async fn test_worker_delivers_to_all_sinks() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let metrics = Arc::new(Metrics::new());
        let (tx, rx) = mpsc::channel(8);
        let sinks: Vec<Box<dyn NotificationSink>> = vec![
            Box::new(FailingSink),
            Box::new(RecordingSink { seen: seen.clone() }),
        ];
        let worker = NotifyWorker::new("lab".to_string(), sinks, rx, metrics.clone());

        tx.send(TransitionEvent::new("home", TransitionKind::Enter, 1)).await.unwrap();
        tx.send(TransitionEvent::new("home", TransitionKind::Exit, 2)).await.unwrap();
        drop(tx);
        worker.run().await;

        // A failing sink does not stop delivery to the next one
        assert_eq!(*seen.lock(), vec!["home:enter".to_string(), "home:exit".to_string()]);
        assert_eq!(metrics.sink_failures(), 2);
        assert_eq!(metrics.report().notify_delivered, 2);
    }
}
