//! Notification file sink
//!
//! Notifications are written in JSONL format (one JSON object per line)
//! to the file specified in config.

use crate::io::notify_channel::Notification;
use crate::io::sink::{NotificationSink, SinkError};
use async_trait::async_trait;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub struct JsonlSink {
    file_path: PathBuf,
}

impl JsonlSink {
    pub fn new<P: AsRef<Path>>(file_path: P) -> Self {
        let file_path = file_path.as_ref().to_path_buf();
        info!(file_path = %file_path.display(), "jsonl_sink_initialized");
        Self { file_path }
    }

    /// Append a line to the notification file
    fn append_line(&self, line: &str) -> std::io::Result<()> {
        // Create parent directories if they don't exist
        if let Some(parent) = self.file_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new().create(true).append(true).open(&self.file_path)?;
        writeln!(file, "{}", line)?;
        debug!(file = %self.file_path.display(), bytes = %line.len(), "notification_written");
        Ok(())
    }
}

#[async_trait]
impl NotificationSink for JsonlSink {
    fn name(&self) -> &'static str {
        "jsonl"
    }

    async fn notify(&self, notification: &Notification) -> Result<(), SinkError> {
        let json = serde_json::to_string(notification)?;
        // One short buffered append; cheap enough to do inline on the worker
        self.append_line(&json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{TransitionEvent, TransitionKind};
    use std::fs;
    use tempfile::tempdir;

    fn notification(region: &str, kind: TransitionKind) -> Notification {
        Notification::from_event(TransitionEvent::new(region, kind, 1_000), "lab")
    }

    #[tokio::test]
    async fn test_write_notification() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("notifications.jsonl");
        let sink = JsonlSink::new(&file_path);

        let n = notification("home", TransitionKind::Enter);
        sink.notify(&n).await.unwrap();

        let content = fs::read_to_string(&file_path).unwrap();
        assert!(content.ends_with('\n'));
        let parsed: serde_json::Value = serde_json::from_str(content.trim()).unwrap();
        assert_eq!(parsed["id"], n.id.to_string());
        assert_eq!(parsed["regionId"], "home");
        assert_eq!(parsed["kind"], "enter");
    }

    #[tokio::test]
    async fn test_creates_parent_directories() {
        let dir = tempdir().unwrap();
        let nested_path = dir.path().join("nested").join("dir").join("notifications.jsonl");
        let sink = JsonlSink::new(&nested_path);

        sink.notify(&notification("work", TransitionKind::Exit)).await.unwrap();
        assert!(nested_path.exists());
    }

    #[tokio::test]
    async fn test_append_mode() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("notifications.jsonl");

        // Pre-create file with existing content
        fs::write(&file_path, "{\"existing\":\"data\"}\n").unwrap();

        let sink = JsonlSink::new(&file_path);
        sink.notify(&notification("fitness", TransitionKind::Dwell)).await.unwrap();
        sink.notify(&notification("fitness", TransitionKind::Exit)).await.unwrap();

        let content = fs::read_to_string(&file_path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("existing"));
        assert!(lines[2].contains("\"exit\""));
    }

    #[tokio::test]
    async fn test_unwritable_path_is_error() {
        let dir = tempdir().unwrap();
        // A directory cannot be opened for append
        let sink = JsonlSink::new(dir.path());
        let err = sink.notify(&notification("home", TransitionKind::Enter)).await.unwrap_err();
        assert!(matches!(err, SinkError::Io(_)));
    }
}
