//! Alert sink implementations

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::io::AsyncWriteExt;

use super::{Alert, AlertError, AlertKind, AlertSeverity, AlertSink};

/// Writes alerts to the tracing subscriber
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAlertSink;

#[async_trait]
impl AlertSink for TracingAlertSink {
    async fn emit(&self, alert: &Alert) -> Result<(), AlertError> {
        let location = alert.location.as_deref().unwrap_or("-");
        match alert.kind.severity() {
            AlertSeverity::Info => tracing::info!(
                kind = %alert.kind,
                location = location,
                adapter_type = %alert.adapter_type,
                work_item_id = alert.work_item_id,
                "{}",
                alert.instance_data
            ),
            AlertSeverity::Warning => tracing::warn!(
                kind = %alert.kind,
                location = location,
                adapter_type = %alert.adapter_type,
                work_item_id = alert.work_item_id,
                "{}",
                alert.instance_data
            ),
            AlertSeverity::Critical => tracing::error!(
                kind = %alert.kind,
                location = location,
                adapter_type = %alert.adapter_type,
                work_item_id = alert.work_item_id,
                "{}",
                alert.instance_data
            ),
        }
        Ok(())
    }
}

/// Appends alerts to a file, one JSON object per line
#[derive(Debug)]
pub struct JsonFileAlertSink {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonFileAlertSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl AlertSink for JsonFileAlertSink {
    async fn emit(&self, alert: &Alert) -> Result<(), AlertError> {
        let mut line = serde_json::to_string(alert)
            .map_err(|e| AlertError::Unavailable(format!("encoding alert: {e}")))?;
        line.push('\n');

        let unavailable = |e: std::io::Error| {
            AlertError::Unavailable(format!("{}: {e}", self.path.display()))
        };
        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(unavailable)?;
        file.write_all(line.as_bytes()).await.map_err(unavailable)?;
        file.flush().await.map_err(unavailable)?;
        Ok(())
    }
}

/// Keeps emitted alerts in memory
#[derive(Debug, Default)]
pub struct MemoryAlertSink {
    alerts: Mutex<Vec<Alert>>,
    failing: AtomicBool,
}

impl MemoryAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent emits fail
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().map(|a| a.clone()).unwrap_or_default()
    }

    pub fn kinds(&self) -> Vec<AlertKind> {
        self.alerts().into_iter().map(|a| a.kind).collect()
    }

    pub fn count(&self, kind: AlertKind) -> usize {
        self.alerts().iter().filter(|a| a.kind == kind).count()
    }

    pub fn clear(&self) {
        if let Ok(mut alerts) = self.alerts.lock() {
            alerts.clear();
        }
    }
}

#[async_trait]
impl AlertSink for MemoryAlertSink {
    async fn emit(&self, alert: &Alert) -> Result<(), AlertError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AlertError::Unavailable("sink disabled".to_string()));
        }
        self.alerts
            .lock()
            .map_err(|_| AlertError::Unavailable("sink lock poisoned".to_string()))?
            .push(alert.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alert(kind: AlertKind) -> Alert {
        Alert {
            kind,
            instance_data: "data".to_string(),
            location: None,
            timestamp_micros: 0,
            adapter_type: "MANAGER".to_string(),
            work_item_id: 1,
        }
    }

    #[tokio::test]
    async fn test_memory_sink_counts() {
        let sink = MemoryAlertSink::new();
        sink.emit(&alert(AlertKind::InactiveManager)).await.unwrap();
        sink.emit(&alert(AlertKind::InactiveManager)).await.unwrap();
        sink.emit(&alert(AlertKind::NodeAlreadyActive)).await.unwrap();

        assert_eq!(sink.count(AlertKind::InactiveManager), 2);
        assert_eq!(sink.kinds().len(), 3);
        sink.clear();
        assert!(sink.alerts().is_empty());
    }

    #[tokio::test]
    async fn test_json_file_sink_appends_lines() {
        let dir = tempfile::TempDir::new().unwrap();
        let sink = JsonFileAlertSink::new(dir.path().join("alerts.jsonl"));
        sink.emit(&alert(AlertKind::InactiveManager)).await.unwrap();
        sink.emit(&alert(AlertKind::RequeuedWorkItem)).await.unwrap();

        let content = std::fs::read_to_string(sink.path()).unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["instance_data"], "data");
        assert_eq!(lines[1]["work_item_id"], 1);
    }

    #[tokio::test]
    async fn test_json_file_sink_reports_unwritable_path() {
        let sink = JsonFileAlertSink::new("/nonexistent-dir/alerts.jsonl");
        let err = sink.emit(&alert(AlertKind::InactiveManager)).await.unwrap_err();
        assert!(err.to_string().contains("/nonexistent-dir/alerts.jsonl"));
    }

    #[tokio::test]
    async fn test_tracing_sink_accepts_all_severities() {
        let sink = TracingAlertSink;
        for kind in [
            AlertKind::NodeAlreadyActive,
            AlertKind::AdapterInstanceEnded,
            AlertKind::SelfZombieDetected,
        ] {
            assert!(sink.emit(&alert(kind)).await.is_ok());
        }
    }
}
