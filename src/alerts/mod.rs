//! Alert emission for fleet events
//!
//! Every noteworthy control-plane event (requeued zombie, dead adapter,
//! inactive peer manager, stuck pipeline stage, ...) is reported through
//! an [`AlertSink`]. Emission is fire-and-forget: call sites on error paths
//! use [`AlertEmitter::emit_best_effort`] so that a failing sink never masks
//! the failure being reported.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────┐
//! │ AlertEmitter                  │
//! │  - stamps issuer + timestamp  │
//! │  - counts alerts per kind     │
//! └───────────────────────────────┘
//!                 │
//!         ┌───────────────┼───────────────┐
//!         ▼               ▼               ▼
//!   ┌───────────┐   ┌───────────┐   ┌───────────┐
//!   │  Tracing  │   │ JSON file │   │  Memory   │
//!   │   Sink    │   │   Sink    │   │   Sink    │
//!   └───────────┘   └───────────┘   └───────────┘
//! ```

mod sink;

use async_trait::async_trait;
use serde::Serialize;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use thiserror::Error;

use crate::metrics;
use crate::utils::clock::Clock;

pub use sink::{JsonFileAlertSink, MemoryAlertSink, TracingAlertSink};

/// Errors raised by alert sinks
#[derive(Debug, Clone, Error)]
pub enum AlertError {
    /// The sink could not accept the alert
    #[error("alert sink unavailable: {0}")]
    Unavailable(String),
}

/// Severity level of an alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum AlertSeverity {
    /// Informational alerts for tracking purposes
    Info,
    /// Warning alerts that require attention
    Warning,
    /// Critical alerts requiring immediate action
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Kinds of events the manager reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AlertKind {
    /// A loop pass or cleanup step failed and processing continued
    AdapterExceptionButContinue,
    /// A zombie work item was put back on its queue
    RequeuedWorkItem,
    /// A supervised adapter process exited
    AdapterInstanceEnded,
    /// No invocation info exists for an adapter type and queue
    StartInstanceFailed,
    /// The owning node has no manager to start an instance on
    NoManagerForAdditionalInstance,
    /// An idle instance is already available for the backlog
    FreeInstanceAlreadyAvailable,
    StartedAdditionalInstance,
    /// A backlogged item was force-finished because it can never be serviced
    BacklogItemUnserviceable,
    DataReceiverAppearsStuck,
    MissingConsoleMessages,
    ComputeNodeDidNotShutdown,
    ServiceNodeDidNotShutdown,
    /// A manager work item has no proof of life yet
    ManagerProofOfLifeMissing,
    InactiveManager,
    /// Inactive manager on a node that was still active; node marked in error
    InactiveManagerNodeInError,
    NodeAlreadyActive,
    SelfZombieDetected,
    /// The restart command ran and reported failure
    ZombieRestartFailed,
    /// The restart command could not be run at all
    ZombieRestartError,
    ClockNotSynced,
    UnexpectedWorkItem,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AdapterExceptionButContinue => "adapter-exception-but-continue",
            Self::RequeuedWorkItem => "requeued-work-item",
            Self::AdapterInstanceEnded => "adapter-instance-ended",
            Self::StartInstanceFailed => "start-instance-failed",
            Self::NoManagerForAdditionalInstance => "no-manager-for-additional-instance",
            Self::FreeInstanceAlreadyAvailable => "free-instance-already-available",
            Self::StartedAdditionalInstance => "started-additional-instance",
            Self::BacklogItemUnserviceable => "backlog-item-unserviceable",
            Self::DataReceiverAppearsStuck => "data-receiver-appears-stuck",
            Self::MissingConsoleMessages => "missing-console-messages",
            Self::ComputeNodeDidNotShutdown => "compute-node-did-not-shutdown",
            Self::ServiceNodeDidNotShutdown => "service-node-did-not-shutdown",
            Self::ManagerProofOfLifeMissing => "manager-proof-of-life-missing",
            Self::InactiveManager => "inactive-manager",
            Self::InactiveManagerNodeInError => "inactive-manager-node-in-error",
            Self::NodeAlreadyActive => "node-already-active",
            Self::SelfZombieDetected => "self-zombie-detected",
            Self::ZombieRestartFailed => "zombie-restart-failed",
            Self::ZombieRestartError => "zombie-restart-error",
            Self::ClockNotSynced => "clock-not-synced",
            Self::UnexpectedWorkItem => "unexpected-work-item",
        }
    }

    pub fn severity(&self) -> AlertSeverity {
        match self {
            Self::RequeuedWorkItem
            | Self::NoManagerForAdditionalInstance
            | Self::FreeInstanceAlreadyAvailable
            | Self::StartedAdditionalInstance
            | Self::ManagerProofOfLifeMissing
            | Self::NodeAlreadyActive => AlertSeverity::Info,
            Self::AdapterExceptionButContinue
            | Self::AdapterInstanceEnded
            | Self::StartInstanceFailed
            | Self::DataReceiverAppearsStuck
            | Self::MissingConsoleMessages
            | Self::ComputeNodeDidNotShutdown
            | Self::ServiceNodeDidNotShutdown
            | Self::UnexpectedWorkItem => AlertSeverity::Warning,
            Self::BacklogItemUnserviceable
            | Self::InactiveManager
            | Self::InactiveManagerNodeInError
            | Self::SelfZombieDetected
            | Self::ZombieRestartFailed
            | Self::ZombieRestartError
            | Self::ClockNotSynced => AlertSeverity::Critical,
        }
    }
}

impl std::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single emitted event
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub kind: AlertKind,
    /// Free-text payload describing the instance of the event
    pub instance_data: String,
    /// Location the event concerns, if any
    pub location: Option<String>,
    pub timestamp_micros: i64,
    /// Adapter type of the issuing process
    pub adapter_type: String,
    /// Work item the issuing process was working on
    pub work_item_id: i64,
}

/// Destination for alerts
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn emit(&self, alert: &Alert) -> Result<(), AlertError>;
}

// ============================================================================
// Alert Emitter
// ============================================================================

/// Stamps alerts with the issuing process identity and forwards them to a sink
#[derive(Clone)]
pub struct AlertEmitter {
    sink: Arc<dyn AlertSink>,
    clock: Arc<dyn Clock>,
    adapter_type: String,
    work_item_id: Arc<AtomicI64>,
}

impl AlertEmitter {
    pub fn new(sink: Arc<dyn AlertSink>, clock: Arc<dyn Clock>, adapter_type: &str) -> Self {
        Self {
            sink,
            clock,
            adapter_type: adapter_type.to_string(),
            work_item_id: Arc::new(AtomicI64::new(-1)),
        }
    }

    /// Record the work item subsequent alerts are issued under (shared by all clones)
    pub fn set_work_item_id(&self, id: i64) {
        self.work_item_id.store(id, Ordering::SeqCst);
    }

    pub fn work_item_id(&self) -> i64 {
        self.work_item_id.load(Ordering::SeqCst)
    }

    fn build(&self, kind: AlertKind, instance_data: String, location: Option<&str>) -> Alert {
        Alert {
            kind,
            instance_data,
            location: location.map(str::to_string),
            timestamp_micros: self.clock.now_micros(),
            adapter_type: self.adapter_type.clone(),
            work_item_id: self.work_item_id(),
        }
    }

    /// Emit an alert and report sink failures to the caller
    pub async fn emit(
        &self,
        kind: AlertKind,
        instance_data: impl Into<String>,
        location: Option<&str>,
    ) -> Result<(), AlertError> {
        let alert = self.build(kind, instance_data.into(), location);
        metrics::record_alert(kind.as_str());
        self.sink.emit(&alert).await
    }

    /// Emit an alert, logging and swallowing sink failures
    pub async fn emit_best_effort(
        &self,
        kind: AlertKind,
        instance_data: impl Into<String>,
        location: Option<&str>,
    ) {
        if let Err(e) = self.emit(kind, instance_data, location).await {
            tracing::warn!(kind = %kind, error = %e, "Failed to emit alert");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::clock::ManualClock;

    #[tokio::test]
    async fn test_emitter_stamps_issuer() {
        let sink = Arc::new(MemoryAlertSink::new());
        let clock = Arc::new(ManualClock::new(2_000));
        let emitter = AlertEmitter::new(sink.clone(), clock, "MANAGER");
        emitter.set_work_item_id(42);

        emitter
            .emit(AlertKind::RequeuedWorkItem, "WorkItemId=7", Some("R0-SN1"))
            .await
            .unwrap();

        let alerts = sink.alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].adapter_type, "MANAGER");
        assert_eq!(alerts[0].work_item_id, 42);
        assert_eq!(alerts[0].timestamp_micros, 2_000_000);
        assert_eq!(alerts[0].location.as_deref(), Some("R0-SN1"));
    }

    #[tokio::test]
    async fn test_best_effort_swallows_failures() {
        let sink = Arc::new(MemoryAlertSink::new());
        sink.set_failing(true);
        let emitter = AlertEmitter::new(sink.clone(), Arc::new(ManualClock::new(0)), "MANAGER");

        assert!(emitter
            .emit(AlertKind::InactiveManager, "x", None)
            .await
            .is_err());
        emitter
            .emit_best_effort(AlertKind::InactiveManager, "x", None)
            .await;
        assert!(sink.alerts().is_empty());
    }

    #[test]
    fn test_severity_mapping() {
        assert_eq!(AlertKind::SelfZombieDetected.severity(), AlertSeverity::Critical);
        assert_eq!(AlertKind::RequeuedWorkItem.severity(), AlertSeverity::Info);
        assert_eq!(AlertKind::AdapterInstanceEnded.severity(), AlertSeverity::Warning);
    }
}
