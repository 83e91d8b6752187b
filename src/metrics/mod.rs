//! Prometheus metrics for the fleet manager
//!
//! This module provides metrics tracking for:
//! - Work items: zombie requeues, backlog size
//! - Supervision: adapter instances started and exited
//! - Liveness: inactive peer managers, alerts by kind
//! - Control loops: passes and errors per category
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! If initialization fails or never happens, every record function is a no-op.

use prometheus::{
    register_counter, register_counter_vec, register_gauge, Counter, CounterVec, Encoder, Gauge,
    TextEncoder,
};
use std::sync::{Mutex, OnceLock};

// ============================================================================
// Metrics Storage
// ============================================================================

struct ManagerMetrics {
    zombies_requeued: Counter,
    instances_started: CounterVec,
    instances_exited: CounterVec,
    alerts: CounterVec,
    inactive_managers: Gauge,
    backlog_items: Gauge,
    loop_passes: CounterVec,
    loop_errors: CounterVec,
}

static MANAGER_METRICS: OnceLock<ManagerMetrics> = OnceLock::new();

/// Serializes registration so concurrent callers never register twice
static INIT_LOCK: Mutex<()> = Mutex::new(());

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics
///
/// Safe to call more than once; only the first call registers anything.
///
/// # Example
///
/// ```ignore
/// if let Err(e) = fleetmgr::metrics::init_metrics() {
///     tracing::warn!("Metrics initialization failed: {}", e);
/// }
/// ```
pub fn init_metrics() -> Result<(), prometheus::Error> {
    if MANAGER_METRICS.get().is_some() {
        return Ok(());
    }
    let _guard = INIT_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if MANAGER_METRICS.get().is_some() {
        return Ok(());
    }

    let metrics = ManagerMetrics {
        zombies_requeued: register_counter!(
            "fleetmgr_zombies_requeued_total",
            "Total zombie work items put back on their queue"
        )?,
        instances_started: register_counter_vec!(
            "fleetmgr_instances_started_total",
            "Total adapter instances spawned by this manager",
            &["adapter_type"]
        )?,
        instances_exited: register_counter_vec!(
            "fleetmgr_instances_exited_total",
            "Total supervised adapter instances observed exiting",
            &["adapter_type"]
        )?,
        alerts: register_counter_vec!(
            "fleetmgr_alerts_total",
            "Total alerts emitted by kind",
            &["kind"]
        )?,
        inactive_managers: register_gauge!(
            "fleetmgr_inactive_managers",
            "Peer managers currently considered inactive"
        )?,
        backlog_items: register_gauge!(
            "fleetmgr_backlog_items",
            "Backlogged work items seen by the last load-balancing pass"
        )?,
        loop_passes: register_counter_vec!(
            "fleetmgr_loop_passes_total",
            "Total control loop passes by role",
            &["role"]
        )?,
        loop_errors: register_counter_vec!(
            "fleetmgr_loop_errors_total",
            "Total control loop pass failures by error category",
            &["category"]
        )?,
    };

    MANAGER_METRICS.set(metrics).ok();
    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

/// Check if metrics have been initialized
pub fn metrics_initialized() -> bool {
    MANAGER_METRICS.get().is_some()
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Encode all metrics to Prometheus text format
pub fn gather_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

pub fn record_zombies_requeued(count: usize) {
    if let Some(m) = MANAGER_METRICS.get() {
        m.zombies_requeued.inc_by(count as f64);
    }
}

pub fn record_instance_started(adapter_type: &str) {
    if let Some(m) = MANAGER_METRICS.get() {
        m.instances_started.with_label_values(&[adapter_type]).inc();
    }
}

pub fn record_instance_exited(adapter_type: &str) {
    if let Some(m) = MANAGER_METRICS.get() {
        m.instances_exited.with_label_values(&[adapter_type]).inc();
    }
}

pub fn record_alert(kind: &str) {
    if let Some(m) = MANAGER_METRICS.get() {
        m.alerts.with_label_values(&[kind]).inc();
    }
}

pub fn set_inactive_managers(count: usize) {
    if let Some(m) = MANAGER_METRICS.get() {
        m.inactive_managers.set(count as f64);
    }
}

pub fn set_backlog_items(count: usize) {
    if let Some(m) = MANAGER_METRICS.get() {
        m.backlog_items.set(count as f64);
    }
}

pub fn record_loop_pass(role: &str) {
    if let Some(m) = MANAGER_METRICS.get() {
        m.loop_passes.with_label_values(&[role]).inc();
    }
}

pub fn record_loop_error(category: &str) {
    if let Some(m) = MANAGER_METRICS.get() {
        m.loop_errors.with_label_values(&[category]).inc();
    }
}
