//! Adapter instance supervision
//!
//! Starts adapter processes on this node, keeps an append-only table of
//! what was started, and removes store records left behind by instances
//! that are gone. Exit handling lives in [`monitor`].

pub mod monitor;

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::mpsc;

use crate::alerts::{AlertEmitter, AlertKind};
use crate::config::ManagerConfig;
use crate::keywords::KeywordExpander;
use crate::metrics;
use crate::models::AdapterRecord;
use crate::store::{DataStore, StoreError};
use crate::utils::clock::Clock;
use crate::utils::is_pid_running;

pub use monitor::{InstanceExit, InstanceReaper};

/// Errors starting or cleaning up adapter instances
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("invocation for adapter type {adapter_type} is empty")]
    EmptyInvocation { adapter_type: String },

    #[error("failed to prepare log file {path}: {source}")]
    LogFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("spawned {adapter_type} instance reported no pid")]
    MissingPid { adapter_type: String },
}

/// A started adapter process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterInstance {
    pub adapter_type: String,
    /// Per-type ordinal, starting at 1
    pub instance: u32,
    pub location: String,
    pub hostname: String,
    pub pid: u32,
    /// Expanded invocation
    pub invocation: String,
    pub log_file: PathBuf,
    pub requesting_work_item_id: i64,
    pub started_at_millis: i64,
}

// ============================================================================
// Supervisor
// ============================================================================

pub struct AdapterInstanceSupervisor {
    config: Arc<ManagerConfig>,
    store: Arc<dyn DataStore>,
    alerts: AlertEmitter,
    clock: Arc<dyn Clock>,
    own_pid: u32,
    instances: Mutex<Vec<AdapterInstance>>,
    ordinals: Mutex<HashMap<String, u32>>,
    configured_started: AtomicBool,
    exits: mpsc::UnboundedSender<InstanceExit>,
}

impl AdapterInstanceSupervisor {
    /// Create a supervisor and the reaper that handles its instances' exits
    pub fn new(
        config: Arc<ManagerConfig>,
        store: Arc<dyn DataStore>,
        alerts: AlertEmitter,
        clock: Arc<dyn Clock>,
    ) -> (Self, InstanceReaper) {
        let (tx, rx) = mpsc::unbounded_channel();
        let reaper = InstanceReaper::new(store.clone(), alerts.clone(), rx);
        let supervisor = Self {
            config,
            store,
            alerts,
            clock,
            own_pid: std::process::id(),
            instances: Mutex::new(Vec::new()),
            ordinals: Mutex::new(HashMap::new()),
            configured_started: AtomicBool::new(false),
            exits: tx,
        };
        (supervisor, reaper)
    }

    /// Snapshot of every instance started by this process
    pub fn instances(&self) -> Vec<AdapterInstance> {
        self.instances
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn instance_count(&self) -> usize {
        self.instances
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    fn next_ordinal(&self, adapter_type: &str) -> u32 {
        let mut ordinals = self
            .ordinals
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let ordinal = ordinals.entry(adapter_type.to_string()).or_insert(0);
        *ordinal += 1;
        *ordinal
    }

    /// Spawn one adapter process and start watching it
    ///
    /// Both templates are keyword-expanded. The log file is truncated and
    /// receives the child's stdout and stderr.
    pub async fn start_instance(
        &self,
        location: &str,
        hostname: &str,
        adapter_type: &str,
        invocation_template: &str,
        log_file_template: &str,
        requesting_work_item_id: i64,
    ) -> Result<AdapterInstance, SupervisorError> {
        let ordinal = self.next_ordinal(adapter_type);
        let expander = KeywordExpander::for_instance(&self.config, location, hostname, ordinal);
        let invocation = expander.expand(invocation_template);
        let log_file = PathBuf::from(expander.expand(log_file_template));

        let mut parts = invocation.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| SupervisorError::EmptyInvocation {
                adapter_type: adapter_type.to_string(),
            })?
            .to_string();

        let log_error = |source| SupervisorError::LogFile {
            path: log_file.clone(),
            source,
        };
        let stdout = std::fs::File::create(&log_file).map_err(log_error)?;
        let stderr = stdout.try_clone().map_err(log_error)?;

        let child = Command::new(&program)
            .args(parts)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .kill_on_drop(false)
            .spawn()
            .map_err(|source| SupervisorError::Spawn {
                program: program.clone(),
                source,
            })?;

        let pid = child.id().ok_or_else(|| SupervisorError::MissingPid {
            adapter_type: adapter_type.to_string(),
        })?;

        let instance = AdapterInstance {
            adapter_type: adapter_type.to_string(),
            instance: ordinal,
            location: location.to_string(),
            hostname: hostname.to_string(),
            pid,
            invocation,
            log_file,
            requesting_work_item_id,
            started_at_millis: self.clock.now_millis(),
        };
        self.instances
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(instance.clone());
        metrics::record_instance_started(adapter_type);

        tokio::spawn(monitor::watch_instance(
            child,
            InstanceExit {
                adapter_type: adapter_type.to_string(),
                location: location.to_string(),
                pid,
                instance: ordinal,
                exit_code: None,
            },
            self.exits.clone(),
        ));

        tracing::info!(
            adapter_type = %adapter_type,
            instance = ordinal,
            pid = pid,
            location = %location,
            log_file = %instance.log_file.display(),
            "Started adapter instance"
        );
        Ok(instance)
    }

    /// Remove every adapter record on the node that is not this process
    pub async fn cleanup_stale_instances(&self, location: &str) -> Result<usize, SupervisorError> {
        let own_pid = self.own_pid;
        self.remove_adapters(location, |adapter| adapter.pid != own_pid)
            .await
    }

    /// Remove adapter records on the node whose process no longer runs
    pub async fn cleanup_dead_pid_instances(
        &self,
        location: &str,
    ) -> Result<usize, SupervisorError> {
        let own_pid = self.own_pid;
        self.remove_adapters(location, |adapter| {
            adapter.pid != own_pid && !is_pid_running(adapter.pid)
        })
        .await
    }

    async fn remove_adapters(
        &self,
        location: &str,
        should_remove: impl Fn(&AdapterRecord) -> bool,
    ) -> Result<usize, SupervisorError> {
        let adapters = self.store.adapters_on_node(location).await?;
        let mut removed = 0;
        for adapter in adapters.iter().filter(|a| should_remove(a)) {
            if let Some(base_id) = self
                .store
                .base_work_item_id(&adapter.adapter_type, adapter.id)
                .await?
            {
                self.store
                    .teardown_base_work_item(&adapter.adapter_type, base_id)
                    .await?;
            }
            self.store
                .teardown_adapter(&adapter.adapter_type, adapter.id)
                .await?;
            tracing::info!(
                adapter_type = %adapter.adapter_type,
                adapter_id = adapter.id,
                pid = adapter.pid,
                "Removed stale adapter record"
            );
            removed += 1;
        }
        Ok(removed)
    }

    /// Start the instances configured for this node, once per process
    ///
    /// A failed start is logged and alerted; the remaining rows still run.
    /// A store error reading the rows leaves the call retryable.
    /// Returns the number of instances started.
    pub async fn start_configured_instances_for_node(
        &self,
        location: &str,
        hostname: &str,
        requesting_work_item_id: i64,
    ) -> Result<usize, SupervisorError> {
        if self.configured_started.load(Ordering::SeqCst) {
            tracing::debug!("Configured instances already started");
            return Ok(0);
        }

        // latch only once the rows are read, so a failed read can be retried
        let rows = self.store.configured_instances(location).await?;
        if self.configured_started.swap(true, Ordering::SeqCst) {
            return Ok(0);
        }
        let mut started = 0;
        for row in &rows {
            for _ in 0..row.initial_instances {
                match self
                    .start_instance(
                        location,
                        hostname,
                        &row.adapter_type,
                        &row.invocation,
                        &row.log_file,
                        requesting_work_item_id,
                    )
                    .await
                {
                    Ok(_) => started += 1,
                    Err(e) => {
                        tracing::warn!(
                            adapter_type = %row.adapter_type,
                            error = %e,
                            "Failed to start configured instance"
                        );
                        self.alerts
                            .emit_best_effort(
                                AlertKind::StartInstanceFailed,
                                format!("AdapterType={}, Error={}", row.adapter_type, e),
                                Some(location),
                            )
                            .await;
                    }
                }
            }
        }
        tracing::info!(location = %location, started = started, "Started configured instances");
        Ok(started)
    }
}
