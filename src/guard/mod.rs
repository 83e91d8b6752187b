//! Self-zombie detection
//!
//! A manager becomes a zombie when the store no longer agrees that it is
//! alive: its adapter record was torn down (typically by a peer that
//! declared it inactive) or its activation work item was taken over. Before
//! every heartbeat write the manager checks this and, when it is a zombie,
//! asks the host service manager to restart it instead of carrying on with
//! stale state.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::process::Command;

use crate::alerts::{AlertEmitter, AlertKind};
use crate::error::{Error, Result};
use crate::models::{AdapterRecord, AdapterState, WorkItem, WorkItemState};
use crate::store::DataStore;

/// Why this instance considers itself a zombie
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZombieReason {
    AdapterMissing,
    AdapterNotActive,
    WorkItemMissing,
    WorkItemOwnedByOther { owner: Option<i64> },
    WorkItemNotWorking,
}

impl fmt::Display for ZombieReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AdapterMissing => write!(f, "adapter record missing"),
            Self::AdapterNotActive => write!(f, "adapter record not active"),
            Self::WorkItemMissing => write!(f, "work item missing"),
            Self::WorkItemOwnedByOther { owner: Some(owner) } => {
                write!(f, "work item owned by adapter {owner}")
            }
            Self::WorkItemOwnedByOther { owner: None } => write!(f, "work item has no owner"),
            Self::WorkItemNotWorking => write!(f, "work item not in working state"),
        }
    }
}

/// Decide whether the store still recognizes this instance
///
/// Returns `None` when both the adapter record and the work item confirm
/// ownership, otherwise the first reason found.
pub fn evaluate(
    adapter_id: i64,
    adapter: Option<&AdapterRecord>,
    work_item: Option<&WorkItem>,
) -> Option<ZombieReason> {
    let Some(adapter) = adapter else {
        return Some(ZombieReason::AdapterMissing);
    };
    if adapter.state != AdapterState::Active {
        return Some(ZombieReason::AdapterNotActive);
    }
    let Some(item) = work_item else {
        return Some(ZombieReason::WorkItemMissing);
    };
    if item.working_adapter_id != Some(adapter_id) {
        return Some(ZombieReason::WorkItemOwnedByOther {
            owner: item.working_adapter_id,
        });
    }
    if item.state != WorkItemState::Working {
        return Some(ZombieReason::WorkItemNotWorking);
    }
    None
}

// ============================================================================
// Service Manager
// ============================================================================

/// Errors restarting the host service
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("restart of {unit} exited with status {code:?}")]
    ExitStatus { unit: String, code: Option<i32> },

    #[error("failed to run restart of {unit}: {source}")]
    Spawn {
        unit: String,
        #[source]
        source: std::io::Error,
    },
}

/// Host service manager able to restart this process's unit
#[async_trait]
pub trait ServiceManager: Send + Sync {
    async fn restart(&self, unit: &str) -> std::result::Result<(), ServiceError>;
}

/// Restarts units through `systemctl restart <unit>`
#[derive(Debug, Clone)]
pub struct SystemctlServiceManager {
    program: String,
}

impl Default for SystemctlServiceManager {
    fn default() -> Self {
        Self {
            program: String::from("systemctl"),
        }
    }
}

impl SystemctlServiceManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different executable in place of `systemctl`
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }
}

#[async_trait]
impl ServiceManager for SystemctlServiceManager {
    async fn restart(&self, unit: &str) -> std::result::Result<(), ServiceError> {
        tracing::info!(program = %self.program, unit = %unit, "Restarting service");
        let status = Command::new(&self.program)
            .args(["restart", unit])
            .status()
            .await
            .map_err(|source| ServiceError::Spawn {
                unit: unit.to_string(),
                source,
            })?;

        if status.success() {
            Ok(())
        } else {
            Err(ServiceError::ExitStatus {
                unit: unit.to_string(),
                code: status.code(),
            })
        }
    }
}

// ============================================================================
// Guard
// ============================================================================

/// Outcome of a zombie check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardVerdict {
    /// Store confirms this instance; the heartbeat may be written
    Healthy,
    /// This instance was a zombie and its service restart was accepted
    RestartRequested,
}

pub struct SelfZombieGuard {
    store: Arc<dyn DataStore>,
    alerts: AlertEmitter,
    services: Arc<dyn ServiceManager>,
    service_unit: String,
    adapter_id: i64,
}

impl SelfZombieGuard {
    pub fn new(
        store: Arc<dyn DataStore>,
        alerts: AlertEmitter,
        services: Arc<dyn ServiceManager>,
        service_unit: &str,
        adapter_id: i64,
    ) -> Self {
        Self {
            store,
            alerts,
            services,
            service_unit: service_unit.to_string(),
            adapter_id,
        }
    }

    /// Verify this instance still owns its adapter record and work item
    ///
    /// On a confirmed zombie the service is restarted. A failed restart is
    /// returned as [`Error::SelfZombie`], which the caller must treat as fatal.
    pub async fn ensure_not_zombie(&self, work_item_id: i64) -> Result<GuardVerdict> {
        let adapter = self.store.adapter(self.adapter_id).await?;
        let work_item = self.store.work_item(work_item_id).await?;

        let Some(reason) = evaluate(self.adapter_id, adapter.as_ref(), work_item.as_ref()) else {
            return Ok(GuardVerdict::Healthy);
        };

        tracing::error!(
            adapter_id = self.adapter_id,
            work_item_id = work_item_id,
            reason = %reason,
            unit = %self.service_unit,
            "This instance is a zombie, restarting service"
        );
        self.alerts
            .emit_best_effort(
                AlertKind::SelfZombieDetected,
                format!(
                    "AdapterId={}, WorkItemId={}, Reason={}",
                    self.adapter_id, work_item_id, reason
                ),
                None,
            )
            .await;

        match self.services.restart(&self.service_unit).await {
            Ok(()) => Ok(GuardVerdict::RestartRequested),
            Err(e) => {
                let kind = match e {
                    ServiceError::ExitStatus { .. } => AlertKind::ZombieRestartFailed,
                    ServiceError::Spawn { .. } => AlertKind::ZombieRestartError,
                };
                tracing::error!(error = %e, "Service restart failed");
                self.alerts
                    .emit_best_effort(kind, format!("Unit={}, Error={}", self.service_unit, e), None)
                    .await;
                Err(Error::SelfZombie { reason, source: e })
            }
        }
    }
}
