//! Backlog-driven load balancing
//!
//! Every backlog interval the lead manager looks for work items that have
//! sat in their queue longer than the grace period and tries to start one
//! more instance of the adapter type that services them. Instances are
//! started on the service node that owns the queue: locally when that is
//! this node, otherwise by queueing a start request to that node's manager.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::alerts::{AlertEmitter, AlertKind};
use crate::error::Result;
use crate::metrics;
use crate::models::{AdapterState, WorkItem, MANAGER_ADAPTER_TYPE};
use crate::store::{DataStore, NewWorkItem};
use crate::supervisor::AdapterInstanceSupervisor;
use crate::utils::clock::{CheckOutcome, Clock, IntervalGate};

/// Work tag of a start request delegated to another node's manager
pub const START_CHILD_INSTANCE_TAG: &str = "StartAdditionalChildAdapterInstance";

/// Where an additional instance was started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartedWhere {
    Local,
    Delegated,
}

/// Result of one attempt to add an instance for a backlogged queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started(StartedWhere),
    NoManagerOnNode,
    AlreadyHasFreeInstance,
    NoInvocationInfo,
}

/// Summary of one backlog pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BacklogReport {
    /// Items past the grace period
    pub backlogged: usize,
    /// Distinct (adapter type, queue) pairs a start was attempted for
    pub attempted: usize,
    pub started: usize,
}

/// Parameters of a delegated start, encoded as `type|invocation|logFile`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartRequest {
    pub adapter_type: String,
    pub invocation: String,
    pub log_file: String,
}

impl StartRequest {
    pub fn to_parameters(&self) -> String {
        format!("{}|{}|{}", self.adapter_type, self.invocation, self.log_file)
    }

    /// Decode work-item parameters; the invocation may itself contain `|`
    pub fn parse(parameters: &str) -> Option<Self> {
        let (adapter_type, rest) = parameters.split_once('|')?;
        let (invocation, log_file) = rest.rsplit_once('|')?;
        if adapter_type.is_empty() || invocation.trim().is_empty() {
            return None;
        }
        Some(Self {
            adapter_type: adapter_type.to_string(),
            invocation: invocation.to_string(),
            log_file: log_file.to_string(),
        })
    }
}

// ============================================================================
// Load Balancer
// ============================================================================

pub struct LoadBalancer {
    store: Arc<dyn DataStore>,
    alerts: AlertEmitter,
    clock: Arc<dyn Clock>,
    supervisor: Arc<AdapterInstanceSupervisor>,
    location: String,
    hostname: String,
    gate: IntervalGate,
    grace_ms: i64,
}

impl LoadBalancer {
    /// Create a balancer; the first backlog check runs one interval after construction
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn DataStore>,
        alerts: AlertEmitter,
        clock: Arc<dyn Clock>,
        supervisor: Arc<AdapterInstanceSupervisor>,
        location: &str,
        hostname: &str,
        interval: Duration,
        grace: Duration,
    ) -> Self {
        let gate = IntervalGate::starting_at(interval, clock.now_millis());
        Self {
            store,
            alerts,
            clock,
            supervisor,
            location: location.to_string(),
            hostname: hostname.to_string(),
            gate,
            grace_ms: grace.as_millis() as i64,
        }
    }

    /// Try to add capacity for every backlogged (adapter type, queue) pair
    ///
    /// At most one start is attempted per pair and pass. Connectivity loss
    /// aborts the pass; any other failure is reported and the next pair is
    /// processed.
    pub async fn check_backlog(&mut self) -> Result<CheckOutcome<BacklogReport>> {
        let now = self.clock.now_millis();
        if !self.gate.try_pass(now) {
            return Ok(CheckOutcome::NotDue);
        }

        let backlog = self.store.backlogged_work_items(now - self.grace_ms).await?;
        metrics::set_backlog_items(backlog.len());
        let mut report = BacklogReport {
            backlogged: backlog.len(),
            ..Default::default()
        };

        let mut seen = HashSet::new();
        for item in &backlog {
            if !seen.insert((item.adapter_type.as_str(), item.queue.as_str())) {
                continue;
            }
            report.attempted += 1;

            match self
                .start_additional_instance(&item.adapter_type, &item.queue)
                .await
            {
                Ok(StartOutcome::Started(_)) => report.started += 1,
                Ok(StartOutcome::NoInvocationInfo) => self.reject_unserviceable(item).await?,
                Ok(_) => {}
                Err(e) if e.is_connectivity_loss() => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        adapter_type = %item.adapter_type,
                        queue = %item.queue,
                        error = %e,
                        "Failed to add instance for backlog"
                    );
                    self.alerts
                        .emit_best_effort(
                            AlertKind::AdapterExceptionButContinue,
                            format!(
                                "AdapterType={}, Queue={}, Error={}",
                                item.adapter_type, item.queue, e
                            ),
                            None,
                        )
                        .await;
                }
            }
        }

        if report.backlogged > 0 {
            tracing::info!(
                backlogged = report.backlogged,
                attempted = report.attempted,
                started = report.started,
                "Backlog pass complete"
            );
        }
        Ok(CheckOutcome::Ran(report))
    }

    async fn reject_unserviceable(&self, item: &WorkItem) -> Result<()> {
        let reason = format!(
            "no invocation info for adapter type {} and queue {:?}",
            item.adapter_type, item.queue
        );
        self.store
            .finish_work_item_with_error(&item.adapter_type, item.id, &reason, true)
            .await?;
        self.alerts
            .emit_best_effort(
                AlertKind::BacklogItemUnserviceable,
                format!(
                    "WorkItemId={}, AdapterType={}, Queue={}, WorkToBeDone={}",
                    item.id, item.adapter_type, item.queue, item.work_to_be_done
                ),
                None,
            )
            .await;
        Ok(())
    }

    /// Start one more instance of `adapter_type` for `queue`, if one is needed
    pub async fn start_additional_instance(
        &self,
        adapter_type: &str,
        queue: &str,
    ) -> Result<StartOutcome> {
        let Some(info) = self.store.invocation_info(adapter_type, queue).await? else {
            self.alerts
                .emit_best_effort(
                    AlertKind::StartInstanceFailed,
                    format!("No invocation info for AdapterType={adapter_type}, Queue={queue}"),
                    None,
                )
                .await;
            return Ok(StartOutcome::NoInvocationInfo);
        };
        let owner = info.service_node.as_str();

        let adapters = self.store.adapters_on_node(owner).await?;
        if !adapters.iter().any(|a| a.adapter_type == MANAGER_ADAPTER_TYPE) {
            self.alerts
                .emit_best_effort(
                    AlertKind::NoManagerForAdditionalInstance,
                    format!("AdapterType={adapter_type}, Queue={queue}"),
                    Some(owner),
                )
                .await;
            return Ok(StartOutcome::NoManagerOnNode);
        }

        let active = adapters
            .iter()
            .filter(|a| a.adapter_type == adapter_type && a.state == AdapterState::Active)
            .count() as u64;
        let working = self.store.count_working_items(adapter_type, queue).await?;
        if active > working {
            self.alerts
                .emit_best_effort(
                    AlertKind::FreeInstanceAlreadyAvailable,
                    format!(
                        "AdapterType={adapter_type}, Queue={queue}, Instances={active}, Working={working}"
                    ),
                    Some(owner),
                )
                .await;
            return Ok(StartOutcome::AlreadyHasFreeInstance);
        }

        let requester = self.alerts.work_item_id();
        let placed = if owner == self.location {
            self.supervisor
                .start_instance(
                    &self.location,
                    &self.hostname,
                    adapter_type,
                    &info.invocation,
                    &info.log_file,
                    requester,
                )
                .await?;
            StartedWhere::Local
        } else {
            let request = StartRequest {
                adapter_type: adapter_type.to_string(),
                invocation: info.invocation.clone(),
                log_file: info.log_file.clone(),
            };
            self.store
                .queue_work_item(NewWorkItem {
                    adapter_type: MANAGER_ADAPTER_TYPE.to_string(),
                    queue: owner.to_string(),
                    work_to_be_done: START_CHILD_INSTANCE_TAG.to_string(),
                    parameters: request.to_parameters(),
                    requesting_work_item_id: Some(requester),
                })
                .await?;
            StartedWhere::Delegated
        };

        tracing::info!(
            adapter_type = %adapter_type,
            queue = %queue,
            owner = %owner,
            placement = ?placed,
            "Started additional instance"
        );
        self.alerts
            .emit_best_effort(
                AlertKind::StartedAdditionalInstance,
                format!("AdapterType={adapter_type}, Queue={queue}, Placement={placed:?}"),
                Some(owner),
            )
            .await;
        Ok(StartOutcome::Started(placed))
    }
}
