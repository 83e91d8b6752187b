//! Manager role state machine
//!
//! Every manager process starts in the generic dispatch loop, claiming
//! work items addressed to the manager adapter type. Claiming a
//! `LeadManager` or `PeerManager` item switches the process into the
//! matching manager loop for the rest of its life:
//!
//! ```text
//!                 ┌────────────────────┐
//!                 │        Init        │
//!                 └─────────┬──────────┘
//!                           ▼
//!                 ┌────────────────────┐  StartAdditionalChildAdapterInstance,
//!                 │ GenericDispatchLoop│◄─ unexpected items: handled in place
//!                 └────┬──────────┬────┘
//!          LeadManager │          │ PeerManager
//!                      ▼          ▼
//!          ┌───────────────┐  ┌───────────────┐
//!          │LeadManagerLoop│  │PeerManagerLoop│
//!          └───────┬───────┘  └───────┬───────┘
//!                  └───────┬──────────┘
//!                          ▼
//!                 ┌────────────────────┐
//!                 │      Terminal      │  shutdown, restart, or fatal error
//!                 └────────────────────┘
//! ```
//!
//! All periodic checks run sequentially inside one loop pass, so none of
//! the gated state needs locking.

pub mod startup;
pub mod work;

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::alerts::{AlertEmitter, AlertKind};
use crate::balancer::{LoadBalancer, StartRequest};
use crate::config::ManagerConfig;
use crate::coordinator::WorkItemCoordinator;
use crate::error::{Error, ErrorCategory, Result};
use crate::guard::{GuardVerdict, SelfZombieGuard, ServiceManager};
use crate::health::{HealthMonitor, ProofOfLife};
use crate::metrics;
use crate::models::{ManagerIdentity, NodeState, WorkItem};
use crate::nodes::{determine_initial_node_states, NodeProbe};
use crate::store::DataStore;
use crate::supervisor::AdapterInstanceSupervisor;
use crate::utils::clock::{Clock, IntervalGate};

pub use work::WorkKind;

/// Loop a manager process can be running
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Lead,
    Peer,
    Dispatch,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lead => "lead",
            Self::Peer => "peer",
            Self::Dispatch => "dispatch",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RoleState {
    Init,
    LeadManagerLoop,
    PeerManagerLoop,
    GenericDispatchLoop,
    Terminal,
}

/// Snapshot published after every state change and loop pass
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoleStatus {
    pub state: RoleState,
    pub location: String,
    pub adapter_id: i64,
    /// Activation work item of the current manager loop
    pub work_item_id: Option<i64>,
    pub instances: usize,
    pub inactive_managers: usize,
    pub passes: u64,
}

/// Why the role loop ended without an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    Shutdown,
    /// This instance was a zombie and its service restart was requested
    RestartRequested,
}

enum PassOutcome {
    Worked,
    Idle,
    Exit(LoopExit),
}

/// Collaborators a [`RoleController`] is built from
pub struct RoleContext {
    pub config: Arc<ManagerConfig>,
    pub identity: ManagerIdentity,
    pub store: Arc<dyn DataStore>,
    pub alerts: AlertEmitter,
    pub clock: Arc<dyn Clock>,
    pub supervisor: Arc<AdapterInstanceSupervisor>,
    pub services: Arc<dyn ServiceManager>,
    pub probe: Arc<dyn NodeProbe>,
}

// ============================================================================
// Role Controller
// ============================================================================

pub struct RoleController {
    config: Arc<ManagerConfig>,
    identity: ManagerIdentity,
    store: Arc<dyn DataStore>,
    alerts: AlertEmitter,
    clock: Arc<dyn Clock>,
    supervisor: Arc<AdapterInstanceSupervisor>,
    probe: Arc<dyn NodeProbe>,
    coordinator: WorkItemCoordinator,
    balancer: LoadBalancer,
    health: HealthMonitor,
    guard: SelfZombieGuard,
    heartbeat_gate: IntervalGate,
    nodes_probed: bool,
    status: watch::Sender<RoleStatus>,
    shutdown: watch::Receiver<bool>,
}

impl RoleController {
    pub fn new(ctx: RoleContext, shutdown: watch::Receiver<bool>) -> Self {
        let RoleContext {
            config,
            identity,
            store,
            alerts,
            clock,
            supervisor,
            services,
            probe,
        } = ctx;

        let coordinator = WorkItemCoordinator::new(
            store.clone(),
            alerts.clone(),
            clock.clone(),
            &identity.adapter_type,
            config.zombie_check_interval(),
        );
        let balancer = LoadBalancer::new(
            store.clone(),
            alerts.clone(),
            clock.clone(),
            supervisor.clone(),
            &identity.location,
            &identity.hostname,
            config.backlog_check_interval(),
            config.backlog_grace(),
        );
        let health = HealthMonitor::new(store.clone(), alerts.clone(), clock.clone(), &config.intervals);
        let guard = SelfZombieGuard::new(
            store.clone(),
            alerts.clone(),
            services,
            &config.node.service_unit,
            identity.adapter_id,
        );
        let (status, _) = watch::channel(RoleStatus {
            state: RoleState::Init,
            location: identity.location.clone(),
            adapter_id: identity.adapter_id,
            work_item_id: None,
            instances: 0,
            inactive_managers: 0,
            passes: 0,
        });

        Self {
            heartbeat_gate: IntervalGate::due_now(config.heartbeat_interval()),
            config,
            identity,
            store,
            alerts,
            clock,
            supervisor,
            probe,
            coordinator,
            balancer,
            health,
            guard,
            nodes_probed: false,
            status,
            shutdown,
        }
    }

    pub fn identity(&self) -> &ManagerIdentity {
        &self.identity
    }

    /// Receive status snapshots as they change
    pub fn subscribe(&self) -> watch::Receiver<RoleStatus> {
        self.status.subscribe()
    }

    pub fn status(&self) -> RoleStatus {
        self.status.borrow().clone()
    }

    fn set_state(&self, state: RoleState, work_item_id: Option<i64>) {
        tracing::info!(state = ?state, work_item_id = ?work_item_id, "Role state changed");
        self.status.send_modify(|status| {
            status.state = state;
            status.work_item_id = work_item_id;
        });
    }

    fn record_pass(&self, role: Role) {
        metrics::record_loop_pass(role.as_str());
        let instances = self.supervisor.instance_count();
        let inactive_managers = self.health.inactive_managers();
        self.status.send_modify(|status| {
            status.instances = instances;
            status.inactive_managers = inactive_managers;
            status.passes += 1;
        });
    }

    fn shutdown_requested(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Sleep for `duration`; returns true if shutdown was requested meanwhile
    async fn idle(&self, duration: Duration) -> bool {
        let mut shutdown = self.shutdown.clone();
        if *shutdown.borrow_and_update() {
            return true;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => false,
            changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
        }
    }

    // ========================================================================
    // Startup and teardown
    // ========================================================================

    /// Clean up after a previous run before entering the dispatch loop
    ///
    /// Removes records of adapters on this node whose process is gone and
    /// requeues work items they left behind.
    pub async fn prepare(&mut self) -> Result<()> {
        let removed = self
            .supervisor
            .cleanup_dead_pid_instances(&self.identity.location)
            .await?;
        let adapter_type = self.identity.adapter_type.clone();
        let requeued = self.coordinator.requeue_zombies(&adapter_type).await?;
        tracing::info!(
            removed_adapters = removed,
            requeued = ?requeued.ran(),
            "Startup cleanup complete"
        );
        Ok(())
    }

    /// Remove this process's own adapter record
    pub async fn teardown_self(&self) -> Result<()> {
        self.store
            .teardown_adapter(&self.identity.adapter_type, self.identity.adapter_id)
            .await?;
        tracing::info!(adapter_id = self.identity.adapter_id, "Removed own adapter record");
        Ok(())
    }

    // ========================================================================
    // Dispatch loop
    // ========================================================================

    /// Run until shutdown, a zombie restart, or an unrecoverable error
    pub async fn run(&mut self) -> Result<LoopExit> {
        self.set_state(RoleState::GenericDispatchLoop, None);

        let exit = loop {
            if self.shutdown_requested() {
                break LoopExit::Shutdown;
            }
            match self.dispatch_pass().await {
                Ok(PassOutcome::Exit(exit)) => break exit,
                Ok(PassOutcome::Worked) => {}
                Ok(PassOutcome::Idle) => {
                    if self.idle(self.config.dispatch_idle()).await {
                        break LoopExit::Shutdown;
                    }
                }
                // manager loops have already reported their own fatal errors
                Err(e) if e.category() == ErrorCategory::UnrecoverableSelfFault => {
                    let work_item_id = self.status.borrow().work_item_id;
                    self.set_state(RoleState::Terminal, work_item_id);
                    return Err(e);
                }
                Err(e) => self.handle_pass_error(e).await?,
            }
            self.record_pass(Role::Dispatch);
        };

        let work_item_id = self.status.borrow().work_item_id;
        self.set_state(RoleState::Terminal, work_item_id);
        Ok(exit)
    }

    async fn dispatch_pass(&mut self) -> Result<PassOutcome> {
        let adapter_type = self.identity.adapter_type.clone();
        self.coordinator.requeue_zombies(&adapter_type).await?;

        let Some(item) = self
            .coordinator
            .claim_next(self.identity.adapter_id, &self.identity.location)
            .await?
        else {
            return Ok(PassOutcome::Idle);
        };
        self.alerts.set_work_item_id(item.id);

        let kind = WorkKind::from_tag(&item.work_to_be_done);
        tracing::info!(work_item_id = item.id, kind = %kind, "Dispatching work item");
        let result = match &kind {
            WorkKind::LeadManager => self.run_manager_loop(Role::Lead, &item).await.map(PassOutcome::Exit),
            WorkKind::PeerManager => self.run_manager_loop(Role::Peer, &item).await.map(PassOutcome::Exit),
            WorkKind::StartAdditionalChildAdapterInstance => {
                self.handle_start_child(&item).await.map(|_| PassOutcome::Worked)
            }
            WorkKind::Unexpected(tag) => self
                .handle_unexpected(&item, tag)
                .await
                .map(|_| PassOutcome::Worked),
        };

        match result {
            Ok(outcome) => Ok(outcome),
            Err(e)
                if e.is_connectivity_loss()
                    || e.category() == ErrorCategory::UnrecoverableSelfFault =>
            {
                Err(e)
            }
            Err(e) => {
                self.fail_work_item(&item, &kind, &e).await;
                Ok(PassOutcome::Worked)
            }
        }
    }

    async fn fail_work_item(&self, item: &WorkItem, kind: &WorkKind, error: &Error) {
        tracing::error!(work_item_id = item.id, kind = %kind, error = %error, "Work item handler failed");
        self.alerts
            .emit_best_effort(
                AlertKind::AdapterExceptionButContinue,
                format!("WorkItemId={}, WorkToBeDone={}, Error={}", item.id, kind, error),
                Some(&self.identity.location),
            )
            .await;
        if let Err(e) = self
            .coordinator
            .finish_with_error(kind.tag(), &item.adapter_type, item.id, &error.to_string(), true)
            .await
        {
            tracing::warn!(work_item_id = item.id, error = %e, "Failed to finish work item with error");
        }
    }

    async fn handle_start_child(&self, item: &WorkItem) -> Result<()> {
        let request = StartRequest::parse(&item.parameters).ok_or_else(|| {
            Error::other(format!("invalid start request parameters {:?}", item.parameters))
        })?;
        self.supervisor
            .start_instance(
                &self.identity.location,
                &self.identity.hostname,
                &request.adapter_type,
                &request.invocation,
                &request.log_file,
                item.id,
            )
            .await?;
        self.coordinator
            .finish(item, &format!("{} successful", WorkKind::StartAdditionalChildAdapterInstance))
            .await
    }

    async fn handle_unexpected(&self, item: &WorkItem, tag: &str) -> Result<()> {
        tracing::warn!(work_item_id = item.id, tag = %tag, "Unexpected work item");
        self.alerts
            .emit_best_effort(
                AlertKind::UnexpectedWorkItem,
                format!("WorkItemId={}, WorkToBeDone={}", item.id, tag),
                Some(&self.identity.location),
            )
            .await;
        self.coordinator
            .finish_with_error(
                tag,
                &item.adapter_type,
                item.id,
                &format!("unexpected work item {tag:?}"),
                true,
            )
            .await
    }

    // ========================================================================
    // Manager loops
    // ========================================================================

    async fn run_manager_loop(&mut self, role: Role, item: &WorkItem) -> Result<LoopExit> {
        let state = match role {
            Role::Lead => RoleState::LeadManagerLoop,
            _ => RoleState::PeerManagerLoop,
        };
        self.set_state(state, Some(item.id));

        loop {
            match self.manager_startup(role, item).await {
                Ok(true) => return Ok(LoopExit::Shutdown),
                Ok(false) => break,
                Err(e) if e.is_connectivity_loss() => {
                    tracing::warn!(error = %e, "Lost data store during manager startup");
                    if self.idle(self.config.connectivity_pause()).await {
                        return Ok(LoopExit::Shutdown);
                    }
                }
                Err(e) => return Err(e),
            }
        }

        loop {
            if self.shutdown_requested() {
                return Ok(LoopExit::Shutdown);
            }
            let pass = match role {
                Role::Lead => self.lead_pass(item.id).await,
                _ => self.peer_pass(item.id).await,
            };
            match pass {
                Ok(Some(exit)) => return Ok(exit),
                Ok(None) => {}
                Err(e) => self.handle_pass_error(e).await?,
            }
            self.record_pass(role);
            if self.idle(self.config.loop_idle()).await {
                return Ok(LoopExit::Shutdown);
            }
        }
    }

    /// One-time manager setup; returns true when shutdown arrived while settling
    async fn manager_startup(&mut self, role: Role, item: &WorkItem) -> Result<bool> {
        let location = self.identity.location.clone();
        self.store.set_node_state(&location, NodeState::Active).await?;

        let removed = self.supervisor.cleanup_stale_instances(&location).await?;
        tracing::info!(role = role.as_str(), removed = removed, "Removed stale adapter records");

        if role == Role::Lead && !self.nodes_probed {
            determine_initial_node_states(
                &self.store,
                &self.alerts,
                self.probe.as_ref(),
                &self.config.probe,
                &location,
            )
            .await?;
            self.nodes_probed = true;
        }

        self.supervisor
            .start_configured_instances_for_node(&location, &self.identity.hostname, item.id)
            .await?;

        Ok(self.idle(self.config.startup_settle()).await)
    }

    async fn lead_pass(&mut self, work_item_id: i64) -> Result<Option<LoopExit>> {
        self.balancer.check_backlog().await?;
        let adapter_type = self.identity.adapter_type.clone();
        self.coordinator.requeue_zombies(&adapter_type).await?;
        self.health.check_peer_proof_of_life(work_item_id).await?;
        self.health.check_progress_lag().await?;
        if self.health.console_check_enabled() {
            self.health.check_console_flow().await?;
        }
        if self.health.stuck_shutdown_check_enabled() {
            self.health.check_stuck_shutdown().await?;
        }
        self.heartbeat(work_item_id).await
    }

    async fn peer_pass(&mut self, work_item_id: i64) -> Result<Option<LoopExit>> {
        self.heartbeat(work_item_id).await
    }

    /// Write proof of life into the activation item, after checking this is not a zombie
    async fn heartbeat(&mut self, work_item_id: i64) -> Result<Option<LoopExit>> {
        if !self.heartbeat_gate.try_pass(self.clock.now_millis()) {
            return Ok(None);
        }
        if self.guard.ensure_not_zombie(work_item_id).await? == GuardVerdict::RestartRequested {
            return Ok(Some(LoopExit::RestartRequested));
        }

        let pol = ProofOfLife::at(self.clock.now_millis());
        self.coordinator.save_proof_of_life(work_item_id, &pol).await?;
        tracing::debug!(work_item_id = work_item_id, millis = pol.millis, "Saved proof of life");
        Ok(None)
    }

    /// React to a failed loop pass; only unrecoverable errors are returned
    async fn handle_pass_error(&self, error: Error) -> Result<()> {
        let category = error.category();
        metrics::record_loop_error(category.as_str());

        match category {
            ErrorCategory::RecoverableTransient => {
                tracing::warn!(
                    error = %error,
                    pause_secs = self.config.connectivity_pause().as_secs(),
                    "Lost data store connectivity, pausing"
                );
                self.idle(self.config.connectivity_pause()).await;
                Ok(())
            }
            ErrorCategory::UnrecoverableSelfFault => {
                tracing::error!(error = %error, "Unrecoverable error, leaving role loop");
                Err(error)
            }
            ErrorCategory::FatalImmediate | ErrorCategory::RecoverableLogged => {
                tracing::error!(error = %error, category = %category, "Loop pass failed, continuing");
                self.alerts
                    .emit_best_effort(
                        AlertKind::AdapterExceptionButContinue,
                        format!("Error={error}"),
                        Some(&self.identity.location),
                    )
                    .await;
                Ok(())
            }
        }
    }
}
