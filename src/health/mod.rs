//! Fleet health checks run by the lead manager
//!
//! Four independent checks, each behind its own [`IntervalGate`]:
//!
//! ```text
//! ┌──────────────────────┬──────────┬──────────────────────────────────┐
//! │ Check                │ Interval │ Reports                          │
//! ├──────────────────────┼──────────┼──────────────────────────────────┤
//! │ peer proof of life   │ 45s      │ managers whose heartbeat is old  │
//! │ progress lag         │ 60s..1h  │ receiver stage behind the mover  │
//! │ console flow         │ 1h       │ nodes with no recent console msg │
//! │ stuck shutdown       │ 1min     │ nodes halting for over 5min      │
//! └──────────────────────┴──────────┴──────────────────────────────────┘
//! ```
//!
//! The last two are off unless enabled in [`IntervalConfig`]. A check whose
//! interval has not elapsed returns [`CheckOutcome::NotDue`] without
//! querying the store.

pub mod progress;
pub mod proof_of_life;
pub mod tracker;

use chrono::DateTime;
use std::sync::Arc;
use std::time::Duration;

use crate::alerts::{AlertEmitter, AlertKind};
use crate::config::IntervalConfig;
use crate::error::Result;
use crate::metrics;
use crate::models::{NodeClass, NodeState, PipelineStage, WorkItem};
use crate::store::DataStore;
use crate::utils::clock::{CheckOutcome, Clock, IntervalGate};

pub use progress::AdaptiveInterval;
pub use proof_of_life::{ProofOfLife, ProofOfLifeError};
pub use tracker::InactiveManagerTracker;

/// Result of one progress-lag evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressVerdict {
    /// Receiver is within the lag threshold of the mover
    Keeping,
    /// Receiver trails the mover by more than the threshold
    Lagging { lag_ms: i64 },
    /// One of the stages is missing or has no readable proof of life
    StageUnavailable,
}

// ============================================================================
// Health Monitor
// ============================================================================

pub struct HealthMonitor {
    store: Arc<dyn DataStore>,
    alerts: AlertEmitter,
    clock: Arc<dyn Clock>,

    peer_gate: IntervalGate,
    tracker: InactiveManagerTracker,

    progress_gate: IntervalGate,
    progress_interval: AdaptiveInterval,
    lag_threshold_ms: i64,

    console_gate: Option<IntervalGate>,
    stuck_gate: Option<IntervalGate>,
    stuck_threshold_ms: i64,
}

impl HealthMonitor {
    /// Create a monitor; every gate starts at construction time
    pub fn new(
        store: Arc<dyn DataStore>,
        alerts: AlertEmitter,
        clock: Arc<dyn Clock>,
        intervals: &IntervalConfig,
    ) -> Self {
        let now = clock.now_millis();
        let progress_interval = AdaptiveInterval::new(
            Duration::from_secs(intervals.progress_default_secs),
            Duration::from_secs(intervals.progress_max_secs),
        );

        Self {
            peer_gate: IntervalGate::starting_at(
                Duration::from_secs(intervals.peer_check_secs),
                now,
            ),
            tracker: InactiveManagerTracker::new(),
            progress_gate: IntervalGate::starting_at(progress_interval.current(), now),
            progress_interval,
            lag_threshold_ms: secs_to_millis(intervals.progress_lag_threshold_secs),
            console_gate: intervals.console_check_enabled.then(|| {
                IntervalGate::starting_at(Duration::from_secs(intervals.console_check_secs), now)
            }),
            stuck_gate: intervals.stuck_shutdown_enabled.then(|| {
                IntervalGate::starting_at(
                    Duration::from_secs(intervals.stuck_shutdown_check_secs),
                    now,
                )
            }),
            stuck_threshold_ms: secs_to_millis(intervals.stuck_shutdown_threshold_secs),
            store,
            alerts,
            clock,
        }
    }

    /// Number of peer managers currently considered inactive
    pub fn inactive_managers(&self) -> usize {
        self.tracker.len()
    }

    /// Current progress-lag check interval
    pub fn progress_interval(&self) -> Duration {
        self.progress_interval.current()
    }

    pub fn console_check_enabled(&self) -> bool {
        self.console_gate.is_some()
    }

    pub fn stuck_shutdown_check_enabled(&self) -> bool {
        self.stuck_gate.is_some()
    }

    // ========================================================================
    // Peer proof of life
    // ========================================================================

    /// Look for manager work items whose heartbeat is older than the check interval
    ///
    /// Returns the number of managers found inactive in this pass. The
    /// caller's own activation item is skipped.
    pub async fn check_peer_proof_of_life(
        &mut self,
        own_work_item_id: i64,
    ) -> Result<CheckOutcome<usize>> {
        let now = self.clock.now_millis();
        if !self.peer_gate.try_pass(now) {
            return Ok(CheckOutcome::NotDue);
        }
        let interval_ms = self.peer_gate.interval().as_millis() as i64;

        let items = self.store.manager_work_items().await?;
        let listed: Vec<i64> = items.iter().map(|item| item.id).collect();
        self.tracker.retain_listed(&listed);

        let mut inactive = 0;
        for item in items.iter().filter(|item| item.id != own_work_item_id) {
            let Some(payload) = item.working_results.as_deref().filter(|p| !p.is_empty()) else {
                tracing::warn!(
                    work_item_id = item.id,
                    queue = %item.queue,
                    "Manager work item has no proof of life yet"
                );
                self.alerts
                    .emit_best_effort(
                        AlertKind::ManagerProofOfLifeMissing,
                        format!("WorkItemId={}, WorkToBeDone={}", item.id, item.work_to_be_done),
                        Some(&item.queue),
                    )
                    .await;
                continue;
            };

            let pol = match ProofOfLife::parse(payload) {
                Ok(pol) => pol,
                Err(e) => {
                    tracing::warn!(work_item_id = item.id, error = %e, "Unreadable proof of life");
                    continue;
                }
            };

            let location = self.manager_location(item).await?;
            let age = pol.age_millis(now);
            if age > interval_ms {
                inactive += 1;
                self.handle_inactive_manager(item, &location, &pol, age).await?;
            } else if self.tracker.untrack(&item.adapter_type, item.id) {
                tracing::info!(
                    work_item_id = item.id,
                    location = %location,
                    "Manager is sending proof of life again"
                );
            }
        }

        metrics::set_inactive_managers(self.tracker.len());
        Ok(CheckOutcome::Ran(inactive))
    }

    async fn manager_location(&self, item: &WorkItem) -> Result<String> {
        if !item.queue.is_empty() {
            return Ok(item.queue.clone());
        }
        let Some(adapter_id) = item.working_adapter_id else {
            return Ok(String::new());
        };
        Ok(self
            .store
            .adapter(adapter_id)
            .await?
            .map(|adapter| adapter.location)
            .unwrap_or_default())
    }

    async fn handle_inactive_manager(
        &mut self,
        item: &WorkItem,
        location: &str,
        pol: &ProofOfLife,
        age_ms: i64,
    ) -> Result<()> {
        let last_seen = format_millis(pol.millis);
        if !self.tracker.track(&item.adapter_type, item.id, &last_seen) {
            tracing::debug!(
                work_item_id = item.id,
                location = %location,
                "Manager still inactive"
            );
            return Ok(());
        }

        let node_was_active = matches!(
            self.store.node(location).await?,
            Some(node) if node.state == NodeState::Active
        );
        let kind = if node_was_active {
            self.store.set_node_state(location, NodeState::Error).await?;
            AlertKind::InactiveManagerNodeInError
        } else {
            AlertKind::InactiveManager
        };

        tracing::warn!(
            work_item_id = item.id,
            location = %location,
            age_ms = age_ms,
            node_marked_error = node_was_active,
            "Manager stopped sending proof of life"
        );
        self.alerts
            .emit_best_effort(
                kind,
                format!(
                    "WorkItemId={}, WorkToBeDone={}, LastProofOfLife={}, AgeMs={}",
                    item.id, item.work_to_be_done, last_seen, age_ms
                ),
                Some(location),
            )
            .await;

        let removed = self.teardown_node_adapters(location).await?;
        tracing::info!(location = %location, removed = removed, "Removed adapters of inactive manager");
        Ok(())
    }

    async fn teardown_node_adapters(&self, location: &str) -> Result<usize> {
        let adapters = self.store.adapters_on_node(location).await?;
        for adapter in &adapters {
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
        }
        Ok(adapters.len())
    }

    // ========================================================================
    // Progress lag
    // ========================================================================

    /// Compare the heartbeats of the data mover and the data receiver stages
    pub async fn check_progress_lag(&mut self) -> Result<CheckOutcome<ProgressVerdict>> {
        if !self.progress_gate.try_pass(self.clock.now_millis()) {
            return Ok(CheckOutcome::NotDue);
        }

        let mover = self.stage_proof_of_life(PipelineStage::DataMover).await?;
        let receiver = self.stage_proof_of_life(PipelineStage::DataReceiver).await?;

        let verdict = match (mover, receiver) {
            (Some(mover), Some(receiver)) => {
                let lag_ms = mover.millis - receiver.millis;
                if lag_ms > self.lag_threshold_ms {
                    ProgressVerdict::Lagging { lag_ms }
                } else {
                    ProgressVerdict::Keeping
                }
            }
            _ => ProgressVerdict::StageUnavailable,
        };

        let next = match verdict {
            ProgressVerdict::Keeping => self.progress_interval.reset(),
            ProgressVerdict::StageUnavailable => {
                tracing::debug!("Pipeline stage heartbeat unavailable, backing off");
                self.progress_interval.back_off()
            }
            ProgressVerdict::Lagging { lag_ms } => {
                let next = self.progress_interval.back_off();
                tracing::warn!(lag_ms = lag_ms, next_check_secs = next.as_secs(), "Data receiver is lagging");
                self.alerts
                    .emit_best_effort(
                        AlertKind::DataReceiverAppearsStuck,
                        format!(
                            "LagMs={}, ThresholdMs={}, NextCheckSecs={}",
                            lag_ms,
                            self.lag_threshold_ms,
                            next.as_secs()
                        ),
                        None,
                    )
                    .await;
                next
            }
        };
        self.progress_gate.set_interval(next);

        Ok(CheckOutcome::Ran(verdict))
    }

    async fn stage_proof_of_life(&self, stage: PipelineStage) -> Result<Option<ProofOfLife>> {
        let Some(item) = self.store.pipeline_stage_item(stage).await? else {
            return Ok(None);
        };
        Ok(item
            .working_results
            .as_deref()
            .and_then(|payload| ProofOfLife::parse(payload).ok()))
    }

    // ========================================================================
    // Console flow
    // ========================================================================

    /// Alert on every node with no proof of life within the interval
    pub async fn check_console_flow(&mut self) -> Result<CheckOutcome<usize>> {
        let now = self.clock.now_millis();
        let Some(gate) = self.console_gate.as_mut() else {
            return Ok(CheckOutcome::NotDue);
        };
        if !gate.try_pass(now) {
            return Ok(CheckOutcome::NotDue);
        }
        let cutoff = now - gate.interval().as_millis() as i64;

        let nodes = self.store.nodes_missing_proof_of_life(cutoff).await?;
        for node in &nodes {
            self.alerts
                .emit_best_effort(
                    AlertKind::MissingConsoleMessages,
                    format!(
                        "State={}, LastProofOfLifeTs={}",
                        node.state,
                        format_millis(node.last_proof_of_life_millis)
                    ),
                    Some(&node.location),
                )
                .await;
        }
        if !nodes.is_empty() {
            tracing::warn!(count = nodes.len(), "Nodes without recent console messages");
        }
        Ok(CheckOutcome::Ran(nodes.len()))
    }

    // ========================================================================
    // Stuck shutdown
    // ========================================================================

    /// Alert on every node that has been halting for longer than the threshold
    pub async fn check_stuck_shutdown(&mut self) -> Result<CheckOutcome<usize>> {
        let now = self.clock.now_millis();
        let Some(gate) = self.stuck_gate.as_mut() else {
            return Ok(CheckOutcome::NotDue);
        };
        if !gate.try_pass(now) {
            return Ok(CheckOutcome::NotDue);
        }

        let nodes = self
            .store
            .nodes_stuck_halting(now - self.stuck_threshold_ms)
            .await?;
        for node in &nodes {
            let kind = match node.class {
                NodeClass::Compute => AlertKind::ComputeNodeDidNotShutdown,
                NodeClass::Service => AlertKind::ServiceNodeDidNotShutdown,
            };
            let since = node
                .halting_since_millis
                .map(format_millis)
                .unwrap_or_default();
            self.alerts
                .emit_best_effort(
                    kind,
                    format!("State={}, HaltingSince={}", node.state, since),
                    Some(&node.location),
                )
                .await;
        }
        Ok(CheckOutcome::Ran(nodes.len()))
    }
}

fn secs_to_millis(secs: u64) -> i64 {
    Duration::from_secs(secs).as_millis() as i64
}

fn format_millis(millis: i64) -> String {
    DateTime::from_timestamp_millis(millis)
        .map(|ts| ts.format("%Y-%m-%d %H:%M:%S%.3f").to_string())
        .unwrap_or_else(|| millis.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::MemoryAlertSink;
    use crate::models::{Node, WorkItemState, MANAGER_ADAPTER_TYPE};
    use crate::store::MemoryStore;
    use crate::utils::clock::ManualClock;

    const START: i64 = 1_718_000_000_000;

    struct Fixture {
        clock: Arc<ManualClock>,
        store: Arc<MemoryStore>,
        sink: Arc<MemoryAlertSink>,
        monitor: HealthMonitor,
    }

    fn fixture_with(intervals: IntervalConfig) -> Fixture {
        let clock = Arc::new(ManualClock::new(START));
        let store = Arc::new(MemoryStore::new(clock.clone()));
        let sink = Arc::new(MemoryAlertSink::new());
        let alerts = AlertEmitter::new(sink.clone(), clock.clone(), MANAGER_ADAPTER_TYPE);
        let monitor = HealthMonitor::new(store.clone(), alerts, clock.clone(), &intervals);
        Fixture {
            clock,
            store,
            sink,
            monitor,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(IntervalConfig::default())
    }

    async fn manager_item(store: &MemoryStore, location: &str, tag: &str, pol: Option<i64>) -> i64 {
        let mut item = WorkItem::queued(0, MANAGER_ADAPTER_TYPE, location, tag);
        item.state = WorkItemState::Working;
        item.working_results = pol.map(|ms| ProofOfLife::at(ms).format());
        store.insert_work_item(item).await
    }

    async fn stage_item(store: &MemoryStore, stage: PipelineStage, pol_ms: i64) {
        let mut item = WorkItem::queued(0, stage.adapter_type(), "", stage.work_to_be_done());
        item.state = WorkItemState::Working;
        item.working_results = Some(ProofOfLife::at(pol_ms).format());
        store.insert_work_item(item).await;
    }

    #[tokio::test]
    async fn test_peer_check_not_due_before_interval() {
        let mut f = fixture();
        f.clock.advance(Duration::from_secs(44));
        assert_eq!(
            f.monitor.check_peer_proof_of_life(-1).await.unwrap(),
            CheckOutcome::NotDue
        );
        assert_eq!(f.store.query_count(), 0);
    }

    #[tokio::test]
    async fn test_peer_check_marks_stale_manager_inactive() {
        let mut f = fixture();
        let own = manager_item(&f.store, "R0-SN1", "LeadManager", Some(START)).await;
        let peer = manager_item(&f.store, "R0-SN2", "PeerManager", Some(START)).await;
        f.store.insert_node(Node::new("R0-SN2", NodeClass::Service, "10.0.0.2")).await;
        f.store.register_adapter("WLM", "R0-SN2", 4242).await.unwrap();

        f.clock.advance(Duration::from_secs(46));
        let outcome = f.monitor.check_peer_proof_of_life(own).await.unwrap();

        assert_eq!(outcome, CheckOutcome::Ran(1));
        assert_eq!(f.sink.count(AlertKind::InactiveManagerNodeInError), 1);
        assert_eq!(f.store.peek_node("R0-SN2").await.unwrap().state, NodeState::Error);
        assert!(f.store.peek_adapters().await.is_empty());
        assert_eq!(f.monitor.inactive_managers(), 1);
        assert!(f.store.peek_work_item(peer).await.is_some());
    }

    #[tokio::test]
    async fn test_peer_check_alerts_once_per_inactive_manager() {
        let mut f = fixture();
        manager_item(&f.store, "R0-SN2", "PeerManager", Some(START)).await;

        f.clock.advance(Duration::from_secs(46));
        f.monitor.check_peer_proof_of_life(-1).await.unwrap();
        f.clock.advance(Duration::from_secs(46));
        let outcome = f.monitor.check_peer_proof_of_life(-1).await.unwrap();

        assert_eq!(outcome, CheckOutcome::Ran(1));
        assert_eq!(f.sink.count(AlertKind::InactiveManager), 1);
    }

    #[tokio::test]
    async fn test_peer_check_untracks_recovered_manager() {
        let mut f = fixture();
        let peer = manager_item(&f.store, "R0-SN2", "PeerManager", Some(START)).await;

        f.clock.advance(Duration::from_secs(46));
        f.monitor.check_peer_proof_of_life(-1).await.unwrap();
        assert_eq!(f.monitor.inactive_managers(), 1);

        f.clock.advance(Duration::from_secs(46));
        f.store
            .set_working_results(peer, &ProofOfLife::at(f.clock.now_millis()).format())
            .await;
        let outcome = f.monitor.check_peer_proof_of_life(-1).await.unwrap();
        assert_eq!(outcome, CheckOutcome::Ran(0));
        assert_eq!(f.monitor.inactive_managers(), 0);
    }

    #[tokio::test]
    async fn test_inactive_manager_stays_tracked_after_its_location_is_gone() {
        let mut f = fixture();
        let adapter_id = f
            .store
            .register_adapter(MANAGER_ADAPTER_TYPE, "R0-SN2", 4242)
            .await
            .unwrap();
        let mut item = WorkItem::queued(0, MANAGER_ADAPTER_TYPE, "", "PeerManager");
        item.state = WorkItemState::Working;
        item.working_adapter_id = Some(adapter_id);
        item.working_results = Some(ProofOfLife::at(START).format());
        f.store.insert_work_item(item).await;

        f.clock.advance(Duration::from_secs(46));
        f.monitor.check_peer_proof_of_life(-1).await.unwrap();
        // the teardown removed the adapter the location was resolved from
        assert!(f.store.peek_adapters().await.is_empty());

        f.clock.advance(Duration::from_secs(46));
        f.monitor.check_peer_proof_of_life(-1).await.unwrap();

        assert_eq!(f.sink.count(AlertKind::InactiveManager), 1);
        assert_eq!(f.monitor.inactive_managers(), 1);
    }

    #[tokio::test]
    async fn test_peer_check_missing_and_malformed_payloads() {
        let mut f = fixture();
        manager_item(&f.store, "R0-SN2", "PeerManager", None).await;
        let garbled = manager_item(&f.store, "R0-SN3", "PeerManager", None).await;
        f.store.set_working_results(garbled, "not a heartbeat").await;

        f.clock.advance(Duration::from_secs(45));
        let outcome = f.monitor.check_peer_proof_of_life(-1).await.unwrap();
        assert_eq!(outcome, CheckOutcome::Ran(0));
        assert_eq!(f.sink.kinds(), vec![AlertKind::ManagerProofOfLifeMissing]);
    }

    #[tokio::test]
    async fn test_progress_lag_backs_off_and_resets() {
        let mut f = fixture();
        stage_item(&f.store, PipelineStage::DataMover, START + 60_000).await;
        stage_item(&f.store, PipelineStage::DataReceiver, START).await;

        f.clock.advance(Duration::from_secs(60));
        let outcome = f.monitor.check_progress_lag().await.unwrap();
        assert_eq!(outcome, CheckOutcome::Ran(ProgressVerdict::Lagging { lag_ms: 60_000 }));
        assert_eq!(f.monitor.progress_interval(), Duration::from_secs(120));
        assert_eq!(f.sink.count(AlertKind::DataReceiverAppearsStuck), 1);

        f.clock.advance(Duration::from_secs(60));
        assert_eq!(f.monitor.check_progress_lag().await.unwrap(), CheckOutcome::NotDue);

        stage_item(&f.store, PipelineStage::DataReceiver, START + 55_000).await;
        f.clock.advance(Duration::from_secs(60));
        let outcome = f.monitor.check_progress_lag().await.unwrap();
        assert_eq!(outcome, CheckOutcome::Ran(ProgressVerdict::Keeping));
        assert_eq!(f.monitor.progress_interval(), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_progress_missing_stage_backs_off_silently() {
        let mut f = fixture();
        stage_item(&f.store, PipelineStage::DataMover, START).await;

        f.clock.advance(Duration::from_secs(60));
        let outcome = f.monitor.check_progress_lag().await.unwrap();
        assert_eq!(outcome, CheckOutcome::Ran(ProgressVerdict::StageUnavailable));
        assert_eq!(f.monitor.progress_interval(), Duration::from_secs(120));
        assert!(f.sink.alerts().is_empty());
    }

    #[tokio::test]
    async fn test_optional_checks_disabled_by_default() {
        let mut f = fixture();
        f.clock.advance(Duration::from_secs(7200));
        assert_eq!(f.monitor.check_console_flow().await.unwrap(), CheckOutcome::NotDue);
        assert_eq!(f.monitor.check_stuck_shutdown().await.unwrap(), CheckOutcome::NotDue);
        assert_eq!(f.store.query_count(), 0);
    }

    #[tokio::test]
    async fn test_console_flow_alerts_quiet_nodes() {
        let intervals = IntervalConfig {
            console_check_enabled: true,
            ..Default::default()
        };
        let mut f = fixture_with(intervals);
        let mut quiet = Node::new("c01", NodeClass::Compute, "10.0.1.1");
        quiet.last_proof_of_life_millis = START - 1_000;
        let mut chatty = Node::new("c02", NodeClass::Compute, "10.0.1.2");
        chatty.last_proof_of_life_millis = START + 3_500_000;
        f.store.insert_node(quiet).await;
        f.store.insert_node(chatty).await;

        f.clock.advance(Duration::from_secs(3600));
        assert_eq!(f.monitor.check_console_flow().await.unwrap(), CheckOutcome::Ran(1));

        let alerts = f.sink.alerts();
        assert_eq!(alerts[0].location.as_deref(), Some("c01"));
        assert!(alerts[0].instance_data.starts_with("State=A, LastProofOfLifeTs="));
    }

    #[tokio::test]
    async fn test_stuck_shutdown_alert_kind_follows_node_class() {
        let intervals = IntervalConfig {
            stuck_shutdown_enabled: true,
            ..Default::default()
        };
        let mut f = fixture_with(intervals);
        f.store.insert_node(Node::new("c01", NodeClass::Compute, "10.0.1.1")).await;
        f.store.insert_node(Node::new("R0-SN2", NodeClass::Service, "10.0.0.2")).await;
        f.store.set_node_state("c01", NodeState::Halting).await.unwrap();
        f.store.set_node_state("R0-SN2", NodeState::Halting).await.unwrap();

        f.clock.advance(Duration::from_secs(60));
        assert_eq!(f.monitor.check_stuck_shutdown().await.unwrap(), CheckOutcome::Ran(0));

        f.clock.advance(Duration::from_secs(250));
        assert_eq!(f.monitor.check_stuck_shutdown().await.unwrap(), CheckOutcome::Ran(2));
        assert_eq!(f.sink.count(AlertKind::ComputeNodeDidNotShutdown), 1);
        assert_eq!(f.sink.count(AlertKind::ServiceNodeDidNotShutdown), 1);
    }
}
