//! Work-item coordination
//!
//! Thin layer over the store's work-item operations that adds the
//! zombie-recovery protocol: a work item claimed by an adapter whose record
//! has since vanished is put back on its queue, at most once per zombie
//! check interval, with one alert per requeued item.

use std::sync::Arc;
use std::time::Duration;

use crate::alerts::{AlertEmitter, AlertKind};
use crate::error::Result;
use crate::health::proof_of_life::ProofOfLife;
use crate::metrics;
use crate::models::WorkItem;
use crate::store::{DataStore, NewWorkItem};
use crate::utils::clock::{CheckOutcome, Clock, IntervalGate};

/// Claims, finishes and recovers work items on behalf of this manager
pub struct WorkItemCoordinator {
    store: Arc<dyn DataStore>,
    alerts: AlertEmitter,
    clock: Arc<dyn Clock>,
    adapter_type: String,
    zombie_gate: IntervalGate,
}

impl WorkItemCoordinator {
    /// Create a coordinator; the first zombie check is due immediately
    pub fn new(
        store: Arc<dyn DataStore>,
        alerts: AlertEmitter,
        clock: Arc<dyn Clock>,
        adapter_type: &str,
        zombie_interval: Duration,
    ) -> Self {
        Self {
            store,
            alerts,
            clock,
            adapter_type: adapter_type.to_string(),
            zombie_gate: IntervalGate::due_now(zombie_interval),
        }
    }

    pub fn adapter_type(&self) -> &str {
        &self.adapter_type
    }

    /// Requeue work items of `adapter_type` whose owning adapter no longer exists
    ///
    /// Returns [`CheckOutcome::NotDue`] without touching the store when the
    /// zombie interval has not elapsed since the last run.
    pub async fn requeue_zombies(&mut self, adapter_type: &str) -> Result<CheckOutcome<usize>> {
        if !self.zombie_gate.try_pass(self.clock.now_millis()) {
            return Ok(CheckOutcome::NotDue);
        }

        let requeued = self.store.requeue_zombie_work_items(adapter_type).await?;
        for item in &requeued {
            tracing::info!(
                work_item_id = item.id,
                adapter_type = %item.adapter_type,
                previous_adapter_id = item.previous_adapter_id,
                work = %item.work_to_be_done,
                "Requeued zombie work item"
            );
            self.alerts
                .emit_best_effort(
                    AlertKind::RequeuedWorkItem,
                    format!(
                        "WorkItemId={}, WorkingAdapterType={}, WorkingAdapterId={}, WorkToBeDone={}",
                        item.id, item.adapter_type, item.previous_adapter_id, item.work_to_be_done
                    ),
                    None,
                )
                .await;
        }

        metrics::record_zombies_requeued(requeued.len());
        Ok(CheckOutcome::Ran(requeued.len()))
    }

    /// Single claim attempt for this manager's adapter type
    pub async fn claim_next(&self, adapter_id: i64, location: &str) -> Result<Option<WorkItem>> {
        let item = self
            .store
            .claim_next_work_item(&self.adapter_type, adapter_id, location)
            .await?;
        if let Some(item) = &item {
            tracing::debug!(
                work_item_id = item.id,
                work = %item.work_to_be_done,
                "Claimed work item"
            );
        }
        Ok(item)
    }

    pub async fn finish(&self, item: &WorkItem, results: &str) -> Result<()> {
        self.store
            .finish_work_item(&item.adapter_type, item.id, results)
            .await?;
        Ok(())
    }

    /// Mark an item FinishedWithError
    ///
    /// `force` applies the transition whatever state the item is in. It is
    /// used for items that can provably never be serviced.
    pub async fn finish_with_error(
        &self,
        work_to_be_done: &str,
        adapter_type: &str,
        id: i64,
        reason: &str,
        force: bool,
    ) -> Result<()> {
        tracing::warn!(
            work_item_id = id,
            adapter_type = %adapter_type,
            work = %work_to_be_done,
            force = force,
            reason = %reason,
            "Finishing work item with error"
        );
        self.store
            .finish_work_item_with_error(adapter_type, id, reason, force)
            .await?;
        Ok(())
    }

    pub async fn queue_work_item(&self, request: NewWorkItem) -> Result<i64> {
        let id = self.store.queue_work_item(request).await?;
        Ok(id)
    }

    /// Store a heartbeat in the given work item's status blob
    pub async fn save_proof_of_life(&self, work_item_id: i64, pol: &ProofOfLife) -> Result<()> {
        self.store
            .save_working_results(&self.adapter_type, work_item_id, &pol.format())
            .await?;
        Ok(())
    }
}
