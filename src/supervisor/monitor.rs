//! Exit monitoring and reaping of adapter instances
//!
//! ```text
//!  child 1 ──wait()──┐
//!  child 2 ──wait()──┼──► mpsc ──► InstanceReaper ──► store cleanup + alert
//!  child N ──wait()──┘
//! ```
//!
//! Each spawned child gets a small task that only awaits its exit and
//! reports it. All store cleanup happens in the single reaper task, one
//! exit at a time.

use std::sync::Arc;
use tokio::process::Child;
use tokio::sync::{mpsc, watch};

use crate::alerts::{AlertEmitter, AlertKind};
use crate::metrics;
use crate::store::{DataStore, StoreResult};

/// A supervised adapter process that has exited
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceExit {
    pub adapter_type: String,
    pub location: String,
    pub pid: u32,
    pub instance: u32,
    /// Process exit code; `None` when killed by a signal or the wait failed
    pub exit_code: Option<i32>,
}

/// Await the child's exit and hand it to the reaper
pub(crate) async fn watch_instance(
    mut child: Child,
    mut exit: InstanceExit,
    exits: mpsc::UnboundedSender<InstanceExit>,
) {
    exit.exit_code = match child.wait().await {
        Ok(status) => status.code(),
        Err(e) => {
            tracing::warn!(pid = exit.pid, error = %e, "Failed waiting for adapter instance");
            None
        }
    };
    if exits.send(exit).is_err() {
        tracing::debug!("Instance reaper is gone, exit not reported");
    }
}

/// Cleans up after exited adapter instances
pub struct InstanceReaper {
    store: Arc<dyn DataStore>,
    alerts: AlertEmitter,
    exits: mpsc::UnboundedReceiver<InstanceExit>,
}

impl InstanceReaper {
    pub(crate) fn new(
        store: Arc<dyn DataStore>,
        alerts: AlertEmitter,
        exits: mpsc::UnboundedReceiver<InstanceExit>,
    ) -> Self {
        Self {
            store,
            alerts,
            exits,
        }
    }

    /// Wait for the next exit event
    pub async fn recv(&mut self) -> Option<InstanceExit> {
        self.exits.recv().await
    }

    /// Reap exits until shutdown is signalled or every sender is gone
    ///
    /// Returns the number of exits handled.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> usize {
        let mut handled = 0;
        loop {
            tokio::select! {
                exit = self.exits.recv() => match exit {
                    Some(exit) => {
                        self.handle_exit(&exit).await;
                        handled += 1;
                    }
                    None => break,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!(handled = handled, "Instance reaper stopped");
        handled
    }

    /// Remove the store records of an exited instance and report it
    ///
    /// Every step is best effort; failures are logged and alerted and never
    /// returned.
    pub async fn handle_exit(&self, exit: &InstanceExit) {
        metrics::record_instance_exited(&exit.adapter_type);
        tracing::info!(
            adapter_type = %exit.adapter_type,
            location = %exit.location,
            pid = exit.pid,
            instance = exit.instance,
            exit_code = ?exit.exit_code,
            "Adapter instance ended"
        );

        if let Err(e) = self.remove_records(exit).await {
            tracing::warn!(
                adapter_type = %exit.adapter_type,
                pid = exit.pid,
                error = %e,
                "Cleanup after adapter exit failed"
            );
            self.alerts
                .emit_best_effort(
                    AlertKind::AdapterExceptionButContinue,
                    format!(
                        "Cleanup of {} instance {} (pid {}) failed: {}",
                        exit.adapter_type, exit.instance, exit.pid, e
                    ),
                    Some(&exit.location),
                )
                .await;
        }

        self.alerts
            .emit_best_effort(
                AlertKind::AdapterInstanceEnded,
                format!(
                    "AdapterType={}, Instance={}, Pid={}, ExitCode={}",
                    exit.adapter_type,
                    exit.instance,
                    exit.pid,
                    exit.exit_code
                        .map(|c| c.to_string())
                        .unwrap_or_else(|| "none".to_string())
                ),
                Some(&exit.location),
            )
            .await;
    }

    async fn remove_records(&self, exit: &InstanceExit) -> StoreResult<()> {
        let Some(adapter) = self
            .store
            .find_adapter(&exit.adapter_type, &exit.location, exit.pid)
            .await?
        else {
            tracing::info!(pid = exit.pid, "No adapter record for exited instance");
            return Ok(());
        };

        self.store
            .teardown_adapter(&adapter.adapter_type, adapter.id)
            .await?;

        match self
            .store
            .base_work_item_id(&adapter.adapter_type, adapter.id)
            .await?
        {
            Some(base_id) => {
                self.store
                    .teardown_base_work_item(&adapter.adapter_type, base_id)
                    .await?
            }
            None => tracing::info!(adapter_id = adapter.id, "Exited instance had no base work item"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::MemoryAlertSink;
    use crate::models::{WorkItem, WorkItemState, MANAGER_ADAPTER_TYPE};
    use crate::store::MemoryStore;
    use crate::utils::clock::ManualClock;

    fn reaper() -> (Arc<MemoryStore>, Arc<MemoryAlertSink>, InstanceReaper) {
        let clock = Arc::new(ManualClock::new(1_000));
        let store = Arc::new(MemoryStore::new(clock.clone()));
        let sink = Arc::new(MemoryAlertSink::new());
        let alerts = AlertEmitter::new(sink.clone(), clock, MANAGER_ADAPTER_TYPE);
        let (_tx, rx) = mpsc::unbounded_channel();
        let reaper = InstanceReaper::new(store.clone(), alerts, rx);
        (store, sink, reaper)
    }

    fn exit(pid: u32) -> InstanceExit {
        InstanceExit {
            adapter_type: "WLM".to_string(),
            location: "R0-SN1".to_string(),
            pid,
            instance: 1,
            exit_code: Some(0),
        }
    }

    #[tokio::test]
    async fn test_exit_tears_down_record_and_base_item() {
        let (store, sink, reaper) = reaper();
        let adapter_id = store.register_adapter("WLM", "R0-SN1", 321).await.unwrap();
        let mut base = WorkItem::queued(0, "WLM", "R0-SN1", "HandleInputFromExternalComponent");
        base.state = WorkItemState::Working;
        base.working_adapter_id = Some(adapter_id);
        base.is_base = true;
        let base_id = store.insert_work_item(base).await;

        reaper.handle_exit(&exit(321)).await;

        assert!(store.peek_adapters().await.is_empty());
        assert_eq!(
            store.peek_work_item(base_id).await.unwrap().state,
            WorkItemState::Finished
        );
        assert_eq!(sink.kinds(), vec![AlertKind::AdapterInstanceEnded]);
    }

    #[tokio::test]
    async fn test_exit_without_record_only_alerts() {
        let (_store, sink, reaper) = reaper();
        reaper.handle_exit(&exit(999)).await;
        assert_eq!(sink.kinds(), vec![AlertKind::AdapterInstanceEnded]);
    }

    #[tokio::test]
    async fn test_store_failure_is_reported_not_propagated() {
        let (store, sink, reaper) = reaper();
        store.register_adapter("WLM", "R0-SN1", 321).await.unwrap();
        store.fail_operation("teardown_adapter");

        reaper.handle_exit(&exit(321)).await;

        assert_eq!(
            sink.kinds(),
            vec![
                AlertKind::AdapterExceptionButContinue,
                AlertKind::AdapterInstanceEnded
            ]
        );
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (_store, _sink, reaper) = reaper();
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(reaper.run(rx));
        tx.send(true).unwrap();
        assert_eq!(handle.await.unwrap(), 0);
    }
}
