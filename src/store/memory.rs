//! In-process data store
//!
//! Keeps every table in memory behind a single `RwLock`. Used by the test
//! suites and by the binary when no external store backend is wired in.
//! Fault injection hooks let tests simulate connectivity loss and failure
//! statuses per operation.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{DataStore, NewWorkItem, StoreError, StoreResult};
use crate::models::{
    AdapterRecord, AdapterState, ConfiguredInstances, InvocationInfo, Node, NodeClass, NodeState,
    PipelineStage, RequeuedWorkItem, WorkItem, WorkItemState, MANAGER_ADAPTER_TYPE,
};
use crate::utils::clock::Clock;

/// Work tags carried by manager activation items
const MANAGER_ROLE_TAGS: [&str; 2] = ["LeadManager", "PeerManager"];

#[derive(Default)]
struct Tables {
    work_items: BTreeMap<i64, WorkItem>,
    adapters: BTreeMap<i64, AdapterRecord>,
    nodes: BTreeMap<String, Node>,
    invocations: Vec<InvocationInfo>,
    configured: HashMap<String, Vec<ConfiguredInstances>>,
    next_work_item_id: i64,
    next_adapter_id: i64,
}

#[derive(Default)]
struct Faults {
    connectivity_lost: bool,
    failing_operations: HashSet<String>,
}

/// Data store held entirely in memory
pub struct MemoryStore {
    clock: Arc<dyn Clock>,
    tables: RwLock<Tables>,
    faults: std::sync::RwLock<Faults>,
    queries: AtomicU64,
    time_offset_ms: std::sync::atomic::AtomicI64,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            tables: RwLock::new(Tables {
                next_work_item_id: 1,
                next_adapter_id: 1,
                ..Default::default()
            }),
            faults: std::sync::RwLock::new(Faults::default()),
            queries: AtomicU64::new(0),
            time_offset_ms: std::sync::atomic::AtomicI64::new(0),
        }
    }

    // ========================================================================
    // Fault injection and inspection
    // ========================================================================

    /// Total number of store operations issued so far
    pub fn query_count(&self) -> u64 {
        self.queries.load(Ordering::SeqCst)
    }

    /// Make every operation fail with a connectivity error
    pub fn set_connectivity_lost(&self, lost: bool) {
        if let Ok(mut faults) = self.faults.write() {
            faults.connectivity_lost = lost;
        }
    }

    /// Make the named operation return a failure status
    pub fn fail_operation(&self, operation: &str) {
        if let Ok(mut faults) = self.faults.write() {
            faults.failing_operations.insert(operation.to_string());
        }
    }

    pub fn clear_failures(&self) {
        if let Ok(mut faults) = self.faults.write() {
            faults.connectivity_lost = false;
            faults.failing_operations.clear();
        }
    }

    /// Skew the store's clock relative to the local clock
    pub fn set_time_offset(&self, offset_ms: i64) {
        self.time_offset_ms.store(offset_ms, Ordering::SeqCst);
    }

    fn enter(&self, operation: &str) -> StoreResult<()> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let faults = self
            .faults
            .read()
            .map_err(|_| StoreError::status(operation, "UNEXPECTED_FAILURE", "poisoned"))?;
        if faults.connectivity_lost {
            return Err(StoreError::connectivity(operation, "no connections available"));
        }
        if faults.failing_operations.contains(operation) {
            return Err(StoreError::status(
                operation,
                "UNEXPECTED_FAILURE",
                "injected failure",
            ));
        }
        Ok(())
    }

    // ========================================================================
    // Seeding
    // ========================================================================

    /// Insert a work item as-is; an id of 0 is replaced by the next free id
    pub async fn insert_work_item(&self, mut item: WorkItem) -> i64 {
        let mut tables = self.tables.write().await;
        if item.id == 0 {
            item.id = tables.next_work_item_id;
        }
        tables.next_work_item_id = tables.next_work_item_id.max(item.id + 1);
        let id = item.id;
        tables.work_items.insert(id, item);
        id
    }

    pub async fn insert_node(&self, node: Node) {
        self.tables
            .write()
            .await
            .nodes
            .insert(node.location.clone(), node);
    }

    pub async fn add_invocation(&self, info: InvocationInfo) {
        self.tables.write().await.invocations.push(info);
    }

    pub async fn add_configured_instances(&self, location: &str, row: ConfiguredInstances) {
        self.tables
            .write()
            .await
            .configured
            .entry(location.to_string())
            .or_default()
            .push(row);
    }

    pub async fn set_adapter_state(&self, adapter_id: i64, state: AdapterState) {
        if let Some(adapter) = self.tables.write().await.adapters.get_mut(&adapter_id) {
            adapter.state = state;
        }
    }

    /// Replace a work item's status blob directly
    pub async fn set_working_results(&self, id: i64, results: &str) {
        if let Some(item) = self.tables.write().await.work_items.get_mut(&id) {
            item.working_results = Some(results.to_string());
        }
    }

    /// Snapshot of a work item without counting as a query
    pub async fn peek_work_item(&self, id: i64) -> Option<WorkItem> {
        self.tables.read().await.work_items.get(&id).cloned()
    }

    pub async fn peek_adapters(&self) -> Vec<AdapterRecord> {
        self.tables.read().await.adapters.values().cloned().collect()
    }

    pub async fn peek_work_items(&self) -> Vec<WorkItem> {
        self.tables.read().await.work_items.values().cloned().collect()
    }

    pub async fn peek_node(&self, location: &str) -> Option<Node> {
        self.tables.read().await.nodes.get(location).cloned()
    }
}

fn terminate(item: &mut WorkItem, state: WorkItemState, results: &str, now: i64) {
    item.state = state;
    item.working_results = Some(results.to_string());
    item.db_updated_millis = now;
}

#[async_trait]
impl DataStore for MemoryStore {
    async fn ping(&self) -> StoreResult<()> {
        self.enter("ping")
    }

    async fn current_time_millis(&self) -> StoreResult<i64> {
        self.enter("current_time_millis")?;
        Ok(self.clock.now_millis() + self.time_offset_ms.load(Ordering::SeqCst))
    }

    async fn claim_next_work_item(
        &self,
        adapter_type: &str,
        adapter_id: i64,
        location: &str,
    ) -> StoreResult<Option<WorkItem>> {
        self.enter("claim_next_work_item")?;
        let now = self.clock.now_millis();
        let mut tables = self.tables.write().await;
        let claimed = tables.work_items.values_mut().find(|item| {
            item.state == WorkItemState::Queued
                && item.adapter_type == adapter_type
                && (item.queue == location || item.queue.is_empty())
        });
        Ok(claimed.map(|item| {
            item.state = WorkItemState::Working;
            item.working_adapter_id = Some(adapter_id);
            item.db_updated_millis = now;
            item.clone()
        }))
    }

    async fn work_item(&self, id: i64) -> StoreResult<Option<WorkItem>> {
        self.enter("work_item")?;
        Ok(self.tables.read().await.work_items.get(&id).cloned())
    }

    async fn queue_work_item(&self, request: NewWorkItem) -> StoreResult<i64> {
        self.enter("queue_work_item")?;
        let now = self.clock.now_millis();
        let mut tables = self.tables.write().await;
        let id = tables.next_work_item_id;
        tables.next_work_item_id += 1;
        let mut item = WorkItem::queued(
            id,
            &request.adapter_type,
            &request.queue,
            &request.work_to_be_done,
        );
        item.parameters = request.parameters;
        item.queued_at_millis = now;
        item.db_updated_millis = now;
        tables.work_items.insert(id, item);
        Ok(id)
    }

    async fn finish_work_item(
        &self,
        adapter_type: &str,
        id: i64,
        results: &str,
    ) -> StoreResult<()> {
        self.enter("finish_work_item")?;
        let now = self.clock.now_millis();
        let mut tables = self.tables.write().await;
        let item = tables
            .work_items
            .get_mut(&id)
            .filter(|item| item.adapter_type == adapter_type)
            .ok_or_else(|| StoreError::not_found("work item", id))?;
        if item.state.is_terminal() {
            return Err(StoreError::status(
                "finish_work_item",
                "GRACEFUL_FAILURE",
                format!("work item {id} is already {}", item.state),
            ));
        }
        terminate(item, WorkItemState::Finished, results, now);
        Ok(())
    }

    async fn finish_work_item_with_error(
        &self,
        adapter_type: &str,
        id: i64,
        reason: &str,
        force: bool,
    ) -> StoreResult<()> {
        self.enter("finish_work_item_with_error")?;
        let now = self.clock.now_millis();
        let mut tables = self.tables.write().await;
        let item = tables
            .work_items
            .get_mut(&id)
            .filter(|item| item.adapter_type == adapter_type)
            .ok_or_else(|| StoreError::not_found("work item", id))?;
        if !force && item.state != WorkItemState::Working {
            return Err(StoreError::status(
                "finish_work_item_with_error",
                "GRACEFUL_FAILURE",
                format!("work item {id} is {}, not working", item.state),
            ));
        }
        terminate(item, WorkItemState::FinishedWithError, reason, now);
        Ok(())
    }

    async fn save_working_results(
        &self,
        adapter_type: &str,
        id: i64,
        results: &str,
    ) -> StoreResult<()> {
        self.enter("save_working_results")?;
        let now = self.clock.now_millis();
        let mut tables = self.tables.write().await;
        let item = tables
            .work_items
            .get_mut(&id)
            .filter(|item| item.adapter_type == adapter_type)
            .ok_or_else(|| StoreError::not_found("work item", id))?;
        item.working_results = Some(results.to_string());
        item.db_updated_millis = now;
        Ok(())
    }

    async fn requeue_zombie_work_items(
        &self,
        adapter_type: &str,
    ) -> StoreResult<Vec<RequeuedWorkItem>> {
        self.enter("requeue_zombie_work_items")?;
        let now = self.clock.now_millis();
        let mut guard = self.tables.write().await;
        let tables = &mut *guard;
        let mut requeued = Vec::new();
        for item in tables.work_items.values_mut() {
            if item.state != WorkItemState::Working || item.adapter_type != adapter_type {
                continue;
            }
            let Some(owner) = item.working_adapter_id else {
                continue;
            };
            if tables.adapters.contains_key(&owner) {
                continue;
            }
            item.state = WorkItemState::Queued;
            item.working_adapter_id = None;
            item.db_updated_millis = now;
            requeued.push(RequeuedWorkItem {
                id: item.id,
                adapter_type: item.adapter_type.clone(),
                previous_adapter_id: owner,
                work_to_be_done: item.work_to_be_done.clone(),
            });
        }
        Ok(requeued)
    }

    async fn backlogged_work_items(&self, queued_before_millis: i64) -> StoreResult<Vec<WorkItem>> {
        self.enter("backlogged_work_items")?;
        let tables = self.tables.read().await;
        let mut backlog: Vec<WorkItem> = tables
            .work_items
            .values()
            .filter(|item| {
                item.state == WorkItemState::Queued && item.queued_at_millis < queued_before_millis
            })
            .cloned()
            .collect();
        backlog.sort_by(|a, b| {
            (&a.adapter_type, &a.queue, a.id).cmp(&(&b.adapter_type, &b.queue, b.id))
        });
        Ok(backlog)
    }

    async fn count_working_items(&self, adapter_type: &str, queue: &str) -> StoreResult<u64> {
        self.enter("count_working_items")?;
        let tables = self.tables.read().await;
        Ok(tables
            .work_items
            .values()
            .filter(|item| {
                item.state == WorkItemState::Working
                    && !item.is_base
                    && item.adapter_type == adapter_type
                    && item.queue == queue
            })
            .count() as u64)
    }

    async fn manager_work_items(&self) -> StoreResult<Vec<WorkItem>> {
        self.enter("manager_work_items")?;
        let tables = self.tables.read().await;
        Ok(tables
            .work_items
            .values()
            .filter(|item| {
                item.state == WorkItemState::Working
                    && item.adapter_type == MANAGER_ADAPTER_TYPE
                    && MANAGER_ROLE_TAGS.contains(&item.work_to_be_done.as_str())
            })
            .cloned()
            .collect())
    }

    async fn pipeline_stage_item(&self, stage: PipelineStage) -> StoreResult<Option<WorkItem>> {
        self.enter("pipeline_stage_item")?;
        let tables = self.tables.read().await;
        Ok(tables
            .work_items
            .values()
            .rev()
            .find(|item| {
                item.adapter_type == stage.adapter_type()
                    && item.work_to_be_done == stage.work_to_be_done()
                    && !item.state.is_terminal()
            })
            .cloned())
    }

    async fn base_work_item_id(
        &self,
        adapter_type: &str,
        adapter_id: i64,
    ) -> StoreResult<Option<i64>> {
        self.enter("base_work_item_id")?;
        let tables = self.tables.read().await;
        Ok(tables
            .work_items
            .values()
            .find(|item| {
                item.is_base
                    && item.adapter_type == adapter_type
                    && item.working_adapter_id == Some(adapter_id)
                    && !item.state.is_terminal()
            })
            .map(|item| item.id))
    }

    async fn teardown_base_work_item(
        &self,
        adapter_type: &str,
        work_item_id: i64,
    ) -> StoreResult<()> {
        self.enter("teardown_base_work_item")?;
        let now = self.clock.now_millis();
        let mut tables = self.tables.write().await;
        let item = tables
            .work_items
            .get_mut(&work_item_id)
            .filter(|item| item.adapter_type == adapter_type)
            .ok_or_else(|| StoreError::not_found("base work item", work_item_id))?;
        if !item.state.is_terminal() {
            terminate(item, WorkItemState::Finished, "adapter instance torn down", now);
        }
        Ok(())
    }

    async fn register_adapter(
        &self,
        adapter_type: &str,
        location: &str,
        pid: u32,
    ) -> StoreResult<i64> {
        self.enter("register_adapter")?;
        let mut tables = self.tables.write().await;
        let id = tables.next_adapter_id;
        tables.next_adapter_id += 1;
        tables.adapters.insert(
            id,
            AdapterRecord {
                id,
                adapter_type: adapter_type.to_string(),
                location: location.to_string(),
                pid,
                state: AdapterState::Active,
            },
        );
        Ok(id)
    }

    async fn adapter(&self, adapter_id: i64) -> StoreResult<Option<AdapterRecord>> {
        self.enter("adapter")?;
        Ok(self.tables.read().await.adapters.get(&adapter_id).cloned())
    }

    async fn find_adapter(
        &self,
        adapter_type: &str,
        location: &str,
        pid: u32,
    ) -> StoreResult<Option<AdapterRecord>> {
        self.enter("find_adapter")?;
        let tables = self.tables.read().await;
        Ok(tables
            .adapters
            .values()
            .find(|a| a.adapter_type == adapter_type && a.location == location && a.pid == pid)
            .cloned())
    }

    async fn adapters_on_node(&self, location: &str) -> StoreResult<Vec<AdapterRecord>> {
        self.enter("adapters_on_node")?;
        let tables = self.tables.read().await;
        Ok(tables
            .adapters
            .values()
            .filter(|a| a.location == location)
            .cloned()
            .collect())
    }

    async fn teardown_adapter(&self, adapter_type: &str, adapter_id: i64) -> StoreResult<()> {
        self.enter("teardown_adapter")?;
        let mut tables = self.tables.write().await;
        match tables.adapters.get(&adapter_id) {
            Some(adapter) if adapter.adapter_type == adapter_type => {
                tables.adapters.remove(&adapter_id);
                Ok(())
            }
            _ => Err(StoreError::not_found("adapter", adapter_id)),
        }
    }

    async fn invocation_info(
        &self,
        adapter_type: &str,
        queue: &str,
    ) -> StoreResult<Option<InvocationInfo>> {
        self.enter("invocation_info")?;
        let tables = self.tables.read().await;
        Ok(tables
            .invocations
            .iter()
            .find(|info| {
                info.adapter_type == adapter_type && (info.service_node == queue || queue.is_empty())
            })
            .cloned())
    }

    async fn configured_instances(&self, location: &str) -> StoreResult<Vec<ConfiguredInstances>> {
        self.enter("configured_instances")?;
        Ok(self
            .tables
            .read()
            .await
            .configured
            .get(location)
            .cloned()
            .unwrap_or_default())
    }

    async fn node(&self, location: &str) -> StoreResult<Option<Node>> {
        self.enter("node")?;
        Ok(self.tables.read().await.nodes.get(location).cloned())
    }

    async fn set_node_state(&self, location: &str, state: NodeState) -> StoreResult<()> {
        self.enter("set_node_state")?;
        let now = self.clock.now_millis();
        let mut tables = self.tables.write().await;
        let node = tables
            .nodes
            .entry(location.to_string())
            .or_insert_with(|| Node::new(location, NodeClass::Service, ""));
        // a repeated Halting write keeps the original halt time
        node.halting_since_millis = match state {
            NodeState::Halting if node.state == NodeState::Halting => {
                node.halting_since_millis.or(Some(now))
            }
            NodeState::Halting => Some(now),
            _ => None,
        };
        node.state = state;
        Ok(())
    }

    async fn child_compute_nodes(&self, service_location: &str) -> StoreResult<Vec<Node>> {
        self.enter("child_compute_nodes")?;
        let tables = self.tables.read().await;
        Ok(tables
            .nodes
            .values()
            .filter(|n| {
                n.class == NodeClass::Compute && n.owner.as_deref() == Some(service_location)
            })
            .cloned()
            .collect())
    }

    async fn nodes_missing_proof_of_life(&self, before_millis: i64) -> StoreResult<Vec<Node>> {
        self.enter("nodes_missing_proof_of_life")?;
        let tables = self.tables.read().await;
        Ok(tables
            .nodes
            .values()
            .filter(|n| n.last_proof_of_life_millis < before_millis)
            .cloned()
            .collect())
    }

    async fn nodes_stuck_halting(&self, halting_before_millis: i64) -> StoreResult<Vec<Node>> {
        self.enter("nodes_stuck_halting")?;
        let tables = self.tables.read().await;
        Ok(tables
            .nodes
            .values()
            .filter(|n| {
                n.state == NodeState::Halting
                    && n.halting_since_millis
                        .is_some_and(|since| since < halting_before_millis)
            })
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::clock::ManualClock;

    fn store() -> (Arc<ManualClock>, MemoryStore) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let store = MemoryStore::new(clock.clone());
        (clock, store)
    }

    #[tokio::test]
    async fn test_claim_marks_item_working() {
        let (_, store) = store();
        let id = store
            .insert_work_item(WorkItem::queued(0, "WORKER", "nodeA", "Scan"))
            .await;

        let claimed = store
            .claim_next_work_item("WORKER", 9, "nodeA")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.id, id);
        assert!(claimed.is_owned_by(9));
        assert!(store
            .claim_next_work_item("WORKER", 9, "nodeA")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_claim_respects_queue() {
        let (_, store) = store();
        store
            .insert_work_item(WorkItem::queued(0, "WORKER", "nodeB", "Scan"))
            .await;
        assert!(store
            .claim_next_work_item("WORKER", 1, "nodeA")
            .await
            .unwrap()
            .is_none());

        store
            .insert_work_item(WorkItem::queued(0, "WORKER", "", "Scan"))
            .await;
        assert!(store
            .claim_next_work_item("WORKER", 1, "nodeA")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_requeue_only_orphaned_items() {
        let (_, store) = store();
        let live = store.register_adapter("WORKER", "nodeA", 10).await.unwrap();
        let mut owned = WorkItem::queued(0, "WORKER", "nodeA", "Scan");
        owned.state = WorkItemState::Working;
        owned.working_adapter_id = Some(live);
        let owned_id = store.insert_work_item(owned).await;

        let mut orphan = WorkItem::queued(0, "WORKER", "nodeA", "Scan");
        orphan.state = WorkItemState::Working;
        orphan.working_adapter_id = Some(live + 100);
        let orphan_id = store.insert_work_item(orphan).await;

        let requeued = store.requeue_zombie_work_items("WORKER").await.unwrap();
        assert_eq!(requeued.len(), 1);
        assert_eq!(requeued[0].id, orphan_id);
        assert_eq!(requeued[0].previous_adapter_id, live + 100);

        let orphan = store.peek_work_item(orphan_id).await.unwrap();
        assert_eq!(orphan.state, WorkItemState::Queued);
        assert_eq!(orphan.working_adapter_id, None);
        assert!(store.peek_work_item(owned_id).await.unwrap().is_owned_by(live));
    }

    #[tokio::test]
    async fn test_backlog_is_sorted_and_respects_cutoff() {
        let (clock, store) = store();
        for (ty, queue) in [("WLM", "ssn2"), ("RAS", "ssn1"), ("WLM", "ssn1")] {
            store
                .queue_work_item(NewWorkItem {
                    adapter_type: ty.to_string(),
                    queue: queue.to_string(),
                    work_to_be_done: "Work".to_string(),
                    parameters: String::new(),
                    requesting_work_item_id: None,
                })
                .await
                .unwrap();
        }
        assert!(store
            .backlogged_work_items(clock.now_millis())
            .await
            .unwrap()
            .is_empty());

        clock.advance(std::time::Duration::from_secs(40));
        let backlog = store
            .backlogged_work_items(clock.now_millis() - 35_000)
            .await
            .unwrap();
        let pairs: Vec<_> = backlog
            .iter()
            .map(|i| (i.adapter_type.as_str(), i.queue.as_str()))
            .collect();
        assert_eq!(pairs, vec![("RAS", "ssn1"), ("WLM", "ssn1"), ("WLM", "ssn2")]);
    }

    #[tokio::test]
    async fn test_finish_with_error_requires_force_for_queued_item() {
        let (_, store) = store();
        let id = store
            .insert_work_item(WorkItem::queued(0, "WLM", "ssn1", "Run"))
            .await;

        let err = store
            .finish_work_item_with_error("WLM", id, "no invocation", false)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Status { .. }));

        store
            .finish_work_item_with_error("WLM", id, "no invocation", true)
            .await
            .unwrap();
        let item = store.peek_work_item(id).await.unwrap();
        assert_eq!(item.state, WorkItemState::FinishedWithError);
        assert_eq!(item.working_results.as_deref(), Some("no invocation"));
    }

    #[tokio::test]
    async fn test_fault_injection() {
        let (_, store) = store();
        store.set_connectivity_lost(true);
        assert!(store.ping().await.unwrap_err().is_connectivity());

        store.clear_failures();
        store.fail_operation("ping");
        assert!(matches!(
            store.ping().await.unwrap_err(),
            StoreError::Status { .. }
        ));
        assert_eq!(store.query_count(), 2);
    }

    #[tokio::test]
    async fn test_stuck_halting_uses_halting_timestamp() {
        let (clock, store) = store();
        store
            .insert_node(Node::new("c01", NodeClass::Compute, "10.0.0.1"))
            .await;
        store.set_node_state("c01", NodeState::Halting).await.unwrap();

        let cutoff = clock.now_millis() - 300_000;
        assert!(store.nodes_stuck_halting(cutoff).await.unwrap().is_empty());

        clock.advance(std::time::Duration::from_secs(301));
        let cutoff = clock.now_millis() - 300_000;
        let stuck = store.nodes_stuck_halting(cutoff).await.unwrap();
        assert_eq!(stuck.len(), 1);
        assert_eq!(stuck[0].location, "c01");
    }

    #[tokio::test]
    async fn test_repeated_halting_write_keeps_halt_time() {
        let (clock, store) = store();
        store
            .insert_node(Node::new("c01", NodeClass::Compute, "10.0.0.1"))
            .await;
        store.set_node_state("c01", NodeState::Halting).await.unwrap();
        let first = store.peek_node("c01").await.unwrap().halting_since_millis;

        clock.advance(std::time::Duration::from_secs(200));
        store.set_node_state("c01", NodeState::Halting).await.unwrap();
        assert_eq!(store.peek_node("c01").await.unwrap().halting_since_millis, first);

        clock.advance(std::time::Duration::from_secs(101));
        let cutoff = clock.now_millis() - 300_000;
        assert_eq!(store.nodes_stuck_halting(cutoff).await.unwrap().len(), 1);

        store.set_node_state("c01", NodeState::Active).await.unwrap();
        assert_eq!(store.peek_node("c01").await.unwrap().halting_since_millis, None);
    }

    #[tokio::test]
    async fn test_missing_proof_of_life_covers_every_node_state() {
        let (clock, store) = store();
        store
            .insert_node(Node::new("c01", NodeClass::Compute, "10.0.0.1"))
            .await;
        store
            .insert_node(Node::new("R0-SN2", NodeClass::Service, "10.0.0.2"))
            .await;
        store.set_node_state("c01", NodeState::Missing).await.unwrap();

        clock.advance(std::time::Duration::from_secs(10));
        let mut quiet: Vec<String> = store
            .nodes_missing_proof_of_life(clock.now_millis())
            .await
            .unwrap()
            .into_iter()
            .map(|n| n.location)
            .collect();
        quiet.sort();
        assert_eq!(quiet, vec!["R0-SN2".to_string(), "c01".to_string()]);
    }

    #[tokio::test]
    async fn test_pipeline_stage_found_by_adapter_type() {
        let (_, store) = store();
        let mut mover = WorkItem::queued(0, "ONLINE_TIER", "", "DataMover");
        mover.state = WorkItemState::Working;
        let mover_id = store.insert_work_item(mover).await;
        // a tier name used as a queue is not a stage item
        store
            .insert_work_item(WorkItem::queued(0, "TIER", "NEARLINE_TIER", "DataReceiver"))
            .await;

        let found = store
            .pipeline_stage_item(PipelineStage::DataMover)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, mover_id);
        assert!(store
            .pipeline_stage_item(PipelineStage::DataReceiver)
            .await
            .unwrap()
            .is_none());
    }
}
