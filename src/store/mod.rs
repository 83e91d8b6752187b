//! Data store contract
//!
//! The manager keeps no authoritative state of its own: work items,
//! adapter records and node records all live in a shared store that every
//! manager in the cluster reads and writes. This module defines that store
//! as an async trait so the control loops can be driven against any
//! backend.
//!
//! Every operation returns [`StoreResult`]. A [`StoreError::Connectivity`]
//! means the store could not be reached and the caller should pause and
//! retry; every other error is a failure status and is fatal for the unit
//! of work that issued it.

mod error;
mod memory;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;

use async_trait::async_trait;

use crate::models::{
    AdapterRecord, ConfiguredInstances, InvocationInfo, Node, NodeState, PipelineStage,
    RequeuedWorkItem, WorkItem,
};

/// Request to enqueue a new work item
#[derive(Debug, Clone, PartialEq)]
pub struct NewWorkItem {
    pub adapter_type: String,
    pub queue: String,
    pub work_to_be_done: String,
    pub parameters: String,
    pub requesting_work_item_id: Option<i64>,
}

/// Operations the manager needs from the shared store
#[async_trait]
pub trait DataStore: Send + Sync {
    // ------------------------------------------------------------------
    // Connection
    // ------------------------------------------------------------------

    /// Cheap round trip used while waiting for the store to come up
    async fn ping(&self) -> StoreResult<()>;

    /// The store's notion of the current time
    async fn current_time_millis(&self) -> StoreResult<i64>;

    // ------------------------------------------------------------------
    // Work items
    // ------------------------------------------------------------------

    /// Claim the next queued item for this adapter type on `location`
    async fn claim_next_work_item(
        &self,
        adapter_type: &str,
        adapter_id: i64,
        location: &str,
    ) -> StoreResult<Option<WorkItem>>;

    async fn work_item(&self, id: i64) -> StoreResult<Option<WorkItem>>;

    async fn queue_work_item(&self, request: NewWorkItem) -> StoreResult<i64>;

    async fn finish_work_item(&self, adapter_type: &str, id: i64, results: &str)
        -> StoreResult<()>;

    /// Mark an item FinishedWithError; `force` bypasses the state check
    async fn finish_work_item_with_error(
        &self,
        adapter_type: &str,
        id: i64,
        reason: &str,
        force: bool,
    ) -> StoreResult<()>;

    async fn save_working_results(
        &self,
        adapter_type: &str,
        id: i64,
        results: &str,
    ) -> StoreResult<()>;

    /// Atomically requeue working items of `adapter_type` whose owning adapter record is gone
    async fn requeue_zombie_work_items(
        &self,
        adapter_type: &str,
    ) -> StoreResult<Vec<RequeuedWorkItem>>;

    /// Queued items waiting since before `queued_before_millis`, sorted by (adapter type, queue)
    async fn backlogged_work_items(&self, queued_before_millis: i64) -> StoreResult<Vec<WorkItem>>;

    /// Number of non-base items currently being worked for the type and queue
    async fn count_working_items(&self, adapter_type: &str, queue: &str) -> StoreResult<u64>;

    /// Lead and peer manager activation items currently being worked
    async fn manager_work_items(&self) -> StoreResult<Vec<WorkItem>>;

    async fn pipeline_stage_item(&self, stage: PipelineStage) -> StoreResult<Option<WorkItem>>;

    async fn base_work_item_id(
        &self,
        adapter_type: &str,
        adapter_id: i64,
    ) -> StoreResult<Option<i64>>;

    async fn teardown_base_work_item(&self, adapter_type: &str, work_item_id: i64)
        -> StoreResult<()>;

    // ------------------------------------------------------------------
    // Adapters
    // ------------------------------------------------------------------

    async fn register_adapter(&self, adapter_type: &str, location: &str, pid: u32)
        -> StoreResult<i64>;

    async fn adapter(&self, adapter_id: i64) -> StoreResult<Option<AdapterRecord>>;

    async fn find_adapter(
        &self,
        adapter_type: &str,
        location: &str,
        pid: u32,
    ) -> StoreResult<Option<AdapterRecord>>;

    async fn adapters_on_node(&self, location: &str) -> StoreResult<Vec<AdapterRecord>>;

    async fn teardown_adapter(&self, adapter_type: &str, adapter_id: i64) -> StoreResult<()>;

    async fn invocation_info(
        &self,
        adapter_type: &str,
        queue: &str,
    ) -> StoreResult<Option<InvocationInfo>>;

    async fn configured_instances(&self, location: &str) -> StoreResult<Vec<ConfiguredInstances>>;

    // ------------------------------------------------------------------
    // Nodes
    // ------------------------------------------------------------------

    async fn node(&self, location: &str) -> StoreResult<Option<Node>>;

    async fn set_node_state(&self, location: &str, state: NodeState) -> StoreResult<()>;

    async fn child_compute_nodes(&self, service_location: &str) -> StoreResult<Vec<Node>>;

    /// Compute and service nodes whose last proof of life predates `before_millis`
    async fn nodes_missing_proof_of_life(&self, before_millis: i64) -> StoreResult<Vec<Node>>;

    /// Nodes that started halting before `halting_before_millis` and are still halting
    async fn nodes_stuck_halting(&self, halting_before_millis: i64) -> StoreResult<Vec<Node>>;
}
