// Core data structures shared by the manager components

use serde::{Deserialize, Serialize};
use std::fmt;

/// Adapter type under which manager instances register themselves
pub const MANAGER_ADAPTER_TYPE: &str = "MANAGER";

/// Work item state as persisted by the data store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkItemState {
    Queued,
    Working,
    Finished,
    FinishedWithError,
}

impl WorkItemState {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Working => "working",
            Self::Finished => "finished",
            Self::FinishedWithError => "finished-with-error",
        }
    }

    /// Check whether the item reached a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::FinishedWithError)
    }
}

impl fmt::Display for WorkItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A unit of asynchronous work recorded in the shared store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: i64,
    /// Adapter type expected to service this item
    pub adapter_type: String,
    /// Node location the item is queued to (empty means any node)
    pub queue: String,
    pub state: WorkItemState,
    pub work_to_be_done: String,
    pub parameters: String,
    /// Free-text status blob (carries the proof-of-life payload for managers)
    pub working_results: Option<String>,
    pub working_adapter_id: Option<i64>,
    /// Set on the item an adapter instance was started under
    pub is_base: bool,
    pub queued_at_millis: i64,
    pub db_updated_millis: i64,
}

impl WorkItem {
    /// Create a queued work item
    pub fn queued(id: i64, adapter_type: &str, queue: &str, work_to_be_done: &str) -> Self {
        Self {
            id,
            adapter_type: adapter_type.to_string(),
            queue: queue.to_string(),
            state: WorkItemState::Queued,
            work_to_be_done: work_to_be_done.to_string(),
            parameters: String::new(),
            working_results: None,
            working_adapter_id: None,
            is_base: false,
            queued_at_millis: 0,
            db_updated_millis: 0,
        }
    }

    /// Check whether the given adapter currently owns this item
    pub fn is_owned_by(&self, adapter_id: i64) -> bool {
        self.state == WorkItemState::Working && self.working_adapter_id == Some(adapter_id)
    }
}

/// State of an adapter record in the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdapterState {
    Active,
    Inactive,
}

/// Store-side record of a running adapter instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterRecord {
    pub id: i64,
    pub adapter_type: String,
    pub location: String,
    pub pid: u32,
    pub state: AdapterState,
}

/// Node classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeClass {
    Compute,
    Service,
}

impl NodeClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Compute => "compute",
            Self::Service => "service",
        }
    }
}

/// Node state as tracked by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeState {
    Active,
    Missing,
    Halting,
    Error,
    Unknown,
}

impl NodeState {
    /// Single-letter code used in alert payloads
    pub fn code(&self) -> &'static str {
        match self {
            Self::Active => "A",
            Self::Missing => "M",
            Self::Halting => "H",
            Self::Error => "E",
            Self::Unknown => "U",
        }
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Node record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub location: String,
    pub class: NodeClass,
    pub state: NodeState,
    pub ip_address: String,
    /// Service node that owns this node (compute nodes only)
    pub owner: Option<String>,
    pub last_proof_of_life_millis: i64,
    pub halting_since_millis: Option<i64>,
}

impl Node {
    /// Create an active node record
    pub fn new(location: &str, class: NodeClass, ip_address: &str) -> Self {
        Self {
            location: location.to_string(),
            class,
            state: NodeState::Active,
            ip_address: ip_address.to_string(),
            owner: None,
            last_proof_of_life_millis: 0,
            halting_since_millis: None,
        }
    }

    /// Set the owning service node
    pub fn with_owner(mut self, owner: &str) -> Self {
        self.owner = Some(owner.to_string());
        self
    }
}

/// How to start an adapter type for a given queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationInfo {
    pub adapter_type: String,
    /// Service node that runs instances servicing the queue
    pub service_node: String,
    pub invocation: String,
    pub log_file: String,
}

/// Desired initial instances of an adapter type on a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfiguredInstances {
    pub adapter_type: String,
    pub initial_instances: u32,
    pub invocation: String,
    pub log_file: String,
}

/// A work item that was requeued because its owner disappeared
#[derive(Debug, Clone, PartialEq)]
pub struct RequeuedWorkItem {
    pub id: i64,
    pub adapter_type: String,
    pub previous_adapter_id: i64,
    pub work_to_be_done: String,
}

/// Pipeline stages watched by the progress-lag check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineStage {
    /// Online-tier data mover
    DataMover,
    /// Nearline-tier data receiver
    DataReceiver,
}

impl PipelineStage {
    /// Adapter type whose work item carries this stage's heartbeat
    pub fn adapter_type(&self) -> &'static str {
        match self {
            Self::DataMover => "ONLINE_TIER",
            Self::DataReceiver => "NEARLINE_TIER",
        }
    }

    pub fn work_to_be_done(&self) -> &'static str {
        match self {
            Self::DataMover => "DataMover",
            Self::DataReceiver => "DataReceiver",
        }
    }
}

/// Identity of this running manager instance
#[derive(Debug, Clone, PartialEq)]
pub struct ManagerIdentity {
    pub adapter_type: String,
    pub adapter_id: i64,
    pub location: String,
    pub hostname: String,
    pub pid: u32,
}
