//! fleetmgr - per-node fleet manager for an HPC control plane
//!
//! One manager process runs on every service node. Together they keep the
//! cluster's adapter processes alive and its shared work queue moving.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`role`] - Dispatch, lead-manager and peer-manager loops
//! - [`coordinator`] - Work-item claiming, completion and zombie requeue
//! - [`supervisor`] - Spawning and reaping adapter instances
//! - [`balancer`] - Starting extra instances for backlogged queues
//! - [`health`] - Peer liveness, pipeline progress and node checks
//! - [`guard`] - Detecting that this manager has itself become a zombie
//! - [`nodes`] - Initial node-state discovery by ping
//! - [`keywords`] - `$KEYWORD` expansion in invocation templates
//! - [`store`] - Shared data store contract and in-memory backend
//! - [`alerts`] - Structured RAS alerts
//! - [`status`] - Read-only HTTP status endpoint
//! - [`config`], [`error`], [`metrics`], [`models`], [`utils`]
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use fleetmgr::alerts::{AlertEmitter, TracingAlertSink};
//! use fleetmgr::config::ManagerConfig;
//! use fleetmgr::models::MANAGER_ADAPTER_TYPE;
//! use fleetmgr::store::{DataStore, MemoryStore};
//! use fleetmgr::utils::clock::{Clock, SystemClock};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ManagerConfig::from_env();
//!     let clock: Arc<dyn Clock> = Arc::new(SystemClock);
//!     let store: Arc<dyn DataStore> = Arc::new(MemoryStore::new(clock.clone()));
//!     let alerts = AlertEmitter::new(Arc::new(TracingAlertSink), clock, MANAGER_ADAPTER_TYPE);
//!     let identity = fleetmgr::role::startup::register_manager(&store, &config).await?;
//!     println!("registered as adapter {}", identity.adapter_id);
//!     Ok(())
//! }
//! ```

pub mod alerts;
pub mod balancer;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod guard;
pub mod health;
pub mod keywords;
pub mod metrics;
pub mod models;
pub mod nodes;
pub mod role;
pub mod status;
pub mod store;
pub mod supervisor;
pub mod utils;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::alerts::{AlertEmitter, AlertKind, AlertSink};
    pub use crate::config::ManagerConfig;
    pub use crate::error::{Error, ErrorCategory, Result};
    pub use crate::models::{AdapterRecord, ManagerIdentity, NodeState, WorkItem, WorkItemState};
    pub use crate::role::{LoopExit, RoleContext, RoleController};
    pub use crate::store::{DataStore, MemoryStore, StoreError};
    pub use crate::supervisor::AdapterInstanceSupervisor;
    pub use crate::utils::clock::{Clock, SystemClock};
}

pub use models::{WorkItem, WorkItemState};
