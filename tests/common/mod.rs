//! Common test utilities

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::watch;

use fleetmgr::alerts::{AlertEmitter, MemoryAlertSink};
use fleetmgr::config::ManagerConfig;
use fleetmgr::guard::{ServiceError, ServiceManager};
use fleetmgr::models::{WorkItem, MANAGER_ADAPTER_TYPE};
use fleetmgr::nodes::NodeProbe;
use fleetmgr::role::{startup, LoopExit, RoleContext, RoleController};
use fleetmgr::store::{DataStore, MemoryStore};
use fleetmgr::supervisor::{AdapterInstanceSupervisor, InstanceReaper};
use fleetmgr::utils::clock::Clock;

pub const BASE_MILLIS: i64 = 1_718_000_000_000;

/// Wall clock that follows tokio time, so paused tests move it too
pub struct TokioClock {
    started: tokio::time::Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            started: tokio::time::Instant::now(),
        }
    }
}

impl Clock for TokioClock {
    fn now_millis(&self) -> i64 {
        BASE_MILLIS + self.started.elapsed().as_millis() as i64
    }
}

/// Records restart requests instead of calling systemctl
#[derive(Default)]
pub struct RecordingServices {
    pub restarts: Mutex<Vec<String>>,
}

#[async_trait]
impl ServiceManager for RecordingServices {
    async fn restart(&self, unit: &str) -> Result<(), ServiceError> {
        self.restarts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(unit.to_string());
        Ok(())
    }
}

/// Every node is unreachable
pub struct SilentProbe;

#[async_trait]
impl NodeProbe for SilentProbe {
    async fn is_reachable(&self, _ip_address: &str) -> bool {
        false
    }
}

/// Shared store and alert capture for one simulated cluster
pub struct Cluster {
    pub dir: TempDir,
    pub clock: Arc<dyn Clock>,
    pub store: Arc<MemoryStore>,
    pub sink: Arc<MemoryAlertSink>,
}

impl Cluster {
    pub fn new() -> Self {
        let clock: Arc<dyn Clock> = Arc::new(TokioClock::new());
        Self {
            dir: TempDir::new().expect("temp dir"),
            store: Arc::new(MemoryStore::new(clock.clone())),
            sink: Arc::new(MemoryAlertSink::new()),
            clock,
        }
    }

    pub fn dyn_store(&self) -> Arc<dyn DataStore> {
        self.store.clone()
    }

    pub fn alerts(&self) -> AlertEmitter {
        AlertEmitter::new(self.sink.clone(), self.clock.clone(), MANAGER_ADAPTER_TYPE)
    }

    pub fn config(&self, location: &str) -> Arc<ManagerConfig> {
        let mut config =
            ManagerConfig::default().with_node(None, Some(location), Some(&location.to_lowercase()));
        config.spawn.log_directory = self.dir.path().display().to_string();
        Arc::new(config)
    }

    /// Register a manager on `location` and build its controller
    pub async fn manager(&self, location: &str) -> Manager {
        let config = self.config(location);
        let store = self.dyn_store();
        let alerts = self.alerts();
        let identity = startup::register_manager(&store, &config)
            .await
            .expect("register manager");
        let (supervisor, reaper) = AdapterInstanceSupervisor::new(
            config.clone(),
            store.clone(),
            alerts.clone(),
            self.clock.clone(),
        );
        let supervisor = Arc::new(supervisor);
        let services = Arc::new(RecordingServices::default());
        let (shutdown, shutdown_rx) = watch::channel(false);

        let controller = RoleController::new(
            RoleContext {
                config,
                identity,
                store,
                alerts,
                clock: self.clock.clone(),
                supervisor: supervisor.clone(),
                services: services.clone(),
                probe: Arc::new(SilentProbe),
            },
            shutdown_rx,
        );
        Manager {
            controller,
            supervisor,
            reaper,
            services,
            shutdown,
        }
    }

    /// Queue an activation or request item for the manager on `location`
    pub async fn queue_manager_item(&self, location: &str, tag: &str) -> i64 {
        self.store
            .insert_work_item(WorkItem::queued(0, MANAGER_ADAPTER_TYPE, location, tag))
            .await
    }
}

pub struct Manager {
    pub controller: RoleController,
    pub supervisor: Arc<AdapterInstanceSupervisor>,
    pub reaper: InstanceReaper,
    pub services: Arc<RecordingServices>,
    pub shutdown: watch::Sender<bool>,
}

pub type RunHandle = tokio::task::JoinHandle<(RoleController, fleetmgr::error::Result<LoopExit>)>;

impl Manager {
    /// Run the controller in a task until `after` has elapsed
    pub fn run_for(self, after: Duration) -> (RunHandle, Arc<AdapterInstanceSupervisor>) {
        let Manager {
            mut controller,
            supervisor,
            shutdown,
            ..
        } = self;
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            shutdown.send_replace(true);
            std::future::pending::<()>().await;
        });
        let handle = tokio::spawn(async move {
            let exit = controller.run().await;
            (controller, exit)
        });
        (handle, supervisor)
    }
}
