use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fleetmgr::alerts::{AlertEmitter, AlertSink, JsonFileAlertSink, TracingAlertSink};
use fleetmgr::config::ManagerConfig;
use fleetmgr::guard::SystemctlServiceManager;
use fleetmgr::models::MANAGER_ADAPTER_TYPE;
use fleetmgr::nodes::PingProbe;
use fleetmgr::role::{startup, LoopExit, RoleContext, RoleController};
use fleetmgr::status::{self, StatusState};
use fleetmgr::store::{DataStore, MemoryStore};
use fleetmgr::supervisor::AdapterInstanceSupervisor;
use fleetmgr::utils::clock::{Clock, SystemClock};

#[derive(Parser)]
#[command(
    name = "fleetmgr",
    version,
    about = "Per-node fleet manager: adapter supervision, work-item recovery and liveness monitoring",
    long_about = None
)]
struct Cli {
    /// Comma-separated data store servers
    store_servers: Option<String>,

    /// Location of the service node this manager runs on
    node_location: Option<String>,

    /// Hostname of the service node
    node_hostname: Option<String>,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Log format (text, json)
    #[arg(long)]
    log_format: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ManagerConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?
            .with_env_overrides(),
        None => ManagerConfig::from_env(),
    }
    .with_node(
        cli.store_servers.as_deref(),
        cli.node_location.as_deref(),
        cli.node_hostname.as_deref(),
    );

    let log_format = cli.log_format.as_deref().unwrap_or(&config.logging.format);
    setup_tracing(log_format, &config.logging.level, cli.verbose)?;

    config.validate().context("invalid configuration")?;
    tracing::info!("{}", config.display());

    if let Err(e) = fleetmgr::metrics::init_metrics() {
        tracing::warn!("Metrics initialization failed: {}", e);
    }

    let config = Arc::new(config);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store: Arc<dyn DataStore> = Arc::new(MemoryStore::new(clock.clone()));
    let sink: Arc<dyn AlertSink> = match &config.logging.alert_file {
        Some(path) => Arc::new(JsonFileAlertSink::new(path.clone())),
        None => Arc::new(TracingAlertSink),
    };
    let alerts = AlertEmitter::new(sink, clock.clone(), MANAGER_ADAPTER_TYPE);

    startup::wait_for_store(&store, &config.connection).await?;
    startup::verify_clock_sync(&store, &clock, &alerts, &config.clock_sync).await?;
    let identity = startup::register_manager(&store, &config).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (supervisor, reaper) =
        AdapterInstanceSupervisor::new(config.clone(), store.clone(), alerts.clone(), clock.clone());
    let reaper_task = tokio::spawn(reaper.run(shutdown_rx.clone()));

    let mut controller = RoleController::new(
        RoleContext {
            config: config.clone(),
            identity,
            store,
            alerts,
            clock,
            supervisor: Arc::new(supervisor),
            services: Arc::new(SystemctlServiceManager::new()),
            probe: Arc::new(PingProbe::new(config.probe.ping_command.clone())),
        },
        shutdown_rx.clone(),
    );

    let status_task = config.status.bind_address.map(|addr| {
        let state = StatusState::new(controller.subscribe());
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = status::serve(addr, state, shutdown).await {
                tracing::error!(error = %e, "Status endpoint failed");
            }
        })
    });

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received");
            shutdown_tx.send_replace(true);
            // hold the sender so receivers observe the flag instead of a closed channel
            std::future::pending::<()>().await;
        }
    });

    controller.prepare().await?;
    let outcome = controller.run().await;

    match &outcome {
        Ok(LoopExit::Shutdown) => {
            if let Err(e) = controller.teardown_self().await {
                tracing::warn!(error = %e, "Failed to remove own adapter record");
            }
        }
        Ok(LoopExit::RestartRequested) => {
            tracing::warn!("Service restart requested, exiting");
        }
        Err(e) => {
            tracing::error!(error = %e, category = %e.category(), "Manager terminated");
        }
    }

    // the role loop is done; stop helper tasks whether or not ctrl-c fired
    reaper_task.abort();
    if let Some(task) = status_task {
        task.abort();
    }

    outcome?;
    tracing::info!("fleetmgr stopped");
    Ok(())
}

fn setup_tracing(format: &str, level: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("fleetmgr=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("fleetmgr={level},warn")))
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}
