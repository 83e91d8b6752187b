//! Configuration management for fleetmgr
//!
//! A [`ManagerConfig`] is built once at startup (defaults, then an optional
//! TOML file, then environment variables, then CLI positionals) and handed
//! to every component at construction. Nothing reads configuration from
//! global state afterwards.

use serde::{Deserialize, Serialize};
use std::env;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::models::MANAGER_ADAPTER_TYPE;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

impl ConfigError {
    fn invalid(field: &str, reason: &str) -> Self {
        Self::InvalidValue {
            field: field.to_string(),
            reason: reason.to_string(),
        }
    }
}

// ============================================================================
// Sections
// ============================================================================

/// Identity of this node and manager
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Data store server addresses
    pub store_servers: Vec<String>,
    /// Location of the service node this manager runs on
    pub location: String,
    pub hostname: String,
    /// Adapter type this process registers as
    pub adapter_type: String,
    /// Host service unit restarted when this instance turns out to be a zombie
    pub service_unit: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            store_servers: vec![String::from("localhost")],
            location: String::from("UnknownLctn"),
            hostname: String::from("UnknownHostName"),
            adapter_type: MANAGER_ADAPTER_TYPE.to_string(),
            service_unit: String::from("fleet-manager.service"),
        }
    }
}

/// Values substituted into adapter invocation templates
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpawnConfig {
    /// Runtime executable (`$JAVA`)
    pub runtime_executable: String,
    /// Classpath (`$CLASSPATH`, `$UCSCLASSPATH`)
    pub classpath: String,
    /// Logging configuration file (`$UCSLOG4JCONFIGURATIONFILE`)
    pub log_config_file: String,
    /// Directory for adapter log files (`$UCSLOGFILEDIRECTORY`)
    pub log_directory: String,
}

impl Default for SpawnConfig {
    fn default() -> Self {
        Self {
            runtime_executable: String::from("/usr/bin/java"),
            classpath: String::new(),
            log_config_file: String::new(),
            log_directory: String::from("/tmp"),
        }
    }
}

/// Intervals and thresholds of the periodic checks, in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntervalConfig {
    pub zombie_check_secs: u64,
    pub backlog_check_secs: u64,
    /// How long a queued item may wait before it counts as backlog
    pub backlog_grace_secs: u64,
    pub peer_check_secs: u64,
    pub heartbeat_secs: u64,
    pub progress_default_secs: u64,
    pub progress_max_secs: u64,
    pub progress_lag_threshold_secs: u64,
    pub console_check_secs: u64,
    pub console_check_enabled: bool,
    pub stuck_shutdown_check_secs: u64,
    pub stuck_shutdown_threshold_secs: u64,
    pub stuck_shutdown_enabled: bool,
    /// Idle time between passes of the manager loops
    pub loop_idle_secs: u64,
    /// Idle time of the dispatch loop when no work was available
    pub dispatch_idle_secs: u64,
    /// Pause after losing connectivity to the store
    pub connectivity_pause_secs: u64,
    /// Pause between role startup and the first loop pass
    pub startup_settle_secs: u64,
}

impl Default for IntervalConfig {
    fn default() -> Self {
        Self {
            zombie_check_secs: 30,
            backlog_check_secs: 30,
            backlog_grace_secs: 35,
            peer_check_secs: 45,
            heartbeat_secs: 15,
            progress_default_secs: 60,
            progress_max_secs: 3600,
            progress_lag_threshold_secs: 15,
            console_check_secs: 3600,
            console_check_enabled: false,
            stuck_shutdown_check_secs: 60,
            stuck_shutdown_threshold_secs: 300,
            stuck_shutdown_enabled: false,
            loop_idle_secs: 5,
            dispatch_idle_secs: 8,
            connectivity_pause_secs: 10,
            startup_settle_secs: 2,
        }
    }
}

/// Startup clock agreement with the store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockSyncConfig {
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
    pub tolerance_ms: i64,
}

impl Default for ClockSyncConfig {
    fn default() -> Self {
        Self {
            max_attempts: 300,
            retry_delay_ms: 1000,
            tolerance_ms: 1000,
        }
    }
}

/// Waiting for the store to accept connections
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub attempt_timeout_secs: u64,
    pub retry_delay_secs: u64,
    pub max_wait_secs: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            attempt_timeout_secs: 10,
            retry_delay_secs: 15,
            max_wait_secs: 900,
        }
    }
}

/// Initial node-state probing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Skip probing when the cluster runs on synthetic data
    pub synthetic_data: bool,
    pub ping_command: String,
    /// Pause after this many probe processes have been spawned
    pub batch_size: usize,
    pub batch_pause_ms: u64,
    /// Skip probing entirely above this many nodes
    pub max_nodes: usize,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            synthetic_data: false,
            ping_command: String::from("/usr/bin/ping"),
            batch_size: 500,
            batch_pause_ms: 1000,
            max_nodes: 100_000,
        }
    }
}

/// Status endpoint
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    /// Address to serve `/health` and `/metrics` on; disabled when unset
    pub bind_address: Option<SocketAddr>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Output format (text, json)
    pub format: String,
    /// Append alerts as JSON lines to this file instead of the log
    pub alert_file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
            alert_file: None,
        }
    }
}

// ============================================================================
// Manager Configuration
// ============================================================================

/// Complete manager configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    pub node: NodeConfig,
    pub spawn: SpawnConfig,
    pub intervals: IntervalConfig,
    pub clock_sync: ClockSyncConfig,
    pub connection: ConnectionConfig,
    pub probe: ProbeConfig,
    pub status: StatusConfig,
    pub logging: LoggingConfig,
}

impl ManagerConfig {
    /// Apply environment overrides on top of defaults
    ///
    /// Environment variables:
    /// - `FLEETMGR_STORE_SERVERS`: comma-separated store addresses
    /// - `FLEETMGR_NODE_LOCATION`, `FLEETMGR_HOSTNAME`
    /// - `FLEETMGR_SERVICE_UNIT`: unit restarted on self-zombie detection
    /// - `FLEETMGR_RUNTIME`, `FLEETMGR_CLASSPATH`, `FLEETMGR_LOG_CONFIG_FILE`, `FLEETMGR_LOG_DIRECTORY`
    /// - `FLEETMGR_CONSOLE_CHECK`, `FLEETMGR_STUCK_SHUTDOWN_CHECK`: enable optional checks
    /// - `FLEETMGR_CLOCK_SYNC_ATTEMPTS`: clock agreement retry bound [default: 300]
    /// - `FLEETMGR_SYNTHETIC_DATA`: skip node probing [default: false]
    /// - `FLEETMGR_STATUS_ADDR`: status endpoint address [optional]
    /// - `FLEETMGR_LOG_LEVEL`, `FLEETMGR_LOG_FORMAT`
    /// - `FLEETMGR_ALERT_FILE`: JSON-lines alert file [optional]
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Override fields from `FLEETMGR_*` environment variables
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(servers) = env::var("FLEETMGR_STORE_SERVERS") {
            self.node.store_servers = split_servers(&servers);
        }
        if let Ok(location) = env::var("FLEETMGR_NODE_LOCATION") {
            self.node.location = location;
        }
        if let Ok(hostname) = env::var("FLEETMGR_HOSTNAME") {
            self.node.hostname = hostname;
        }
        if let Ok(unit) = env::var("FLEETMGR_SERVICE_UNIT") {
            self.node.service_unit = unit;
        }
        if let Ok(runtime) = env::var("FLEETMGR_RUNTIME") {
            self.spawn.runtime_executable = runtime;
        }
        if let Ok(classpath) = env::var("FLEETMGR_CLASSPATH") {
            self.spawn.classpath = classpath;
        }
        if let Ok(file) = env::var("FLEETMGR_LOG_CONFIG_FILE") {
            self.spawn.log_config_file = file;
        }
        if let Ok(dir) = env::var("FLEETMGR_LOG_DIRECTORY") {
            self.spawn.log_directory = dir;
        }

        self.intervals.console_check_enabled = env::var("FLEETMGR_CONSOLE_CHECK")
            .ok()
            .map(|s| s.to_lowercase() == "true")
            .unwrap_or(self.intervals.console_check_enabled);
        self.intervals.stuck_shutdown_enabled = env::var("FLEETMGR_STUCK_SHUTDOWN_CHECK")
            .ok()
            .map(|s| s.to_lowercase() == "true")
            .unwrap_or(self.intervals.stuck_shutdown_enabled);
        self.clock_sync.max_attempts = env::var("FLEETMGR_CLOCK_SYNC_ATTEMPTS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(self.clock_sync.max_attempts);
        self.probe.synthetic_data = env::var("FLEETMGR_SYNTHETIC_DATA")
            .ok()
            .map(|s| s.to_lowercase() == "true")
            .unwrap_or(self.probe.synthetic_data);
        self.status.bind_address = env::var("FLEETMGR_STATUS_ADDR")
            .ok()
            .and_then(|s| s.parse().ok())
            .or(self.status.bind_address);

        if let Ok(level) = env::var("FLEETMGR_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = env::var("FLEETMGR_LOG_FORMAT") {
            self.logging.format = format;
        }
        if let Ok(file) = env::var("FLEETMGR_ALERT_FILE") {
            self.logging.alert_file = Some(PathBuf::from(file));
        }
        self
    }

    /// Apply the startup positionals (store servers, node location, hostname)
    pub fn with_node(
        mut self,
        store_servers: Option<&str>,
        location: Option<&str>,
        hostname: Option<&str>,
    ) -> Self {
        if let Some(servers) = store_servers {
            self.node.store_servers = split_servers(servers);
        }
        if let Some(location) = location {
            self.node.location = location.to_string();
        }
        if let Some(hostname) = hostname {
            self.node.hostname = hostname.to_string();
        }
        self
    }

    /// Enable or disable the console-flow check
    pub fn with_console_check(mut self, enabled: bool) -> Self {
        self.intervals.console_check_enabled = enabled;
        self
    }

    /// Enable or disable the stuck-shutdown check
    pub fn with_stuck_shutdown_check(mut self, enabled: bool) -> Self {
        self.intervals.stuck_shutdown_enabled = enabled;
        self
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node.location.trim().is_empty() {
            return Err(ConfigError::invalid("node.location", "cannot be empty"));
        }
        if self.node.adapter_type.trim().is_empty() {
            return Err(ConfigError::invalid("node.adapter_type", "cannot be empty"));
        }
        if self.node.service_unit.trim().is_empty() {
            return Err(ConfigError::invalid("node.service_unit", "cannot be empty"));
        }

        let intervals = [
            ("intervals.zombie_check_secs", self.intervals.zombie_check_secs),
            ("intervals.backlog_check_secs", self.intervals.backlog_check_secs),
            ("intervals.peer_check_secs", self.intervals.peer_check_secs),
            ("intervals.heartbeat_secs", self.intervals.heartbeat_secs),
            ("intervals.progress_default_secs", self.intervals.progress_default_secs),
            ("intervals.console_check_secs", self.intervals.console_check_secs),
            ("intervals.stuck_shutdown_check_secs", self.intervals.stuck_shutdown_check_secs),
        ];
        for (field, secs) in intervals {
            if secs == 0 {
                return Err(ConfigError::invalid(field, "must be greater than 0"));
            }
        }
        if self.intervals.progress_max_secs < self.intervals.progress_default_secs {
            return Err(ConfigError::invalid(
                "intervals.progress_max_secs",
                "must not be below progress_default_secs",
            ));
        }
        if self.intervals.heartbeat_secs >= self.intervals.peer_check_secs {
            return Err(ConfigError::invalid(
                "intervals.heartbeat_secs",
                "must be shorter than peer_check_secs",
            ));
        }
        if self.clock_sync.max_attempts == 0 {
            return Err(ConfigError::invalid("clock_sync.max_attempts", "must be greater than 0"));
        }
        if self.clock_sync.tolerance_ms < 0 {
            return Err(ConfigError::invalid("clock_sync.tolerance_ms", "must not be negative"));
        }
        if self.probe.batch_size == 0 {
            return Err(ConfigError::invalid("probe.batch_size", "must be greater than 0"));
        }
        Ok(())
    }

    pub fn zombie_check_interval(&self) -> Duration {
        Duration::from_secs(self.intervals.zombie_check_secs)
    }

    pub fn backlog_check_interval(&self) -> Duration {
        Duration::from_secs(self.intervals.backlog_check_secs)
    }

    pub fn backlog_grace(&self) -> Duration {
        Duration::from_secs(self.intervals.backlog_grace_secs)
    }

    pub fn peer_check_interval(&self) -> Duration {
        Duration::from_secs(self.intervals.peer_check_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.intervals.heartbeat_secs)
    }

    pub fn loop_idle(&self) -> Duration {
        Duration::from_secs(self.intervals.loop_idle_secs)
    }

    pub fn dispatch_idle(&self) -> Duration {
        Duration::from_secs(self.intervals.dispatch_idle_secs)
    }

    pub fn connectivity_pause(&self) -> Duration {
        Duration::from_secs(self.intervals.connectivity_pause_secs)
    }

    pub fn startup_settle(&self) -> Duration {
        Duration::from_secs(self.intervals.startup_settle_secs)
    }

    /// Display configuration
    pub fn display(&self) -> String {
        format!(
            "Manager Configuration\n\
             {:-<50}\n\
             Node: {} ({})\n\
             Store Servers: {}\n\
             Adapter Type: {}\n\
             Service Unit: {}\n\
             Zombie Check: {}s\n\
             Backlog Check: {}s (grace {}s)\n\
             Peer Check: {}s\n\
             Heartbeat: {}s\n\
             Console Check: {}\n\
             Stuck Shutdown Check: {}\n\
             Clock Sync: {} attempts, {}ms tolerance\n\
             Status Endpoint: {}\n\
             {:-<50}",
            "",
            self.node.location,
            self.node.hostname,
            self.node.store_servers.join(","),
            self.node.adapter_type,
            self.node.service_unit,
            self.intervals.zombie_check_secs,
            self.intervals.backlog_check_secs,
            self.intervals.backlog_grace_secs,
            self.intervals.peer_check_secs,
            self.intervals.heartbeat_secs,
            enabled_label(self.intervals.console_check_enabled),
            enabled_label(self.intervals.stuck_shutdown_enabled),
            self.clock_sync.max_attempts,
            self.clock_sync.tolerance_ms,
            self.status
                .bind_address
                .map(|a| a.to_string())
                .unwrap_or_else(|| "disabled".to_string()),
            ""
        )
    }
}

fn split_servers(servers: &str) -> Vec<String> {
    servers
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn enabled_label(enabled: bool) -> &'static str {
    if enabled {
        "enabled"
    } else {
        "disabled"
    }
}
