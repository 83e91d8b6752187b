//! Initial node-state discovery
//!
//! When the lead manager starts it does not trust the node states left in
//! the store by a previous run. Each compute node owned by this service
//! node is pinged once: reachable nodes are marked active, the rest
//! missing. Probes run concurrently in fixed-size batches with a pause in
//! between so a large cluster does not fork thousands of processes at once.

use async_trait::async_trait;
use futures::future::join_all;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;

use crate::alerts::{AlertEmitter, AlertKind};
use crate::config::ProbeConfig;
use crate::error::Result;
use crate::models::NodeState;
use crate::store::DataStore;

/// Reachability check for a single node
#[async_trait]
pub trait NodeProbe: Send + Sync {
    async fn is_reachable(&self, ip_address: &str) -> bool;
}

/// Probes nodes with a single quiet ICMP echo
#[derive(Debug, Clone)]
pub struct PingProbe {
    command: String,
}

impl PingProbe {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl NodeProbe for PingProbe {
    async fn is_reachable(&self, ip_address: &str) -> bool {
        if ip_address.is_empty() {
            return false;
        }
        match Command::new(&self.command)
            .args(["-q", "-c", "1", ip_address])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
        {
            Ok(status) => status.success(),
            Err(e) => {
                tracing::debug!(command = %self.command, error = %e, "Failed to run ping");
                false
            }
        }
    }
}

/// Outcome of the initial probe
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProbeSummary {
    pub active: usize,
    pub missing: usize,
    /// Probing was skipped (synthetic data or too many nodes)
    pub skipped: bool,
}

/// Ping every compute node owned by `service_location` and record its state
pub async fn determine_initial_node_states(
    store: &Arc<dyn DataStore>,
    alerts: &AlertEmitter,
    probe: &dyn NodeProbe,
    config: &ProbeConfig,
    service_location: &str,
) -> Result<ProbeSummary> {
    if config.synthetic_data {
        tracing::info!("Synthetic data in use, skipping initial node probe");
        return Ok(ProbeSummary {
            skipped: true,
            ..Default::default()
        });
    }

    let nodes = store.child_compute_nodes(service_location).await?;
    if nodes.len() > config.max_nodes {
        tracing::warn!(
            nodes = nodes.len(),
            max_nodes = config.max_nodes,
            "Too many nodes, skipping initial node probe"
        );
        return Ok(ProbeSummary {
            skipped: true,
            ..Default::default()
        });
    }

    let pause = Duration::from_millis(config.batch_pause_ms);
    let mut summary = ProbeSummary::default();
    let batches: Vec<_> = nodes.chunks(config.batch_size.max(1)).collect();
    let batch_count = batches.len();

    for (index, batch) in batches.into_iter().enumerate() {
        let reachable = join_all(batch.iter().map(|node| probe.is_reachable(&node.ip_address))).await;

        for (node, up) in batch.iter().zip(reachable) {
            if up {
                store.set_node_state(&node.location, NodeState::Active).await?;
                alerts
                    .emit_best_effort(
                        AlertKind::NodeAlreadyActive,
                        format!("Node {} answered ping at {}", node.location, node.ip_address),
                        Some(&node.location),
                    )
                    .await;
                summary.active += 1;
            } else {
                store.set_node_state(&node.location, NodeState::Missing).await?;
                summary.missing += 1;
            }
        }

        if index + 1 < batch_count {
            tokio::time::sleep(pause).await;
        }
    }

    tracing::info!(
        service_location = %service_location,
        active = summary.active,
        missing = summary.missing,
        "Initial node states determined"
    );
    Ok(summary)
}
