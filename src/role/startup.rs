//! One-time startup steps run before the dispatch loop
//!
//! 1. wait until the store answers
//! 2. make sure local time agrees with the store's time
//! 3. register this process as an adapter

use std::sync::Arc;
use std::time::Duration;

use crate::alerts::{AlertEmitter, AlertKind};
use crate::config::{ClockSyncConfig, ConnectionConfig, ManagerConfig};
use crate::error::{Error, Result};
use crate::models::ManagerIdentity;
use crate::store::DataStore;
use crate::utils::clock::Clock;
use crate::utils::retry::{with_retry_if, RetryError, RetryPolicy};

/// Block until the store accepts requests
///
/// Only connectivity errors are retried; a failure status aborts at once.
pub async fn wait_for_store(store: &Arc<dyn DataStore>, config: &ConnectionConfig) -> Result<()> {
    let policy = RetryPolicy::fixed(
        Duration::from_secs(config.attempt_timeout_secs),
        Duration::from_secs(config.retry_delay_secs),
        Duration::from_secs(config.max_wait_secs),
    );

    with_retry_if(&policy, || store.ping(), |e| e.is_connectivity())
        .await
        .map_err(|e| match e {
            RetryError::Aborted(e) => Error::Store(e),
            exhausted => Error::with_source("data store did not become available", exhausted),
        })?;

    tracing::info!("Data store is available");
    Ok(())
}

/// Compare local time with the store's until they agree within tolerance
///
/// Returns the last observed skew in milliseconds (store minus local).
pub async fn verify_clock_sync(
    store: &Arc<dyn DataStore>,
    clock: &Arc<dyn Clock>,
    alerts: &AlertEmitter,
    config: &ClockSyncConfig,
) -> Result<i64> {
    let delay = Duration::from_millis(config.retry_delay_ms);
    let mut skew_ms = 0;

    for attempt in 1..=config.max_attempts {
        let store_now = store.current_time_millis().await?;
        skew_ms = store_now - clock.now_millis();
        if skew_ms.abs() <= config.tolerance_ms {
            tracing::info!(skew_ms = skew_ms, attempts = attempt, "Clock agrees with data store");
            return Ok(skew_ms);
        }
        tracing::warn!(
            skew_ms = skew_ms,
            attempt = attempt,
            max_attempts = config.max_attempts,
            "Clock differs from data store"
        );
        if attempt < config.max_attempts {
            tokio::time::sleep(delay).await;
        }
    }

    alerts
        .emit_best_effort(
            AlertKind::ClockNotSynced,
            format!(
                "SkewMs={}, ToleranceMs={}, Attempts={}",
                skew_ms, config.tolerance_ms, config.max_attempts
            ),
            None,
        )
        .await;
    Err(Error::ClockNotSynced {
        attempts: config.max_attempts,
        skew_ms,
    })
}

/// Register this process's adapter record
pub async fn register_manager(
    store: &Arc<dyn DataStore>,
    config: &ManagerConfig,
) -> Result<ManagerIdentity> {
    let pid = std::process::id();
    let adapter_id = store
        .register_adapter(&config.node.adapter_type, &config.node.location, pid)
        .await?;

    tracing::info!(
        adapter_type = %config.node.adapter_type,
        adapter_id = adapter_id,
        location = %config.node.location,
        pid = pid,
        "Registered manager"
    );
    Ok(ManagerIdentity {
        adapter_type: config.node.adapter_type.clone(),
        adapter_id,
        location: config.node.location.clone(),
        hostname: config.node.hostname.clone(),
        pid,
    })
}
