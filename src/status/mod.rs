//! Read-only status endpoint
//!
//! - `GET /health/live`: process is up
//! - `GET /health`: current role snapshot and uptime
//! - `GET /metrics`: Prometheus text exposition

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::time::Instant;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;

use crate::metrics::gather_metrics;
use crate::role::{RoleState, RoleStatus};

#[derive(Clone)]
pub struct StatusState {
    status: watch::Receiver<RoleStatus>,
    start_time: Instant,
}

impl StatusState {
    pub fn new(status: watch::Receiver<RoleStatus>) -> Self {
        Self {
            status,
            start_time: Instant::now(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LivenessResponse {
    pub status: &'static str,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub version: &'static str,
    pub uptime_secs: u64,
    pub timestamp: String,
    #[serde(flatten)]
    pub role: RoleStatus,
}

pub fn router(state: StatusState) -> Router {
    Router::new()
        .route("/health/live", get(liveness))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn liveness() -> impl IntoResponse {
    Json(LivenessResponse {
        status: "alive",
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

async fn health(State(state): State<StatusState>) -> impl IntoResponse {
    let role = state.status.borrow().clone();
    let code = if role.state == RoleState::Terminal {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    let body = HealthResponse {
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.start_time.elapsed().as_secs(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        role,
    };
    (code, Json(body))
}

async fn metrics() -> impl IntoResponse {
    match gather_metrics() {
        Ok(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to gather metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// Serve the status endpoint until `shutdown` flips to true
pub async fn serve(
    addr: SocketAddr,
    state: StatusState,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %addr, "Status endpoint listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            while !*shutdown.borrow_and_update() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
        })
        .await?;

    tracing::info!("Status endpoint stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    fn status(state: RoleState) -> RoleStatus {
        RoleStatus {
            state,
            location: "R0-SN1".to_string(),
            adapter_id: 7,
            work_item_id: Some(42),
            instances: 3,
            inactive_managers: 0,
            passes: 12,
        }
    }

    async fn get_json(router: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let code = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (code, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health_reports_role_snapshot() {
        let (_tx, rx) = watch::channel(status(RoleState::LeadManagerLoop));
        let (code, body) = get_json(router(StatusState::new(rx)), "/health").await;

        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["state"], "lead-manager-loop");
        assert_eq!(body["location"], "R0-SN1");
        assert_eq!(body["work_item_id"], 42);
        assert_eq!(body["instances"], 3);
    }

    #[tokio::test]
    async fn test_terminal_role_is_unavailable() {
        let (_tx, rx) = watch::channel(status(RoleState::Terminal));
        let (code, _) = get_json(router(StatusState::new(rx)), "/health").await;
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_liveness() {
        let (_tx, rx) = watch::channel(status(RoleState::Init));
        let (code, body) = get_json(router(StatusState::new(rx)), "/health/live").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["status"], "alive");
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        crate::metrics::init_metrics().unwrap();
        crate::metrics::record_loop_pass("lead");

        let (_tx, rx) = watch::channel(status(RoleState::Init));
        let response = router(StatusState::new(rx))
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(String::from_utf8_lossy(&bytes).contains("fleetmgr_"));
    }
}
