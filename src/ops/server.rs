//! Operational HTTP surface: liveness, readiness and metrics.

use super::health::HealthState;
use super::metrics;
use crate::bus::MessageBus;
use crate::store::PipelineStore;
use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub struct OpsState {
    pub health: Arc<HealthState>,
    pub store: Arc<dyn PipelineStore>,
    pub bus: Arc<dyn MessageBus>,
}

pub async fn run_ops_server(
    state: OpsState,
    port: u16,
    cancel: CancellationToken,
) -> Result<()> {
    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics_endpoint))
        .with_state(Arc::new(state));

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("Failed to bind ops server to port {}", port))?;
    info!("Ops server listening on port {}", port);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .context("Ops server failed")?;
    info!("Ops server stopped");
    Ok(())
}

async fn healthz(State(state): State<Arc<OpsState>>) -> impl IntoResponse {
    if state.health.is_live() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "stalled")
    }
}

async fn readyz(State(state): State<Arc<OpsState>>) -> impl IntoResponse {
    if let Err(e) = state.store.ping() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            format!("store unavailable: {}", e),
        );
    }
    if !state.bus.is_ready() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            "bus unavailable".to_string(),
        );
    }
    (StatusCode::OK, "ok".to_string())
}

async fn metrics_endpoint() -> impl IntoResponse {
    metrics::render()
}
