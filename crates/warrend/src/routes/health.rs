//! Health and status endpoints.

use axum::{
    extract::State,
    http::StatusCode,
    Json,
};
use serde::Serialize;
use warren_common::{NodeName, ReconcilerState, ReconcilerStatus};

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Basic health check (is the process running?)
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
pub struct ReadyResponse {
    status: &'static str,
    redis: bool,
    state: ReconcilerState,
}

/// Readiness: Redis reachable and this node registered
pub async fn ready_check(
    State(state): State<AppState>,
) -> Result<Json<ReadyResponse>, StatusCode> {
    let redis = state.backend.ping().await;
    let reconciler = state.reconciler.status().await.state;

    if redis && reconciler == ReconcilerState::Registered {
        Ok(Json(ReadyResponse {
            status: "ready",
            redis,
            state: reconciler,
        }))
    } else {
        Err(StatusCode::SERVICE_UNAVAILABLE)
    }
}

#[derive(Serialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    reconciler: ReconcilerStatus,
    registered_nodes: Vec<NodeName>,
}

/// Reconciler progress plus the registry as Redis currently sees it
pub async fn status(
    State(state): State<AppState>,
) -> Result<Json<StatusResponse>, StatusCode> {
    let reconciler = state.reconciler.status().await;
    let registered_nodes = state
        .reconciler
        .registry()
        .list()
        .await
        .map_err(|e| {
            tracing::warn!(error = %e, "Registry listing failed");
            StatusCode::SERVICE_UNAVAILABLE
        })?;

    Ok(Json(StatusResponse {
        reconciler,
        registered_nodes,
    }))
}
