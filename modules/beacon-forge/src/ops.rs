//! Loopback-only operator surface: health snapshot and manual breaker
//! reset.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::trace::TraceLayer;

use crate::breaker::CircuitBreaker;
use crate::health::HealthProbe;

#[derive(Clone)]
pub struct OpsState {
    pub probe: Arc<HealthProbe>,
    pub breaker: Arc<CircuitBreaker>,
}

pub fn build_router(state: OpsState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/internal/health", get(full_health))
        .route("/internal/breaker/reset", post(breaker_reset))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn full_health(
    State(state): State<OpsState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> Response {
    if !peer.ip().is_loopback() {
        return StatusCode::FORBIDDEN.into_response();
    }
    let snapshot = state.probe.snapshot().await;
    Json(snapshot.as_ref().clone()).into_response()
}

async fn breaker_reset(
    State(state): State<OpsState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> Response {
    if !peer.ip().is_loopback() {
        return StatusCode::FORBIDDEN.into_response();
    }
    state.breaker.reset();
    Json(state.breaker.snapshot()).into_response()
}
