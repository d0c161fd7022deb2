use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Path, State},
    http::{header, HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use tower_http::trace::TraceLayer;
use tracing::debug;

use crate::parser;
use crate::pixel::TRANSPARENT_GIF;
use crate::state::EdgeState;

pub fn build_router(state: Arc<EdgeState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/internal/queue-depth", get(queue_depth))
        .route("/js/{company}/{file}", get(script))
        .fallback(capture)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// The capture endpoint: any GET whose path ends in the pixel suffix.
/// Always answers 200 with the fixed pixel; enqueueing is best-effort.
async fn capture(
    State(state): State<Arc<EdgeState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let path = uri.path();
    let query = uri.query().unwrap_or("");

    if let Some((record, ip)) = parser::build_record(path, query, &headers, peer) {
        let tokens =
            state
                .classifiers
                .append_tokens(ip, &record.query, &record.ua, record.received_at);
        let query = tokens.merge_into(&record.query);
        state.queue.push(record.with_query(query));
    }

    pixel_response()
}

fn pixel_response() -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "image/gif"),
            (header::CACHE_CONTROL, "no-store"),
        ],
        TRANSPARENT_GIF.as_slice(),
    )
        .into_response()
}

async fn health(State(state): State<Arc<EdgeState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "uptime_secs": state.started_at.elapsed().as_secs(),
    }))
}

/// Queue depth for the Forge health probe. Loopback peers only.
async fn queue_depth(
    State(state): State<Arc<EdgeState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> Response {
    if !peer.ip().is_loopback() {
        return StatusCode::FORBIDDEN.into_response();
    }
    Json(serde_json::json!({
        "depth": state.queue.depth(),
        "dropped": state.queue.dropped(),
    }))
    .into_response()
}

/// Client script delivery. Outside the capture core; serves straight from
/// the configured script directory when one exists.
async fn script(
    State(state): State<Arc<EdgeState>>,
    Path((company, file)): Path<(String, String)>,
) -> Response {
    let Some(dir) = state.config.script_dir.as_ref() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    if !file.ends_with(".js")
        || company.contains(['/', '\\', '.'])
        || file.matches('.').count() != 1
    {
        return StatusCode::NOT_FOUND.into_response();
    }

    let path = dir.join(&company).join(&file);
    match tokio::fs::read(&path).await {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/javascript")],
            body,
        )
            .into_response(),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Script not found");
            StatusCode::NOT_FOUND.into_response()
        }
    }
}
