use std::sync::OnceLock;
use std::time::Instant;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde_json::json;

use crate::models::inventory::INVENTORY_COLLECTION;
use crate::store::Query;
use crate::AppState;

static START_TIME: OnceLock<Instant> = OnceLock::new();

/// Records the process start for uptime reporting.
pub fn init_start_time() {
    let _ = START_TIME.get_or_init(Instant::now);
}

fn uptime_secs() -> u64 {
    START_TIME.get().map(|t| t.elapsed().as_secs()).unwrap_or(0)
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(liveness))
        .route("/health/ready", get(readiness))
}

/// Liveness probe: the process is up and serving.
async fn liveness() -> impl IntoResponse {
    Json(json!({
        "status": "up",
        "version": env!("CARGO_PKG_VERSION"),
        "uptimeSecs": uptime_secs(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

/// Readiness probe: the document store answers a trivial query.
async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    let start = Instant::now();
    let probe = state
        .store
        .list(&Query::collection(INVENTORY_COLLECTION).limit(1))
        .await;
    let latency_ms = start.elapsed().as_millis() as u64;

    match probe {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({
                "status": "ready",
                "environment": state.config.environment,
                "checks": { "store": { "status": "up", "latencyMs": latency_ms } },
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "not_ready",
                "checks": { "store": { "status": "down", "error": e.to_string() } },
            })),
        ),
    }
}
