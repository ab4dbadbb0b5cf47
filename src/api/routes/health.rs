//! Health Routes
//!
//! - GET /health/live - Liveness probe (process is alive)
//! - GET /health/ready - Readiness probe (store answers queries)
//! - GET /health - Full health status

use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;

use crate::api::dto::HealthResponse;
use crate::api::state::AppState;
use crate::store::DbStats;

/// GET /health/live
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

/// GET /health/ready
pub async fn readiness(State(state): State<Arc<AppState>>) -> StatusCode {
    match store_stats(&state).await {
        Some(_) => StatusCode::OK,
        None => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// GET /health
pub async fn full_health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let stats = store_stats(&state).await;

    Json(HealthResponse {
        status: if stats.is_some() { "healthy" } else { "unhealthy" }.to_string(),
        store: if stats.is_some() { "ok" } else { "error" }.to_string(),
        stats,
        rules: state.engine.definitions().len(),
        uptime_seconds: state.uptime_seconds(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn store_stats(state: &Arc<AppState>) -> Option<DbStats> {
    let db = Arc::clone(&state.db);
    match tokio::task::spawn_blocking(move || db.stats()).await {
        Ok(Ok(stats)) => Some(stats),
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "Store health check failed");
            None
        }
        Err(e) => {
            tracing::warn!(error = %e, "Store health check panicked");
            None
        }
    }
}
