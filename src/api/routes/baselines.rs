//! Baseline Routes
//!
//! - GET /api/v1/baselines/:metric?date= - Rolling baseline before a date

use axum::{
    extract::{Path, Query, State},
    Json,
};
use std::sync::Arc;

use crate::api::dto::DateParams;
use crate::api::error::{ApiError, ApiResult};
use crate::api::routes::with_engine;
use crate::api::state::AppState;
use crate::engine::BaselineWindow;
use crate::store::Metric;

/// GET /api/v1/baselines/:metric
pub async fn get_baseline(
    State(state): State<Arc<AppState>>,
    Path(metric): Path<String>,
    Query(params): Query<DateParams>,
) -> ApiResult<Json<BaselineWindow>> {
    let metric = metric.parse::<Metric>().map_err(ApiError::NotFound)?;
    let date = params.resolve()?;

    let window = with_engine(&state, move |engine| engine.baseline(metric, date)).await?;
    Ok(Json(window))
}
