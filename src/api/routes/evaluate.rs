//! Evaluation Routes
//!
//! - POST /api/v1/evaluate?date= - Evaluate every rule for a date

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use crate::api::dto::DateParams;
use crate::api::error::ApiResult;
use crate::api::routes::with_engine;
use crate::api::state::AppState;
use crate::engine::EvaluationPass;

/// POST /api/v1/evaluate
///
/// Safe to repeat for the same date: a second call emits no events.
/// Responds 207 when some rules failed to persist.
pub async fn evaluate(
    State(state): State<Arc<AppState>>,
    Query(params): Query<DateParams>,
) -> ApiResult<(StatusCode, Json<EvaluationPass>)> {
    let date = params.resolve()?;
    let pass = with_engine(&state, move |engine| engine.evaluate(date)).await?;

    let status = if pass.is_clean() {
        StatusCode::OK
    } else {
        StatusCode::MULTI_STATUS
    };
    Ok((status, Json(pass)))
}
