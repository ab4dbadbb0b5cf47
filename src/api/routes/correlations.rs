//! Correlation Routes
//!
//! - GET /api/v1/correlations?date= - Journal factor effects over the lookback

use axum::{
    extract::{Query, State},
    Json,
};
use std::sync::Arc;

use crate::api::dto::{CorrelationsResponse, DateParams};
use crate::api::error::ApiResult;
use crate::api::routes::with_engine;
use crate::api::state::AppState;

/// GET /api/v1/correlations
pub async fn get_correlations(
    State(state): State<Arc<AppState>>,
    Query(params): Query<DateParams>,
) -> ApiResult<Json<CorrelationsResponse>> {
    let date = params.resolve()?;
    let correlations = with_engine(&state, move |engine| engine.correlations(date)).await?;

    Ok(Json(CorrelationsResponse {
        date,
        sufficient: correlations.iter().filter(|c| c.is_sufficient()).count(),
        correlations,
    }))
}
