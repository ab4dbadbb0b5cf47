//! Report Routes
//!
//! - GET /api/v1/report?date=&cadence= - Structured daily or weekly report

use axum::{
    extract::{Query, State},
    Json,
};
use std::sync::Arc;

use crate::api::dto::{resolve_date, ReportParams};
use crate::api::error::{ApiError, ApiResult};
use crate::api::routes::with_engine;
use crate::api::state::AppState;
use crate::engine::{Report, ReportCadence};

/// GET /api/v1/report
///
/// Read-only: assembles from current store state without evaluating rules.
pub async fn get_report(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ReportParams>,
) -> ApiResult<Json<Report>> {
    let date = resolve_date(params.date.as_deref())?;
    let cadence = match params.cadence.as_deref() {
        Some(raw) => raw.parse::<ReportCadence>().map_err(ApiError::Validation)?,
        None => ReportCadence::Daily,
    };

    let report = with_engine(&state, move |engine| engine.report(date, cadence)).await?;
    Ok(Json(report))
}
