//! Flag Routes
//!
//! - GET /api/v1/flags - Active flags (observing and open)
//! - GET /api/v1/flags?state=resolved - Flags in one state
//! - GET /api/v1/flags?history=hrv_drop - Every instance of one flag type

use axum::{
    extract::{Query, State},
    Json,
};
use std::sync::Arc;

use crate::api::dto::{FlagParams, FlagsResponse};
use crate::api::error::{ApiError, ApiResult};
use crate::api::routes::with_engine;
use crate::api::state::AppState;
use crate::engine::{FlagState, FlagType};

/// GET /api/v1/flags
pub async fn list_flags(
    State(state): State<Arc<AppState>>,
    Query(params): Query<FlagParams>,
) -> ApiResult<Json<FlagsResponse>> {
    if let Some(raw) = params.history.as_deref() {
        let flag_type = raw.parse::<FlagType>().map_err(ApiError::Validation)?;
        let flags = with_engine(&state, move |engine| engine.flag_history(flag_type)).await?;
        return Ok(Json(flags.into()));
    }

    if let Some(raw) = params.state.as_deref() {
        let wanted = raw.parse::<FlagState>().map_err(ApiError::Validation)?;
        let db = Arc::clone(&state.db);
        let flags = tokio::task::spawn_blocking(move || db.list_flags(Some(wanted)))
            .await
            .map_err(|e| ApiError::Internal(format!("Store task failed: {}", e)))??;
        return Ok(Json(flags.into()));
    }

    let flags = with_engine(&state, |engine| engine.open_flags()).await?;
    Ok(Json(flags.into()))
}
