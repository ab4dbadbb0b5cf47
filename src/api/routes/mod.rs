//! API Routes
//!
//! Route handlers organized by functionality. Engine calls hit SQLite
//! synchronously, so they run on the blocking pool.

pub mod baselines;
pub mod correlations;
pub mod evaluate;
pub mod flags;
pub mod health;
pub mod report;

use std::sync::Arc;

use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::engine::{Engine, EngineResult};

/// Run an engine call off the async runtime
pub(crate) async fn with_engine<F, T>(state: &Arc<AppState>, f: F) -> ApiResult<T>
where
    F: FnOnce(&Engine) -> EngineResult<T> + Send + 'static,
    T: Send + 'static,
{
    let engine = Arc::clone(&state.engine);
    tokio::task::spawn_blocking(move || f(&engine))
        .await
        .map_err(|e| ApiError::Internal(format!("Engine task failed: {}", e)))?
        .map_err(ApiError::from)
}
