//! Vigil REST API
//!
//! Read access to reports, flags, baselines and correlations, plus an
//! on-demand evaluation trigger. Built with Axum.
//!
//! # Endpoints
//!
//! ## Engine
//! - `GET /api/v1/report?date=&cadence=` - Structured report
//! - `POST /api/v1/evaluate?date=` - Evaluate every rule for a date
//! - `GET /api/v1/flags` - Active flags (`?state=` or `?history=<flag_type>`)
//! - `GET /api/v1/baselines/:metric?date=` - Rolling baseline
//! - `GET /api/v1/correlations?date=` - Journal factor effects
//!
//! ## Health
//! - `GET /health/live` - Liveness probe
//! - `GET /health/ready` - Readiness probe
//! - `GET /health` - Full health status
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use vigil::api::{serve, AppState};
//! use vigil::config::Config;
//! use vigil::engine::Engine;
//! use vigil::store::Database;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load_default();
//!     let db = Arc::new(Database::open(&config.storage.data_dir_path())?);
//!     let engine = Arc::new(Engine::new(db.clone(), &config)?);
//!
//!     serve(AppState::new(engine, db), &config.api).await?;
//!     Ok(())
//! }
//! ```

pub mod dto;
pub mod error;
pub mod routes;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use state::AppState;

use axum::{
    http::{HeaderValue, Method},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

use crate::config::ApiConfig;

/// Build the API router with all routes and middleware
pub fn build_router(state: AppState, config: &ApiConfig) -> Router {
    let api_routes = Router::new()
        .route("/report", get(routes::report::get_report))
        .route("/evaluate", post(routes::evaluate::evaluate))
        .route("/flags", get(routes::flags::list_flags))
        .route("/baselines/:metric", get(routes::baselines::get_baseline))
        .route("/correlations", get(routes::correlations::get_correlations));

    let health_routes = Router::new()
        .route("/live", get(routes::health::liveness))
        .route("/ready", get(routes::health::readiness))
        .route("/", get(routes::health::full_health));

    let shared_state = Arc::new(state);

    Router::new()
        .nest("/api/v1", api_routes)
        .nest("/health", health_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&config.cors_origins))
        .with_state(shared_state)
}

/// Permissive when no origins are configured
fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::permissive();
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
}

/// Start the API server
pub async fn serve(state: AppState, config: &ApiConfig) -> Result<(), ApiError> {
    let router = build_router(state, config);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Vigil API listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| ApiError::Internal(format!("Server error: {}", e)))?;

    tracing::info!("Vigil API shut down gracefully");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::engine::Engine;
    use crate::store::{Database, DailyRecord, RecoveryRecord};
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use chrono::{Duration, NaiveDate};
    use tower::util::ServiceExt;

    fn create_test_app() -> (Router, Arc<Database>) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let engine = Arc::new(Engine::new(db.clone(), &Config::default()).unwrap());
        let router = build_router(AppState::new(engine, db.clone()), &ApiConfig::default());
        (router, db)
    }

    fn seed_hrv(db: &Database, start: NaiveDate, values: &[f64]) {
        for (i, &hrv) in values.iter().enumerate() {
            let date = start + Duration::days(i as i64);
            let mut record = DailyRecord::empty(date);
            record.recovery = Some(RecoveryRecord {
                date,
                recovery_score: None,
                hrv_ms: Some(hrv),
                resting_heart_rate: None,
                spo2: None,
                skin_temp_celsius: None,
            });
            db.upsert_day(&record).unwrap();
        }
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        send(app, Request::builder().uri(uri).body(Body::empty()).unwrap()).await
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    #[tokio::test]
    async fn test_health_endpoints() {
        let (app, _db) = create_test_app();

        let (status, _) = get(app.clone(), "/health/live").await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = get(app.clone(), "/health/ready").await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = get(app, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["rules"], 5);
    }

    #[tokio::test]
    async fn test_report_defaults_to_daily() {
        let (app, _db) = create_test_app();

        let (status, body) = get(app.clone(), "/api/v1/report?date=2024-01-15").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["cadence"], "daily");
        assert!(body.get("correlations").is_none());

        let (status, body) = get(app, "/api/v1/report?date=2024-01-15&cadence=weekly").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["correlations"].is_array());
    }

    #[tokio::test]
    async fn test_bad_parameters_rejected() {
        let (app, _db) = create_test_app();

        let (status, body) = get(app.clone(), "/api/v1/report?date=yesterday").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

        let (status, _) = get(app.clone(), "/api/v1/report?cadence=monthly").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = get(app.clone(), "/api/v1/baselines/steps").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = get(app, "/api/v1/flags?history=bogus").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_evaluate_opens_flag() {
        let (app, db) = create_test_app();
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let mut values = vec![50.0; 14];
        values.extend([40.0, 40.0, 40.0]);
        seed_hrv(&db, start, &values);

        let mut opened = 0;
        for day in ["2024-01-15", "2024-01-16", "2024-01-17"] {
            let request = Request::builder()
                .method("POST")
                .uri(format!("/api/v1/evaluate?date={}", day))
                .body(Body::empty())
                .unwrap();
            let (status, body) = send(app.clone(), request).await;
            assert_eq!(status, StatusCode::OK);
            opened += body["events"].as_array().unwrap().len();
        }
        assert_eq!(opened, 1);

        let (status, body) = get(app.clone(), "/api/v1/flags").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 1);
        assert_eq!(body["flags"][0]["flag_type"], "hrv_drop");
        assert_eq!(body["flags"][0]["state"], "open");

        let (_, body) = get(app.clone(), "/api/v1/flags?history=hrv_drop").await;
        assert_eq!(body["count"], 1);

        let (_, body) = get(app.clone(), "/api/v1/flags?state=resolved").await;
        assert_eq!(body["count"], 0);

        let (status, body) = get(app, "/api/v1/baselines/hrv?date=2024-01-15").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["sample_count"], 14);
        assert_eq!(body["mean"], 50.0);
    }

    #[tokio::test]
    async fn test_correlations_empty_store() {
        let (app, _db) = create_test_app();

        let (status, body) = get(app, "/api/v1/correlations?date=2024-01-15").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["sufficient"], 0);
        assert!(!body["correlations"].as_array().unwrap().is_empty());
    }
}
