//! Data Transfer Objects
//!
//! Query parameters and response envelopes. Engine types serialize directly.

use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::api::error::{ApiError, ApiResult};
use crate::engine::{CorrelationResult, FlagInstance};
use crate::store::DbStats;

/// `?date=YYYY-MM-DD`, defaulting to today
#[derive(Debug, Default, Deserialize)]
pub struct DateParams {
    pub date: Option<String>,
}

impl DateParams {
    pub fn resolve(&self) -> ApiResult<NaiveDate> {
        resolve_date(self.date.as_deref())
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ReportParams {
    pub date: Option<String>,
    /// "daily" (default) or "weekly"
    pub cadence: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct FlagParams {
    /// Return every instance of this flag type instead of the active ones
    pub history: Option<String>,
    /// Filter by state: observing, open or resolved
    pub state: Option<String>,
}

pub fn resolve_date(raw: Option<&str>) -> ApiResult<NaiveDate> {
    match raw {
        Some(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map_err(|_| ApiError::Validation(format!("date must be YYYY-MM-DD, got {:?}", s))),
        None => Ok(Local::now().date_naive()),
    }
}

#[derive(Debug, Serialize)]
pub struct FlagsResponse {
    pub flags: Vec<FlagInstance>,
    pub count: usize,
}

impl From<Vec<FlagInstance>> for FlagsResponse {
    fn from(flags: Vec<FlagInstance>) -> Self {
        Self {
            count: flags.len(),
            flags,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CorrelationsResponse {
    pub date: NaiveDate,
    /// Results with enough samples on both sides
    pub sufficient: usize,
    pub correlations: Vec<CorrelationResult>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub store: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<DbStats>,
    pub rules: usize,
    pub uptime_seconds: u64,
    pub version: String,
}
