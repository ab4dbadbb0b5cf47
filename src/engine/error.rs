//! Engine error types
//!
//! The first two kinds are handled locally (logged, rule skipped for the day).
//! Conflicts are retried per rule; only exhausted retries reach the caller.

use crate::engine::rules::FlagType;
use crate::store::{Metric, StoreError};
use chrono::NaiveDate;
use thiserror::Error;

/// Errors that can occur while evaluating flags or assembling reports
#[derive(Error, Debug)]
pub enum EngineError {
    /// Baseline window has too few samples to compare against
    #[error("Insufficient baseline data for {metric}: {samples} samples, need {required}")]
    InsufficientBaselineData {
        metric: Metric,
        samples: usize,
        required: usize,
    },

    /// No record for the metric on the evaluated date
    #[error("Missing {metric} record on {date}")]
    MissingRecordGap { metric: Metric, date: NaiveDate },

    /// Another writer kept changing the flag row
    #[error("Persistence conflict on {flag_type} after {attempts} attempts")]
    PersistenceConflict { flag_type: FlagType, attempts: u32 },

    /// Configuration rejected at startup
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Store read or write failed
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl EngineError {
    /// Whether re-running the same evaluation may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::PersistenceConflict { .. } | EngineError::Store(_)
        )
    }

    /// Whether the error only means "no signal today"
    pub fn is_skip(&self) -> bool {
        matches!(
            self,
            EngineError::InsufficientBaselineData { .. } | EngineError::MissingRecordGap { .. }
        )
    }
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngineError::InsufficientBaselineData {
            metric: Metric::Hrv,
            samples: 4,
            required: 7,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient baseline data for hrv: 4 samples, need 7"
        );
        assert!(err.is_skip());
        assert!(!err.is_retryable());

        let err = EngineError::PersistenceConflict {
            flag_type: FlagType::SleepDebt,
            attempts: 4,
        };
        assert_eq!(
            err.to_string(),
            "Persistence conflict on sleep_debt after 4 attempts"
        );
        assert!(err.is_retryable());
    }

    #[test]
    fn test_store_error_conversion() {
        let store_err = StoreError::Lock("poisoned".to_string());
        let err: EngineError = store_err.into();
        assert!(matches!(err, EngineError::Store(_)));
        assert!(err.is_retryable());
    }
}
