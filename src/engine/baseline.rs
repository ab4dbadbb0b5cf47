//! Baseline Calculator
//!
//! Rolling personal baselines over the trailing window strictly before a
//! reference date. The reference day never contributes to its own baseline.

use crate::config::BaselineConfig;
use crate::store::{DateRange, Metric, RecordSource, StoreResult};
use chrono::NaiveDate;
use serde::Serialize;
use std::sync::Arc;

/// Whether a window holds enough samples to compare against
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BaselineStatus {
    Sufficient,
    Insufficient,
}

/// Rolling statistics for one metric, ending the day before `reference_date`
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BaselineWindow {
    pub metric: Metric,
    pub reference_date: NaiveDate,
    /// Dates the window covers (reference date excluded)
    pub window: DateRange,
    pub sample_count: usize,
    /// `None` when the window is insufficient
    pub mean: Option<f64>,
    /// Sample standard deviation (N-1); `None` when insufficient
    pub std_dev: Option<f64>,
    pub status: BaselineStatus,
}

impl BaselineWindow {
    /// Build a window from the present samples in date order.
    ///
    /// Missing days are simply absent from `samples`; nothing is imputed.
    pub fn from_samples(
        metric: Metric,
        reference_date: NaiveDate,
        window_days: u32,
        min_samples: usize,
        samples: &[f64],
    ) -> Self {
        let samples = if samples.len() > window_days as usize {
            &samples[samples.len() - window_days as usize..]
        } else {
            samples
        };

        let sufficient = samples.len() >= min_samples && !samples.is_empty();
        let (mean, std_dev, status) = if sufficient {
            (
                mean(samples),
                sample_std_dev(samples),
                BaselineStatus::Sufficient,
            )
        } else {
            (None, None, BaselineStatus::Insufficient)
        };

        Self {
            metric,
            reference_date,
            window: DateRange::before(reference_date, window_days),
            sample_count: samples.len(),
            mean,
            std_dev,
            status,
        }
    }

    pub fn is_sufficient(&self) -> bool {
        self.status == BaselineStatus::Sufficient && self.mean.is_some()
    }

    /// `(value - mean) / mean`, e.g. -0.15 for "15% below baseline"
    pub fn percent_deviation(&self, value: f64) -> Option<f64> {
        let mean = self.mean.filter(|_| self.is_sufficient())?;
        if mean == 0.0 {
            return None;
        }
        Some((value - mean) / mean)
    }

    /// `value - mean`
    pub fn delta(&self, value: f64) -> Option<f64> {
        self.mean
            .filter(|_| self.is_sufficient())
            .map(|mean| value - mean)
    }
}

/// Arithmetic mean
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample standard deviation with an N-1 denominator
///
/// A single sample has no spread to estimate and yields 0.
pub fn sample_std_dev(values: &[f64]) -> Option<f64> {
    let avg = mean(values)?;
    if values.len() < 2 {
        return Some(0.0);
    }
    let sum_sq: f64 = values.iter().map(|v| (v - avg).powi(2)).sum();
    Some((sum_sq / (values.len() - 1) as f64).sqrt())
}

/// Computes baselines from the record store
#[derive(Clone)]
pub struct BaselineCalculator {
    records: Arc<dyn RecordSource>,
    window_days: u32,
    min_samples: usize,
}

impl BaselineCalculator {
    /// Create a new calculator
    pub fn new(records: Arc<dyn RecordSource>, config: &BaselineConfig) -> Self {
        Self {
            records,
            window_days: config.window_days,
            min_samples: config.min_samples,
        }
    }

    pub fn window_days(&self) -> u32 {
        self.window_days
    }

    pub fn min_samples(&self) -> usize {
        self.min_samples
    }

    /// Baseline for one metric over the trailing window before `reference`
    pub fn compute(&self, metric: Metric, reference: NaiveDate) -> StoreResult<BaselineWindow> {
        let range = DateRange::before(reference, self.window_days);
        let samples: Vec<f64> = self
            .records
            .series(metric, range)?
            .into_iter()
            .map(|(_, v)| v)
            .collect();

        let window = BaselineWindow::from_samples(
            metric,
            reference,
            self.window_days,
            self.min_samples,
            &samples,
        );

        tracing::debug!(
            metric = %metric,
            reference = %reference,
            samples = window.sample_count,
            sufficient = window.is_sufficient(),
            "Computed baseline"
        );

        Ok(window)
    }

    /// Baselines for every metric, in `Metric::all()` order
    pub fn compute_all(&self, reference: NaiveDate) -> StoreResult<Vec<BaselineWindow>> {
        Metric::all()
            .iter()
            .map(|&metric| self.compute(metric, reference))
            .collect()
    }
}
