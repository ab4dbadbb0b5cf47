//! Correlation Analyzer
//!
//! Splits days into "factor present" and "factor absent" using the journal
//! entry at lag 0 (same day) or lag 1 (previous evening), then compares the
//! median metric value in each group. The output is a labeled numeric delta
//! with partition sizes, nothing more.

use crate::config::CorrelationConfig;
use crate::store::{
    DailyRecord, DateRange, JournalEntry, JournalFactor, Metric, RecordSource, StoreResult,
};
use chrono::{Duration, NaiveDate};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Metrics compared against journal factors
pub const CORRELATED_METRICS: &[Metric] = &[
    Metric::Hrv,
    Metric::RecoveryScore,
    Metric::SleepDuration,
    Metric::RestingHeartRate,
];

/// Journal-to-metric offsets, in days
pub const LAGS: &[u32] = &[0, 1];

/// Median of the values, averaging the middle pair for even counts
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Sample count and median for one side of the split
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PartitionSummary {
    pub count: usize,
    pub median: Option<f64>,
}

impl PartitionSummary {
    fn from_values(values: &[f64]) -> Self {
        Self {
            count: values.len(),
            median: median(values),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationStatus {
    Sufficient,
    Insufficient,
}

/// Direction of the median difference, present relative to absent
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EffectDirection {
    Higher,
    Lower,
    Unchanged,
}

impl EffectDirection {
    fn of(delta: f64) -> Self {
        if delta > 0.0 {
            EffectDirection::Higher
        } else if delta < 0.0 {
            EffectDirection::Lower
        } else {
            EffectDirection::Unchanged
        }
    }
}

/// Effect of one factor on one metric at one lag
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CorrelationResult {
    pub factor: JournalFactor,
    pub metric: Metric,
    pub lag_days: u32,
    pub present: PartitionSummary,
    pub absent: PartitionSummary,
    /// Present median minus absent median; `None` when insufficient
    pub median_delta: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<EffectDirection>,
    pub status: CorrelationStatus,
}

impl CorrelationResult {
    pub fn is_sufficient(&self) -> bool {
        self.status == CorrelationStatus::Sufficient
    }
}

/// Inputs for `correlate`, independent of where the rows came from
pub struct CorrelationInput<'a> {
    /// Dates whose metric values are considered
    pub window: DateRange,
    pub records: &'a [DailyRecord],
    /// Must cover `window` shifted back by the largest lag
    pub journal: &'a [JournalEntry],
    pub stress_threshold: u8,
    pub min_partition: usize,
}

/// Compute every (factor, metric, lag) result, strongest sufficient first
pub fn correlate(input: &CorrelationInput<'_>) -> Vec<CorrelationResult> {
    let records: HashMap<NaiveDate, &DailyRecord> =
        input.records.iter().map(|r| (r.date, r)).collect();
    let journal: HashMap<NaiveDate, &JournalEntry> =
        input.journal.iter().map(|e| (e.date, e)).collect();

    let mut results = Vec::new();

    for &factor in JournalFactor::all() {
        for &metric in CORRELATED_METRICS {
            for &lag in LAGS {
                let mut present = Vec::new();
                let mut absent = Vec::new();

                for day in input.window.days() {
                    let Some(value) = records.get(&day).and_then(|r| r.value(metric)) else {
                        continue;
                    };
                    let journal_day = day - Duration::days(lag as i64);
                    let Some(flag) = journal
                        .get(&journal_day)
                        .and_then(|e| factor.present_in(e, input.stress_threshold))
                    else {
                        continue;
                    };
                    if flag {
                        present.push(value);
                    } else {
                        absent.push(value);
                    }
                }

                let present = PartitionSummary::from_values(&present);
                let absent = PartitionSummary::from_values(&absent);
                let sufficient =
                    present.count >= input.min_partition && absent.count >= input.min_partition;

                let median_delta = match (sufficient, present.median, absent.median) {
                    (true, Some(p), Some(a)) => Some(p - a),
                    _ => None,
                };

                results.push(CorrelationResult {
                    factor,
                    metric,
                    lag_days: lag,
                    present,
                    absent,
                    median_delta,
                    direction: median_delta.map(EffectDirection::of),
                    status: if sufficient {
                        CorrelationStatus::Sufficient
                    } else {
                        CorrelationStatus::Insufficient
                    },
                });
            }
        }
    }

    results.sort_by(|a, b| {
        b.is_sufficient().cmp(&a.is_sufficient()).then_with(|| {
            let a_abs = a.median_delta.map(f64::abs).unwrap_or(0.0);
            let b_abs = b.median_delta.map(f64::abs).unwrap_or(0.0);
            b_abs.total_cmp(&a_abs)
        })
    });

    results
}

/// Reads the journal and records and runs `correlate`
#[derive(Clone)]
pub struct CorrelationAnalyzer {
    records: Arc<dyn RecordSource>,
    lookback_days: u32,
    min_partition: usize,
    stress_threshold: u8,
}

impl CorrelationAnalyzer {
    /// Create a new analyzer
    pub fn new(records: Arc<dyn RecordSource>, config: &CorrelationConfig) -> Self {
        Self {
            records,
            lookback_days: config.lookback_days,
            min_partition: config.min_partition,
            stress_threshold: config.stress_threshold,
        }
    }

    /// Correlations over the `lookback_days` ending at `reference`, inclusive
    pub fn analyze(&self, reference: NaiveDate) -> StoreResult<Vec<CorrelationResult>> {
        let window = DateRange::trailing(reference, self.lookback_days);
        let max_lag = LAGS.iter().copied().max().unwrap_or(0) as i64;
        let journal_range = DateRange::new(window.start - Duration::days(max_lag), window.end);

        let records = self.records.range(window)?;
        let journal = self.records.journal(journal_range)?;

        let results = correlate(&CorrelationInput {
            window,
            records: &records,
            journal: &journal,
            stress_threshold: self.stress_threshold,
            min_partition: self.min_partition,
        });

        tracing::debug!(
            window = %window,
            journal_entries = journal.len(),
            sufficient = results.iter().filter(|r| r.is_sufficient()).count(),
            "Computed journal correlations"
        );

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Database, RecoveryRecord};

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn hrv_day(d: NaiveDate, hrv: f64) -> DailyRecord {
        let mut record = DailyRecord::empty(d);
        record.recovery = Some(RecoveryRecord {
            date: d,
            recovery_score: None,
            hrv_ms: Some(hrv),
            resting_heart_rate: None,
            spo2: None,
            skin_temp_celsius: None,
        });
        record
    }

    /// Seven days: alcohol on three of them
    fn alcohol_week() -> (DateRange, Vec<DailyRecord>, Vec<JournalEntry>) {
        let end = date("2024-07-07");
        let window = DateRange::trailing(end, 7);
        let plan = [
            (true, 40.0),
            (false, 55.0),
            (true, 38.0),
            (false, 58.0),
            (false, 52.0),
            (true, 41.0),
            (false, 60.0),
        ];
        let mut records = Vec::new();
        let mut journal = Vec::new();
        for (day, (alcohol, hrv)) in window.days().zip(plan) {
            records.push(hrv_day(day, hrv));
            journal.push(JournalEntry::new(day).alcohol(if alcohol { 2 } else { 0 }));
        }
        (window, records, journal)
    }

    fn find(
        results: &[CorrelationResult],
        factor: JournalFactor,
        metric: Metric,
        lag: u32,
    ) -> CorrelationResult {
        results
            .iter()
            .find(|r| r.factor == factor && r.metric == metric && r.lag_days == lag)
            .cloned()
            .unwrap()
    }

    #[test]
    fn test_median() {
        assert_eq!(median(&[]), None);
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[55.0, 58.0, 52.0, 60.0]), Some(56.5));
    }

    #[test]
    fn test_alcohol_same_day_hrv() {
        let (window, records, journal) = alcohol_week();
        let results = correlate(&CorrelationInput {
            window,
            records: &records,
            journal: &journal,
            stress_threshold: 4,
            min_partition: 3,
        });

        let r = find(&results, JournalFactor::Alcohol, Metric::Hrv, 0);
        assert!(r.is_sufficient());
        assert_eq!((r.present.count, r.absent.count), (3, 4));
        assert_eq!(r.present.median, Some(40.0));
        assert_eq!(r.absent.median, Some(56.5));
        assert_eq!(r.median_delta, Some(-16.5));
        assert_eq!(r.direction, Some(EffectDirection::Lower));

        // The strongest sufficient result sorts first
        assert!(results[0].is_sufficient());
        assert_eq!(results[0].factor, JournalFactor::Alcohol);
    }

    #[test]
    fn test_unanswered_factor_is_insufficient() {
        let (window, records, journal) = alcohol_week();
        let results = correlate(&CorrelationInput {
            window,
            records: &records,
            journal: &journal,
            stress_threshold: 4,
            min_partition: 3,
        });

        // No entry recorded stress at all
        let r = find(&results, JournalFactor::HighStress, Metric::Hrv, 0);
        assert_eq!(r.status, CorrelationStatus::Insufficient);
        assert_eq!((r.present.count, r.absent.count), (0, 0));
        assert_eq!(r.median_delta, None);

        // No recovery score in the records
        let r = find(&results, JournalFactor::Alcohol, Metric::RecoveryScore, 0);
        assert!(!r.is_sufficient());
    }

    #[test]
    fn test_lag_one_pairs_previous_evening() {
        let (window, records, journal) = alcohol_week();
        let results = correlate(&CorrelationInput {
            window,
            records: &records,
            journal: &journal,
            stress_threshold: 4,
            min_partition: 3,
        });

        // First day has no previous journal in the slice, so six pairs remain
        let r = find(&results, JournalFactor::Alcohol, Metric::Hrv, 1);
        assert_eq!(r.present.count + r.absent.count, 6);
        // Day after alcohol: 55, 58, 60
        assert_eq!(r.present.count, 3);
        assert_eq!(r.present.median, Some(58.0));
    }

    #[test]
    fn test_analyze_reads_store() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let (_, records, journal) = alcohol_week();
        for record in &records {
            db.upsert_day(record).unwrap();
        }
        for entry in &journal {
            db.upsert_journal(entry).unwrap();
        }

        let analyzer = CorrelationAnalyzer::new(db, &CorrelationConfig::default());
        let results = analyzer.analyze(date("2024-07-07")).unwrap();
        let r = find(&results, JournalFactor::Alcohol, Metric::Hrv, 0);
        assert_eq!(r.median_delta, Some(-16.5));
        assert_eq!(
            results.len(),
            JournalFactor::all().len() * CORRELATED_METRICS.len() * LAGS.len()
        );
    }
}
