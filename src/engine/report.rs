//! Report Assembler
//!
//! Selection and ordering only: the day's record, every baseline, the open
//! flags (oldest first) and, on the weekly cadence, journal correlations and
//! the week's trends against the four weeks before it.

use crate::engine::baseline::{mean, BaselineCalculator, BaselineWindow};
use crate::engine::correlation::{CorrelationAnalyzer, CorrelationResult};
use crate::engine::lifecycle::{FlagInstance, FlagState, FlagStore};
use crate::store::{DailyRecord, DateRange, Metric, RecordSource, StoreResult};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Days in the reported week, ending on the report date
pub const WEEK_DAYS: u32 = 7;

/// Weeks of history the reported week is compared against
pub const PRIOR_WEEKS: u32 = 4;

const TREND_METRICS: [Metric; 5] = [
    Metric::Hrv,
    Metric::RecoveryScore,
    Metric::RestingHeartRate,
    Metric::SleepDuration,
    Metric::Strain,
];

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReportCadence {
    Daily,
    Weekly,
}

impl ReportCadence {
    pub fn includes_correlations(&self) -> bool {
        matches!(self, ReportCadence::Weekly)
    }
}

impl fmt::Display for ReportCadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportCadence::Daily => write!(f, "daily"),
            ReportCadence::Weekly => write!(f, "weekly"),
        }
    }
}

impl FromStr for ReportCadence {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "daily" => Ok(ReportCadence::Daily),
            "weekly" => Ok(ReportCadence::Weekly),
            other => Err(format!("Unknown cadence: {}", other)),
        }
    }
}

/// Structured report handed to delivery and summarization
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub date: NaiveDate,
    pub cadence: ReportCadence,
    pub generated_at: DateTime<Utc>,
    /// `None` when nothing was recorded for the date
    pub today: Option<DailyRecord>,
    pub baselines: Vec<BaselineWindow>,
    /// Open flags, oldest first
    pub open_flags: Vec<FlagInstance>,
    /// Weekly cadence only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlations: Option<Vec<CorrelationResult>>,
    /// Weekly cadence only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weekly: Option<WeeklySummary>,
}

/// Mean of one metric over the week against the prior weeks
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MetricTrend {
    pub metric: Metric,
    pub week_mean: Option<f64>,
    pub week_samples: usize,
    pub prior_mean: Option<f64>,
    pub prior_samples: usize,
    /// Week mean minus prior mean
    pub change: Option<f64>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct WorkoutSummary {
    pub sport: String,
    pub sessions: usize,
    pub total_strain: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct WeeklySummary {
    pub week: DateRange,
    pub prior: DateRange,
    pub trends: Vec<MetricTrend>,
    /// Workouts in the week grouped by sport, most sessions first
    pub workouts: Vec<WorkoutSummary>,
    /// Provider-reported sleep debt on the last night of the week that has one
    pub ending_sleep_debt: Option<f64>,
}

impl WeeklySummary {
    /// Summarize the week ending on `date` from records covering it and the
    /// prior weeks. Records outside both windows are ignored.
    pub fn from_records(date: NaiveDate, records: &[DailyRecord]) -> Self {
        let week = DateRange::trailing(date, WEEK_DAYS);
        let prior = DateRange::before(week.start, WEEK_DAYS * PRIOR_WEEKS);

        let values = |metric: Metric, range: DateRange| -> Vec<f64> {
            records
                .iter()
                .filter(|r| range.contains(r.date))
                .filter_map(|r| r.value(metric))
                .collect()
        };

        let trends = TREND_METRICS
            .iter()
            .map(|&metric| {
                let this_week = values(metric, week);
                let before = values(metric, prior);
                let week_mean = mean(&this_week);
                let prior_mean = mean(&before);
                MetricTrend {
                    metric,
                    week_mean,
                    week_samples: this_week.len(),
                    prior_mean,
                    prior_samples: before.len(),
                    change: week_mean.zip(prior_mean).map(|(w, p)| w - p),
                }
            })
            .collect();

        let mut by_sport: BTreeMap<&str, (usize, f64)> = BTreeMap::new();
        for workout in records
            .iter()
            .filter(|r| week.contains(r.date))
            .flat_map(|r| r.workouts.iter())
        {
            let entry = by_sport.entry(workout.sport.as_str()).or_default();
            entry.0 += 1;
            entry.1 += workout.strain.unwrap_or(0.0);
        }
        let mut workouts: Vec<WorkoutSummary> = by_sport
            .into_iter()
            .map(|(sport, (sessions, total_strain))| WorkoutSummary {
                sport: sport.to_string(),
                sessions,
                total_strain,
            })
            .collect();
        workouts.sort_by(|a, b| b.sessions.cmp(&a.sessions));

        let ending_sleep_debt = records
            .iter()
            .filter(|r| week.contains(r.date))
            .filter_map(|r| r.value(Metric::SleepDebt).map(|debt| (r.date, debt)))
            .max_by_key(|(d, _)| *d)
            .map(|(_, debt)| debt);

        Self {
            week,
            prior,
            trends,
            workouts,
            ending_sleep_debt,
        }
    }

    pub fn trend(&self, metric: Metric) -> Option<&MetricTrend> {
        self.trends.iter().find(|t| t.metric == metric)
    }
}

/// Builds reports from the stores
pub struct ReportAssembler {
    records: Arc<dyn RecordSource>,
    flags: Arc<dyn FlagStore>,
    baselines: BaselineCalculator,
    correlations: CorrelationAnalyzer,
}

impl ReportAssembler {
    pub fn new(
        records: Arc<dyn RecordSource>,
        flags: Arc<dyn FlagStore>,
        baselines: BaselineCalculator,
        correlations: CorrelationAnalyzer,
    ) -> Self {
        Self {
            records,
            flags,
            baselines,
            correlations,
        }
    }

    pub fn assemble(&self, date: NaiveDate, cadence: ReportCadence) -> StoreResult<Report> {
        let today = Some(self.records.day(date)?).filter(|r| !r.is_empty());
        let baselines = self.baselines.compute_all(date)?;

        let mut open_flags: Vec<FlagInstance> = self
            .flags
            .open_flags()?
            .into_iter()
            .filter(|f| f.state == FlagState::Open)
            .collect();
        open_flags.sort_by_key(|f| (f.first_triggered_date, f.flag_type));

        let (correlations, weekly) = if cadence.includes_correlations() {
            let span_days = WEEK_DAYS * (PRIOR_WEEKS + 1);
            let history = self.records.range(DateRange::trailing(date, span_days))?;
            (
                Some(self.correlations.analyze(date)?),
                Some(WeeklySummary::from_records(date, &history)),
            )
        } else {
            (None, None)
        };

        tracing::info!(
            date = %date,
            cadence = %cadence,
            open_flags = open_flags.len(),
            "Assembled report"
        );

        Ok(Report {
            date,
            cadence,
            generated_at: Utc::now(),
            today,
            baselines,
            open_flags,
            correlations,
            weekly,
        })
    }
}
