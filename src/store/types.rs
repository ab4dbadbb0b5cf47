//! Core data types for the Vigil record store
//!
//! This module defines the daily biometric records the engine reads:
//! - `CycleRecord`, `RecoveryRecord`, `SleepRecord`, `Workout`: one family each, keyed by date
//! - `DailyRecord`: every family for a single calendar date
//! - `JournalEntry` and `JournalFactor`: self-reported lifestyle factors
//! - `Metric`: identifier for a single numeric series
//! - `DateRange`: an inclusive span of calendar dates

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Physiological cycle for one day (strain and energy expenditure)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CycleRecord {
    pub date: NaiveDate,
    /// Day strain on the 0-21 scale
    pub strain: Option<f64>,
    pub kilojoules: Option<f64>,
    pub avg_heart_rate: Option<i64>,
    pub max_heart_rate: Option<i64>,
}

/// Morning recovery measurement
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecoveryRecord {
    pub date: NaiveDate,
    /// Recovery score, 0-100
    pub recovery_score: Option<f64>,
    /// HRV (RMSSD) in milliseconds
    pub hrv_ms: Option<f64>,
    pub resting_heart_rate: Option<f64>,
    pub spo2: Option<f64>,
    pub skin_temp_celsius: Option<f64>,
}

/// Main sleep of the night ending on `date`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SleepRecord {
    pub date: NaiveDate,
    pub duration_minutes: Option<f64>,
    /// Provider-reported sleep debt, informational only
    pub sleep_debt_minutes: Option<f64>,
    pub performance_pct: Option<f64>,
    pub efficiency_pct: Option<f64>,
    pub respiratory_rate: Option<f64>,
}

/// A single workout
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Workout {
    pub date: NaiveDate,
    pub sport: String,
    pub strain: Option<f64>,
}

/// All record families stored for one calendar date
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DailyRecord {
    pub date: NaiveDate,
    #[serde(default)]
    pub cycle: Option<CycleRecord>,
    #[serde(default)]
    pub recovery: Option<RecoveryRecord>,
    #[serde(default)]
    pub sleep: Option<SleepRecord>,
    #[serde(default)]
    pub workouts: Vec<Workout>,
}

impl DailyRecord {
    /// Create an empty record for a date
    pub fn empty(date: NaiveDate) -> Self {
        Self {
            date,
            cycle: None,
            recovery: None,
            sleep: None,
            workouts: Vec::new(),
        }
    }

    /// True if no family has data for this date
    pub fn is_empty(&self) -> bool {
        self.cycle.is_none()
            && self.recovery.is_none()
            && self.sleep.is_none()
            && self.workouts.is_empty()
    }

    /// Value of a single metric, if recorded
    pub fn value(&self, metric: Metric) -> Option<f64> {
        metric.value_in(self)
    }
}

/// A numeric daily series the engine can baseline
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    RecoveryScore,
    Hrv,
    RestingHeartRate,
    SleepDuration,
    SleepDebt,
    SkinTemp,
    Strain,
}

impl Metric {
    /// All metrics, in report order
    pub fn all() -> &'static [Metric] {
        &[
            Metric::RecoveryScore,
            Metric::Hrv,
            Metric::RestingHeartRate,
            Metric::SleepDuration,
            Metric::SleepDebt,
            Metric::SkinTemp,
            Metric::Strain,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            Metric::RecoveryScore => "recovery_score",
            Metric::Hrv => "hrv",
            Metric::RestingHeartRate => "resting_heart_rate",
            Metric::SleepDuration => "sleep_duration",
            Metric::SleepDebt => "sleep_debt",
            Metric::SkinTemp => "skin_temp",
            Metric::Strain => "strain",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            Metric::RecoveryScore => "%",
            Metric::Hrv => "ms",
            Metric::RestingHeartRate => "bpm",
            Metric::SleepDuration | Metric::SleepDebt => "min",
            Metric::SkinTemp => "°C",
            Metric::Strain => "0-21",
        }
    }

    /// Extract this metric from a daily record
    pub fn value_in(&self, record: &DailyRecord) -> Option<f64> {
        match self {
            Metric::RecoveryScore => record.recovery.as_ref()?.recovery_score,
            Metric::Hrv => record.recovery.as_ref()?.hrv_ms,
            Metric::RestingHeartRate => record.recovery.as_ref()?.resting_heart_rate,
            Metric::SleepDuration => record.sleep.as_ref()?.duration_minutes,
            Metric::SleepDebt => record.sleep.as_ref()?.sleep_debt_minutes,
            Metric::SkinTemp => record.recovery.as_ref()?.skin_temp_celsius,
            Metric::Strain => record.cycle.as_ref()?.strain,
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace(['-', ' '], "_");
        Metric::all()
            .iter()
            .copied()
            .find(|m| m.name() == normalized)
            .or(match normalized.as_str() {
                "recovery" => Some(Metric::RecoveryScore),
                "rhr" => Some(Metric::RestingHeartRate),
                "sleep" => Some(Metric::SleepDuration),
                "temp" | "skin_temperature" => Some(Metric::SkinTemp),
                _ => None,
            })
            .ok_or_else(|| format!("Unknown metric: {}", s))
    }
}

/// Evening journal entry for one date
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JournalEntry {
    pub date: NaiveDate,
    pub alcohol_units: Option<u32>,
    /// Self-reported stress, 1-5
    pub stress_level: Option<u8>,
    pub caffeine: Option<bool>,
    /// Caffeine after 2pm
    pub late_caffeine: Option<bool>,
    pub notes: Option<String>,
}

impl JournalEntry {
    /// Create an entry with no answers recorded
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            alcohol_units: None,
            stress_level: None,
            caffeine: None,
            late_caffeine: None,
            notes: None,
        }
    }

    /// Builder method: set alcohol units
    pub fn alcohol(mut self, units: u32) -> Self {
        self.alcohol_units = Some(units);
        self
    }

    /// Builder method: set stress level
    pub fn stress(mut self, level: u8) -> Self {
        self.stress_level = Some(level);
        self
    }

    /// Builder method: set late caffeine
    pub fn late_caffeine(mut self, late: bool) -> Self {
        self.late_caffeine = Some(late);
        self
    }
}

/// A lifestyle factor derived from a journal entry
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JournalFactor {
    Alcohol,
    HighStress,
    LateCaffeine,
}

impl JournalFactor {
    pub fn all() -> &'static [JournalFactor] {
        &[
            JournalFactor::Alcohol,
            JournalFactor::HighStress,
            JournalFactor::LateCaffeine,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            JournalFactor::Alcohol => "alcohol",
            JournalFactor::HighStress => "high_stress",
            JournalFactor::LateCaffeine => "late_caffeine",
        }
    }

    /// Whether the factor was present on this entry.
    ///
    /// Returns `None` when the entry did not answer the relevant question.
    pub fn present_in(&self, entry: &JournalEntry, stress_threshold: u8) -> Option<bool> {
        match self {
            JournalFactor::Alcohol => entry.alcohol_units.map(|u| u > 0),
            JournalFactor::HighStress => entry.stress_level.map(|s| s >= stress_threshold),
            JournalFactor::LateCaffeine => entry.late_caffeine,
        }
    }
}

impl fmt::Display for JournalFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Inclusive range of calendar dates
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// Create a new range (start and end inclusive)
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// The `days` dates ending at `end`, inclusive
    pub fn trailing(end: NaiveDate, days: u32) -> Self {
        let days = days.max(1) as i64;
        Self {
            start: end - Duration::days(days - 1),
            end,
        }
    }

    /// The `days` dates strictly before `reference`
    pub fn before(reference: NaiveDate, days: u32) -> Self {
        Self::trailing(reference - Duration::days(1), days)
    }

    /// Check if a date falls inside the range
    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }

    /// Number of calendar days covered (0 if start > end)
    pub fn len_days(&self) -> i64 {
        ((self.end - self.start).num_days() + 1).max(0)
    }

    /// Iterate every date in the range
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        let start = self.start;
        (0..self.len_days()).map(move |offset| start + Duration::days(offset))
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}
