//! Flag rules
//!
//! One `FlagDefinition` per rule type: the trigger predicate with its
//! thresholds, plus the lifecycle counts (minimum streak, cooldown, gap
//! tolerance). Predicates only look at a single day against its baseline and
//! return an `Observation`; streak bookkeeping lives in `lifecycle`.

use crate::config::FlagsConfig;
use crate::engine::baseline::BaselineWindow;
use crate::engine::error::EngineError;
use crate::store::{DailyRecord, Metric};
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The rule types the engine knows about
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum FlagType {
    HrvDrop,
    RecoveryRedStreak,
    SleepDebt,
    TempSpike,
    StrainRecoveryMismatch,
}

impl FlagType {
    pub fn all() -> &'static [FlagType] {
        &[
            FlagType::HrvDrop,
            FlagType::RecoveryRedStreak,
            FlagType::SleepDebt,
            FlagType::TempSpike,
            FlagType::StrainRecoveryMismatch,
        ]
    }

    /// Stable identifier used in storage and output
    pub fn name(&self) -> &'static str {
        match self {
            FlagType::HrvDrop => "hrv_drop",
            FlagType::RecoveryRedStreak => "recovery_red_streak",
            FlagType::SleepDebt => "sleep_debt",
            FlagType::TempSpike => "temp_spike",
            FlagType::StrainRecoveryMismatch => "strain_recovery_mismatch",
        }
    }

    /// How loudly an opened flag should be announced
    pub fn severity(&self) -> FlagSeverity {
        match self {
            FlagType::SleepDebt => FlagSeverity::Warn,
            _ => FlagSeverity::Alert,
        }
    }

    /// The metric whose record and baseline the rule requires
    pub fn primary_metric(&self) -> Metric {
        match self {
            FlagType::HrvDrop => Metric::Hrv,
            FlagType::RecoveryRedStreak => Metric::RecoveryScore,
            FlagType::SleepDebt => Metric::SleepDuration,
            FlagType::TempSpike => Metric::SkinTemp,
            FlagType::StrainRecoveryMismatch => Metric::Strain,
        }
    }
}

impl fmt::Display for FlagType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for FlagType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        FlagType::all()
            .iter()
            .copied()
            .find(|t| t.name() == normalized)
            .ok_or_else(|| format!("Unknown flag type: {}", s))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FlagSeverity {
    Warn,
    Alert,
}

impl fmt::Display for FlagSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlagSeverity::Warn => write!(f, "warn"),
            FlagSeverity::Alert => write!(f, "alert"),
        }
    }
}

/// Trigger predicate and its thresholds
#[derive(Debug, Clone, PartialEq)]
pub enum RulePredicate {
    /// HRV percent deviation at or below `-drop_pct`
    HrvDrop { drop_pct: f64 },
    /// Recovery score strictly below `threshold`
    RecoveryRed { threshold: f64 },
    /// Sum of (target - actual) sleep over the trailing window above `threshold_minutes`
    SleepDebt {
        target_minutes: f64,
        window_days: u32,
        threshold_minutes: f64,
    },
    /// Skin temperature at least `spike_celsius` above the baseline mean
    TempSpike { spike_celsius: f64 },
    /// Strain above `intercept + slope * recovery_score`
    StrainRecoveryMismatch { intercept: f64, slope: f64 },
}

impl RulePredicate {
    pub fn flag_type(&self) -> FlagType {
        match self {
            RulePredicate::HrvDrop { .. } => FlagType::HrvDrop,
            RulePredicate::RecoveryRed { .. } => FlagType::RecoveryRedStreak,
            RulePredicate::SleepDebt { .. } => FlagType::SleepDebt,
            RulePredicate::TempSpike { .. } => FlagType::TempSpike,
            RulePredicate::StrainRecoveryMismatch { .. } => FlagType::StrainRecoveryMismatch,
        }
    }

    /// Days of history (ending today) the predicate reads
    pub fn lookback_days(&self) -> u32 {
        match self {
            RulePredicate::SleepDebt { window_days, .. } => *window_days,
            _ => 1,
        }
    }
}

/// A rule plus its lifecycle counts
#[derive(Debug, Clone, PartialEq)]
pub struct FlagDefinition {
    pub predicate: RulePredicate,
    /// Consecutive trigger days before the flag opens
    pub min_streak: u32,
    /// Consecutive clear days before an open flag resolves
    pub cooldown: u32,
    /// Missing days tolerated without breaking a streak
    pub max_gap_days: u32,
}

impl FlagDefinition {
    pub fn new(predicate: RulePredicate, min_streak: u32, cooldown: u32, max_gap_days: u32) -> Self {
        Self {
            predicate,
            min_streak,
            cooldown,
            max_gap_days,
        }
    }

    pub fn flag_type(&self) -> FlagType {
        self.predicate.flag_type()
    }

    /// Enabled rule definitions from configuration
    pub fn from_config(config: &FlagsConfig) -> Vec<FlagDefinition> {
        let mut definitions = Vec::new();

        let c = &config.hrv_drop;
        if c.enabled {
            definitions.push(Self::new(
                RulePredicate::HrvDrop {
                    drop_pct: c.drop_pct,
                },
                c.min_streak,
                c.cooldown,
                c.max_gap_days,
            ));
        }

        let c = &config.recovery_red_streak;
        if c.enabled {
            definitions.push(Self::new(
                RulePredicate::RecoveryRed {
                    threshold: c.red_threshold,
                },
                c.min_streak,
                c.cooldown,
                c.max_gap_days,
            ));
        }

        let c = &config.sleep_debt;
        if c.enabled {
            definitions.push(Self::new(
                RulePredicate::SleepDebt {
                    target_minutes: c.target_minutes,
                    window_days: c.window_days,
                    threshold_minutes: c.threshold_minutes,
                },
                c.min_streak,
                c.cooldown,
                c.max_gap_days,
            ));
        }

        let c = &config.temp_spike;
        if c.enabled {
            definitions.push(Self::new(
                RulePredicate::TempSpike {
                    spike_celsius: c.spike_celsius,
                },
                c.min_streak,
                c.cooldown,
                c.max_gap_days,
            ));
        }

        let c = &config.strain_recovery_mismatch;
        if c.enabled {
            definitions.push(Self::new(
                RulePredicate::StrainRecoveryMismatch {
                    intercept: c.capacity_intercept,
                    slope: c.capacity_slope,
                },
                c.min_streak,
                c.cooldown,
                c.max_gap_days,
            ));
        }

        definitions
    }

    /// Reject definitions that could never open or never resolve
    pub fn validate(&self) -> Result<(), EngineError> {
        let name = self.flag_type();
        if self.min_streak == 0 {
            return Err(EngineError::InvalidConfiguration(format!(
                "{}: min_streak must be at least 1",
                name
            )));
        }
        if self.cooldown == 0 {
            return Err(EngineError::InvalidConfiguration(format!(
                "{}: cooldown must be at least 1",
                name
            )));
        }

        let positive = |label: &str, v: f64| {
            if v.is_finite() && v > 0.0 {
                Ok(())
            } else {
                Err(EngineError::InvalidConfiguration(format!(
                    "{}: {} must be positive, got {}",
                    name, label, v
                )))
            }
        };

        match &self.predicate {
            RulePredicate::HrvDrop { drop_pct } => {
                positive("drop_pct", *drop_pct)?;
                if *drop_pct >= 1.0 {
                    return Err(EngineError::InvalidConfiguration(format!(
                        "{}: drop_pct is a fraction and must be below 1.0",
                        name
                    )));
                }
            }
            RulePredicate::RecoveryRed { threshold } => positive("red_threshold", *threshold)?,
            RulePredicate::SleepDebt {
                target_minutes,
                window_days,
                threshold_minutes,
            } => {
                positive("target_minutes", *target_minutes)?;
                positive("threshold_minutes", *threshold_minutes)?;
                if *window_days == 0 {
                    return Err(EngineError::InvalidConfiguration(format!(
                        "{}: window_days must be at least 1",
                        name
                    )));
                }
            }
            RulePredicate::TempSpike { spike_celsius } => positive("spike_celsius", *spike_celsius)?,
            RulePredicate::StrainRecoveryMismatch { intercept, slope } => {
                positive("capacity_intercept", *intercept)?;
                positive("capacity_slope", *slope)?;
            }
        }

        Ok(())
    }

    /// Evaluate the predicate for one day
    pub fn observe(&self, input: &DayInput<'_>) -> Observation {
        let metric = self.flag_type().primary_metric();

        let Some(value) = input.today.value(metric) else {
            return Observation::Missing { metric };
        };

        let baseline = input.baseline;
        if !baseline.is_sufficient() {
            return Observation::InsufficientBaseline {
                metric,
                samples: baseline.sample_count,
            };
        }
        let mean = baseline.mean;

        match &self.predicate {
            RulePredicate::HrvDrop { drop_pct } => {
                let Some(deviation) = baseline.percent_deviation(value) else {
                    return Observation::InsufficientBaseline {
                        metric,
                        samples: baseline.sample_count,
                    };
                };
                let snapshot = MetricSnapshot::new(metric, value, -drop_pct)
                    .baseline(mean)
                    .deviation(deviation);
                Observation::from_predicate(deviation <= -drop_pct, snapshot)
            }

            RulePredicate::RecoveryRed { threshold } => {
                let snapshot = MetricSnapshot::new(metric, value, *threshold)
                    .baseline(mean)
                    .deviation_opt(baseline.delta(value));
                Observation::from_predicate(value < *threshold, snapshot)
            }

            RulePredicate::SleepDebt {
                target_minutes,
                window_days,
                threshold_minutes,
            } => {
                let window_start = input.date - Duration::days(*window_days as i64 - 1);
                let debt: f64 = input
                    .recent
                    .iter()
                    .filter(|r| r.date >= window_start && r.date <= input.date)
                    .filter_map(|r| r.value(Metric::SleepDuration))
                    .map(|actual| target_minutes - actual)
                    .sum();

                let snapshot = MetricSnapshot::new(Metric::SleepDebt, debt, *threshold_minutes)
                    .baseline(mean)
                    .related(metric, value);
                Observation::from_predicate(debt > *threshold_minutes, snapshot)
            }

            RulePredicate::TempSpike { spike_celsius } => {
                let Some(delta) = baseline.delta(value) else {
                    return Observation::InsufficientBaseline {
                        metric,
                        samples: baseline.sample_count,
                    };
                };
                let snapshot = MetricSnapshot::new(metric, value, *spike_celsius)
                    .baseline(mean)
                    .deviation(delta);
                Observation::from_predicate(delta >= *spike_celsius, snapshot)
            }

            RulePredicate::StrainRecoveryMismatch { intercept, slope } => {
                let Some(recovery) = input.today.value(Metric::RecoveryScore) else {
                    return Observation::Missing {
                        metric: Metric::RecoveryScore,
                    };
                };
                let capacity = intercept + slope * recovery;
                let snapshot = MetricSnapshot::new(metric, value, capacity)
                    .baseline(mean)
                    .deviation(value - capacity)
                    .related(Metric::RecoveryScore, recovery);
                Observation::from_predicate(value > capacity, snapshot)
            }
        }
    }
}

/// Everything a predicate may look at for one day
#[derive(Debug, Clone, Copy)]
pub struct DayInput<'a> {
    pub date: NaiveDate,
    pub today: &'a DailyRecord,
    /// Records up to and including `date`, ascending
    pub recent: &'a [DailyRecord],
    /// Baseline of the rule's primary metric
    pub baseline: &'a BaselineWindow,
}

/// A metric value alongside the one being judged
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MetricValue {
    pub metric: Metric,
    pub value: f64,
}

/// The numbers behind an observation, passed along with alerts
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MetricSnapshot {
    pub metric: Metric,
    pub value: f64,
    pub threshold: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub baseline_mean: Option<f64>,
    /// Percent deviation for HRV, absolute delta otherwise
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deviation: Option<f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub related: Vec<MetricValue>,
}

impl MetricSnapshot {
    pub fn new(metric: Metric, value: f64, threshold: f64) -> Self {
        Self {
            metric,
            value,
            threshold,
            baseline_mean: None,
            deviation: None,
            related: Vec::new(),
        }
    }

    pub fn baseline(mut self, mean: Option<f64>) -> Self {
        self.baseline_mean = mean;
        self
    }

    pub fn deviation(mut self, deviation: f64) -> Self {
        self.deviation = Some(deviation);
        self
    }

    pub fn deviation_opt(mut self, deviation: Option<f64>) -> Self {
        self.deviation = deviation;
        self
    }

    pub fn related(mut self, metric: Metric, value: f64) -> Self {
        self.related.push(MetricValue { metric, value });
        self
    }
}

/// Outcome of a predicate for one day
#[derive(Debug, Clone, PartialEq)]
pub enum Observation {
    Triggered(MetricSnapshot),
    Clear(MetricSnapshot),
    /// No record for the metric on this day
    Missing { metric: Metric },
    /// Baseline too thin to judge against
    InsufficientBaseline { metric: Metric, samples: usize },
}

impl Observation {
    fn from_predicate(triggered: bool, snapshot: MetricSnapshot) -> Self {
        if triggered {
            Observation::Triggered(snapshot)
        } else {
            Observation::Clear(snapshot)
        }
    }

    /// True for triggered and clear days; false for skipped days
    pub fn is_evaluated(&self) -> bool {
        matches!(self, Observation::Triggered(_) | Observation::Clear(_))
    }

    pub fn snapshot(&self) -> Option<&MetricSnapshot> {
        match self {
            Observation::Triggered(s) | Observation::Clear(s) => Some(s),
            _ => None,
        }
    }

    /// Why the day was skipped, if it was
    pub fn skip_reason(&self, date: NaiveDate, required: usize) -> Option<EngineError> {
        match self {
            Observation::Missing { metric } => Some(EngineError::MissingRecordGap {
                metric: *metric,
                date,
            }),
            Observation::InsufficientBaseline { metric, samples } => {
                Some(EngineError::InsufficientBaselineData {
                    metric: *metric,
                    samples: *samples,
                    required,
                })
            }
            _ => None,
        }
    }
}
