//! Biometric Trend & Anomaly Detection Engine
//!
//! Turns persisted daily records into personal signal:
//!
//! - **baseline**: Rolling per-metric statistics over a trailing window
//! - **rules**: Flag definitions and their trigger predicates
//! - **lifecycle**: Pure flag state transitions and the `FlagStore` seam
//! - **evaluator**: One pass over every rule for a date
//! - **correlation**: Journal factor vs metric median deltas
//! - **report**: Structured daily and weekly reports
//!
//! The engine never formats prose or talks to delivery channels. Callers get
//! an `EngineRun` back and decide what to do with it.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use vigil::config::Config;
//! use vigil::engine::{Engine, ReportCadence};
//! use vigil::store::Database;
//!
//! let db = Arc::new(Database::open_in_memory()?);
//! let engine = Engine::new(db, &Config::default())?;
//! let run = engine.run(chrono::Local::now().date_naive(), ReportCadence::Daily)?;
//! for event in &run.pass.events {
//!     println!("{} {}", event.flag_type, event.transition);
//! }
//! ```

pub mod baseline;
pub mod correlation;
pub mod error;
pub mod evaluator;
pub mod lifecycle;
pub mod report;
pub mod rules;

pub use baseline::{BaselineCalculator, BaselineStatus, BaselineWindow};
pub use correlation::{CorrelationAnalyzer, CorrelationResult, EffectDirection};
pub use error::{EngineError, EngineResult};
pub use evaluator::{EvaluationPass, FlagEvaluator, RuleFailure, SkippedRule};
pub use lifecycle::{FlagEvent, FlagInstance, FlagState, FlagStore, FlagTransition};
pub use report::{MetricTrend, Report, ReportAssembler, ReportCadence, WeeklySummary};
pub use rules::{FlagDefinition, FlagSeverity, FlagType, MetricSnapshot, Observation};

use crate::config::{Config, ConfigError};
use crate::store::{Database, Metric, RecordSource};
use chrono::NaiveDate;
use serde::Serialize;
use std::sync::Arc;

/// Events and report produced by one invocation
#[derive(Debug, Clone, Serialize)]
pub struct EngineRun {
    pub pass: EvaluationPass,
    pub report: Report,
}

/// Wires the calculators, evaluator and report assembler to the stores
pub struct Engine {
    evaluator: FlagEvaluator,
    reports: ReportAssembler,
    baselines: BaselineCalculator,
    correlations: CorrelationAnalyzer,
    flags: Arc<dyn FlagStore>,
}

impl Engine {
    /// Engine over a single SQLite database holding records and flags
    pub fn new(db: Arc<Database>, config: &Config) -> EngineResult<Self> {
        Self::with_stores(db.clone(), db, config)
    }

    /// Engine over separate record and flag stores.
    ///
    /// Fails with `InvalidConfiguration` if any setting or enabled rule is
    /// unusable.
    pub fn with_stores(
        records: Arc<dyn RecordSource>,
        flags: Arc<dyn FlagStore>,
        config: &Config,
    ) -> EngineResult<Self> {
        config.validate().map_err(|e| match e {
            ConfigError::Invalid(msg) => EngineError::InvalidConfiguration(msg),
            other => EngineError::InvalidConfiguration(other.to_string()),
        })?;

        let definitions = FlagDefinition::from_config(&config.flags);

        let baselines = BaselineCalculator::new(records.clone(), &config.baseline);
        let correlations = CorrelationAnalyzer::new(records.clone(), &config.correlation);

        tracing::info!(
            rules = definitions.len(),
            window_days = baselines.window_days(),
            min_samples = baselines.min_samples(),
            "Engine initialized"
        );

        let evaluator = FlagEvaluator::new(
            records.clone(),
            flags.clone(),
            baselines.clone(),
            definitions,
        )
        .with_conflict_retries(config.engine.conflict_retries);
        let reports = ReportAssembler::new(
            records,
            flags.clone(),
            baselines.clone(),
            correlations.clone(),
        );

        Ok(Self {
            evaluator,
            reports,
            baselines,
            correlations,
            flags,
        })
    }

    /// Evaluate all rules for `date`, then assemble the report
    pub fn run(&self, date: NaiveDate, cadence: ReportCadence) -> EngineResult<EngineRun> {
        let pass = self.evaluator.evaluate(date)?;
        let report = self.reports.assemble(date, cadence)?;
        Ok(EngineRun { pass, report })
    }

    pub fn evaluate(&self, date: NaiveDate) -> EngineResult<EvaluationPass> {
        self.evaluator.evaluate(date)
    }

    /// Catch up on consecutive dates, oldest first
    pub fn evaluate_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> EngineResult<Vec<EvaluationPass>> {
        self.evaluator.evaluate_range(start, end)
    }

    pub fn report(&self, date: NaiveDate, cadence: ReportCadence) -> EngineResult<Report> {
        Ok(self.reports.assemble(date, cadence)?)
    }

    pub fn baseline(&self, metric: Metric, date: NaiveDate) -> EngineResult<BaselineWindow> {
        Ok(self.baselines.compute(metric, date)?)
    }

    pub fn correlations(&self, date: NaiveDate) -> EngineResult<Vec<CorrelationResult>> {
        Ok(self.correlations.analyze(date)?)
    }

    pub fn open_flags(&self) -> EngineResult<Vec<FlagInstance>> {
        Ok(self.flags.open_flags()?)
    }

    pub fn flag_history(&self, flag_type: FlagType) -> EngineResult<Vec<FlagInstance>> {
        Ok(self.flags.history(flag_type)?)
    }

    pub fn definitions(&self) -> &[FlagDefinition] {
        self.evaluator.definitions()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_zero_streak() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let mut config = Config::default();
        config.flags.hrv_drop.min_streak = 0;

        let result = Engine::new(db, &config);
        assert!(matches!(result, Err(EngineError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_disabled_rules_are_not_evaluated() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let mut config = Config::default();
        config.flags.temp_spike.enabled = false;
        config.flags.sleep_debt.enabled = false;

        let engine = Engine::new(db, &config).unwrap();
        assert_eq!(engine.definitions().len(), 3);
        assert!(engine
            .definitions()
            .iter()
            .all(|d| d.flag_type() != FlagType::TempSpike));
    }

    #[test]
    fn test_run_on_empty_store() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let engine = Engine::new(db, &Config::default()).unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();

        let run = engine.run(date, ReportCadence::Weekly).unwrap();
        assert!(run.pass.events.is_empty());
        assert!(run.pass.is_clean());
        assert_eq!(run.pass.skipped.len(), FlagType::all().len());
        assert!(run.report.open_flags.is_empty());
        assert!(run.report.correlations.is_some());
    }
}
