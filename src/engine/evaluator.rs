//! Flag Evaluator
//!
//! Runs every enabled rule for one date: observe the day, apply the lifecycle
//! transition, persist. Rules are isolated from each other; a rule that is
//! skipped or fails never stops the rest of the pass.

use crate::engine::baseline::{BaselineCalculator, BaselineWindow};
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::lifecycle::{transition, FlagEvent, FlagStore, FlagTransition, Transition};
use crate::engine::rules::{DayInput, FlagDefinition, FlagType, Observation};
use crate::store::{DateRange, Metric, RecordSource};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Default number of re-reads after a write conflict
pub const DEFAULT_CONFLICT_RETRIES: u32 = 3;

/// A rule that produced no signal for the day
#[derive(Debug, Clone, Serialize)]
pub struct SkippedRule {
    pub flag_type: FlagType,
    pub reason: String,
}

/// A rule whose state could not be persisted
#[derive(Debug, Clone, Serialize)]
pub struct RuleFailure {
    pub flag_type: FlagType,
    pub error: String,
    /// Re-running the pass for this date may succeed
    pub retryable: bool,
}

/// Outcome of evaluating all rules for one date
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationPass {
    pub run_id: Uuid,
    pub date: NaiveDate,
    pub events: Vec<FlagEvent>,
    pub skipped: Vec<SkippedRule>,
    pub failures: Vec<RuleFailure>,
}

impl EvaluationPass {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn fail(&mut self, flag_type: FlagType, e: EngineError) {
        error!(flag_type = %flag_type, error = %e, "Rule failed");
        self.failures.push(RuleFailure {
            flag_type,
            retryable: e.is_retryable(),
            error: e.to_string(),
        });
    }
}

/// Evaluates flag rules against the record store
pub struct FlagEvaluator {
    records: Arc<dyn RecordSource>,
    flags: Arc<dyn FlagStore>,
    baselines: BaselineCalculator,
    definitions: Vec<FlagDefinition>,
    conflict_retries: u32,
}

impl FlagEvaluator {
    /// Create a new evaluator
    pub fn new(
        records: Arc<dyn RecordSource>,
        flags: Arc<dyn FlagStore>,
        baselines: BaselineCalculator,
        definitions: Vec<FlagDefinition>,
    ) -> Self {
        Self {
            records,
            flags,
            baselines,
            definitions,
            conflict_retries: DEFAULT_CONFLICT_RETRIES,
        }
    }

    /// Set how many times a conflicting write is re-read and retried
    pub fn with_conflict_retries(mut self, retries: u32) -> Self {
        self.conflict_retries = retries;
        self
    }

    pub fn definitions(&self) -> &[FlagDefinition] {
        &self.definitions
    }

    /// Evaluate every rule for `date`.
    ///
    /// Fails only if the shared inputs (the day's records and the recent
    /// window) cannot be read. Per-rule problems, including a baseline read
    /// error, land in `skipped` or `failures`.
    pub fn evaluate(&self, date: NaiveDate) -> EngineResult<EvaluationPass> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("evaluation", run_id = %run_id, date = %date);
        let _guard = span.enter();

        let today = self.records.day(date)?;
        let lookback = self
            .definitions
            .iter()
            .map(|d| d.predicate.lookback_days())
            .max()
            .unwrap_or(1);
        let recent = self.records.range(DateRange::trailing(date, lookback))?;

        let mut baselines: HashMap<Metric, BaselineWindow> = HashMap::new();
        let mut pass = EvaluationPass {
            run_id,
            date,
            events: Vec::new(),
            skipped: Vec::new(),
            failures: Vec::new(),
        };

        for definition in &self.definitions {
            let flag_type = definition.flag_type();
            let metric = flag_type.primary_metric();

            let baseline = match baselines.get(&metric) {
                Some(window) => window.clone(),
                None => match self.baselines.compute(metric, date) {
                    Ok(window) => {
                        baselines.insert(metric, window.clone());
                        window
                    }
                    Err(e) => {
                        pass.fail(flag_type, e.into());
                        continue;
                    }
                },
            };

            let input = DayInput {
                date,
                today: &today,
                recent: &recent,
                baseline: &baseline,
            };
            let observation = definition.observe(&input);

            if let Some(reason) = observation.skip_reason(date, self.baselines.min_samples()) {
                debug!(flag_type = %flag_type, reason = %reason, "Rule skipped");
                pass.skipped.push(SkippedRule {
                    flag_type,
                    reason: reason.to_string(),
                });
            }

            // Skipped days still go through the lifecycle so gaps are measured
            match self.apply(definition, date, &observation) {
                Ok(Some(event)) => pass.events.push(event),
                Ok(None) => {}
                Err(e) => pass.fail(flag_type, e),
            }
        }

        info!(
            events = pass.events.len(),
            skipped = pass.skipped.len(),
            failures = pass.failures.len(),
            "Evaluation pass complete"
        );

        Ok(pass)
    }

    /// Evaluate each date from `start` to `end` inclusive, in order
    pub fn evaluate_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> EngineResult<Vec<EvaluationPass>> {
        if start > end {
            return Err(EngineError::InvalidConfiguration(format!(
                "range start {} is after end {}",
                start, end
            )));
        }
        DateRange::new(start, end)
            .days()
            .map(|date| self.evaluate(date))
            .collect()
    }

    /// Read, transition and commit one rule, retrying on write conflicts
    fn apply(
        &self,
        definition: &FlagDefinition,
        date: NaiveDate,
        observation: &Observation,
    ) -> EngineResult<Option<FlagEvent>> {
        let flag_type = definition.flag_type();
        let mut attempts = 0;

        loop {
            attempts += 1;
            // Resolved instances still absorb replays of the days they cover
            let latest = self.flags.latest(flag_type)?;
            let Transition { next, signal } =
                transition(definition, latest.as_ref(), date, observation);

            let prior = latest.clone().filter(|f| f.state.is_active());
            if next == latest || next == prior {
                return Ok(None);
            }

            match self.flags.commit(prior.as_ref(), next.as_ref()) {
                Ok(()) => {
                    let event = match (signal, next.as_ref()) {
                        (Some(signal), Some(instance)) => {
                            Some(FlagEvent::new(instance, signal, date, observation))
                        }
                        _ => None,
                    };
                    if let Some(event) = &event {
                        log_event(event);
                    }
                    return Ok(event);
                }
                Err(e) if e.is_conflict() && attempts <= self.conflict_retries => {
                    warn!(
                        flag_type = %flag_type,
                        attempt = attempts,
                        error = %e,
                        "Flag write conflict, retrying"
                    );
                }
                Err(e) if e.is_conflict() => {
                    return Err(EngineError::PersistenceConflict {
                        flag_type,
                        attempts,
                    });
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

fn log_event(event: &FlagEvent) {
    match event.transition {
        FlagTransition::Opened => info!(
            flag_type = %event.flag_type,
            first_triggered = %event.first_triggered_date,
            streak = event.consecutive_trigger_count,
            "Flag opened"
        ),
        FlagTransition::Resolved => info!(
            flag_type = %event.flag_type,
            first_triggered = %event.first_triggered_date,
            "Flag resolved"
        ),
    }
}
