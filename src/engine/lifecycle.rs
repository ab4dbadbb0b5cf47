//! Flag lifecycle
//!
//! Each flag type has at most one active instance. An instance starts out
//! `Observing` while its trigger streak builds, becomes `Open` on the day the
//! streak reaches the rule's minimum, and becomes `Resolved` (terminal) after
//! `cooldown` consecutive clear days.
//!
//! ```text
//!            trigger              streak == min_streak
//!  (none) ───────────▶ Observing ──────────────────────▶ Open ──┐
//!     ▲                   │ clear / gap exceeded                │ clear x cooldown
//!     └───────────────────┘                                      ▼
//!                                                            Resolved
//! ```
//!
//! `transition` is a pure function of (prior instance, date, observation), so
//! re-applying the same inputs always yields the same next state.

use crate::engine::rules::{FlagDefinition, FlagSeverity, FlagType, MetricSnapshot, Observation};
use crate::store::StoreResult;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle state of a flag instance
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FlagState {
    /// Trigger streak building, not yet alert-worthy
    Observing,
    Open,
    Resolved,
}

impl FlagState {
    pub fn name(&self) -> &'static str {
        match self {
            FlagState::Observing => "observing",
            FlagState::Open => "open",
            FlagState::Resolved => "resolved",
        }
    }

    pub fn is_active(&self) -> bool {
        !matches!(self, FlagState::Resolved)
    }
}

impl fmt::Display for FlagState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for FlagState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "observing" => Ok(FlagState::Observing),
            "open" => Ok(FlagState::Open),
            "resolved" => Ok(FlagState::Resolved),
            other => Err(format!("Unknown flag state: {}", other)),
        }
    }
}

/// A persisted flag, keyed by (flag_type, first_triggered_date)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FlagInstance {
    pub flag_type: FlagType,
    pub state: FlagState,
    pub first_triggered_date: NaiveDate,
    pub last_triggered_date: NaiveDate,
    /// Last day a present observation was applied
    pub last_evaluated_date: NaiveDate,
    pub resolved_date: Option<NaiveDate>,
    pub consecutive_trigger_count: u32,
    pub consecutive_clear_count: u32,
    /// Optimistic concurrency token, bumped by the store on every write
    #[serde(default)]
    pub version: i64,
}

impl FlagInstance {
    /// A fresh instance on its first trigger day
    pub fn start(flag_type: FlagType, date: NaiveDate) -> Self {
        Self {
            flag_type,
            state: FlagState::Observing,
            first_triggered_date: date,
            last_triggered_date: date,
            last_evaluated_date: date,
            resolved_date: None,
            consecutive_trigger_count: 1,
            consecutive_clear_count: 0,
            version: 0,
        }
    }

    /// True if both refer to the same stored row
    pub fn same_row(&self, other: &FlagInstance) -> bool {
        self.flag_type == other.flag_type && self.first_triggered_date == other.first_triggered_date
    }

    /// Last date already folded into this instance
    pub fn applied_through(&self) -> NaiveDate {
        self.resolved_date
            .map_or(self.last_evaluated_date, |resolved| resolved.max(self.last_evaluated_date))
    }

    /// Calendar days with no applied observation between the last one and `date`
    fn gap_before(&self, date: NaiveDate) -> i64 {
        (date - self.last_evaluated_date).num_days() - 1
    }
}

/// Alert-worthy state change
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FlagTransition {
    Opened,
    Resolved,
}

impl fmt::Display for FlagTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlagTransition::Opened => write!(f, "opened"),
            FlagTransition::Resolved => write!(f, "resolved"),
        }
    }
}

/// Result of applying one day to a flag
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    /// Instance after the day: `None` when no instance remains active
    /// (a resolved instance is returned so it can be persisted)
    pub next: Option<FlagInstance>,
    pub signal: Option<FlagTransition>,
}

impl Transition {
    fn quiet(next: Option<FlagInstance>) -> Self {
        Self { next, signal: None }
    }

    fn signal(next: FlagInstance, signal: FlagTransition) -> Self {
        Self {
            next: Some(next),
            signal: Some(signal),
        }
    }
}

/// Apply one day's observation to the latest instance of the flag type.
///
/// `prior` may be resolved. Dates at or before its `applied_through` date
/// were already applied and return it unchanged; later dates treat a
/// resolved prior as absent.
pub fn transition(
    definition: &FlagDefinition,
    prior: Option<&FlagInstance>,
    date: NaiveDate,
    observation: &Observation,
) -> Transition {
    if let Some(prior) = prior.filter(|p| date <= p.applied_through()) {
        return Transition::quiet(Some(prior.clone()));
    }

    let Some(prior) = prior.filter(|p| p.state.is_active()) else {
        return match observation {
            Observation::Triggered(_) => start(definition, date),
            _ => Transition::quiet(None),
        };
    };

    let max_gap = definition.max_gap_days as i64;

    match (prior.state, observation) {
        // Skipped day: only the gap tolerance can change anything
        (state, obs) if !obs.is_evaluated() => {
            let missing_days = prior.gap_before(date) + 1;
            if missing_days <= max_gap {
                return Transition::quiet(Some(prior.clone()));
            }
            match state {
                FlagState::Observing => Transition::quiet(None),
                _ => {
                    let mut next = prior.clone();
                    next.consecutive_clear_count = 0;
                    Transition::quiet(Some(next))
                }
            }
        }

        (FlagState::Observing, Observation::Triggered(_)) => {
            if prior.gap_before(date) > max_gap {
                return start(definition, date);
            }
            let mut next = prior.clone();
            next.consecutive_trigger_count += 1;
            next.last_triggered_date = date;
            next.last_evaluated_date = date;
            if next.consecutive_trigger_count >= definition.min_streak {
                next.state = FlagState::Open;
                Transition::signal(next, FlagTransition::Opened)
            } else {
                Transition::quiet(Some(next))
            }
        }

        // Streak broken before it was alert-worthy
        (FlagState::Observing, _) => Transition::quiet(None),

        (_, Observation::Triggered(_)) => {
            let mut next = prior.clone();
            next.consecutive_trigger_count = if prior.gap_before(date) > max_gap {
                1
            } else {
                prior.consecutive_trigger_count + 1
            };
            next.consecutive_clear_count = 0;
            next.last_triggered_date = date;
            next.last_evaluated_date = date;
            Transition::quiet(Some(next))
        }

        (_, _) => {
            let mut next = prior.clone();
            next.consecutive_clear_count = if prior.gap_before(date) > max_gap {
                1
            } else {
                prior.consecutive_clear_count + 1
            };
            next.consecutive_trigger_count = 0;
            next.last_evaluated_date = date;
            if next.consecutive_clear_count >= definition.cooldown {
                next.state = FlagState::Resolved;
                next.resolved_date = Some(date);
                Transition::signal(next, FlagTransition::Resolved)
            } else {
                Transition::quiet(Some(next))
            }
        }
    }
}

fn start(definition: &FlagDefinition, date: NaiveDate) -> Transition {
    let mut instance = FlagInstance::start(definition.flag_type(), date);
    if definition.min_streak <= 1 {
        instance.state = FlagState::Open;
        Transition::signal(instance, FlagTransition::Opened)
    } else {
        Transition::quiet(Some(instance))
    }
}

/// Alert emitted to the caller when an instance opens or resolves
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FlagEvent {
    pub flag_type: FlagType,
    pub transition: FlagTransition,
    pub severity: FlagSeverity,
    pub first_triggered_date: NaiveDate,
    pub current_date: NaiveDate,
    pub consecutive_trigger_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<MetricSnapshot>,
}

impl FlagEvent {
    pub fn new(
        instance: &FlagInstance,
        transition: FlagTransition,
        current_date: NaiveDate,
        observation: &Observation,
    ) -> Self {
        Self {
            flag_type: instance.flag_type,
            transition,
            severity: instance.flag_type.severity(),
            first_triggered_date: instance.first_triggered_date,
            current_date,
            consecutive_trigger_count: instance.consecutive_trigger_count,
            snapshot: observation.snapshot().cloned(),
        }
    }
}

/// Persistence for flag instances
///
/// Implementations must guarantee at most one active row per flag type and
/// reject writes whose `prior` no longer matches what is stored.
pub trait FlagStore: Send + Sync {
    /// The observing or open instance for a flag type, if any
    fn active(&self, flag_type: FlagType) -> StoreResult<Option<FlagInstance>>;

    /// Atomically replace `prior` with `next`.
    ///
    /// Fails with `StoreError::Conflict` if `prior` is stale or another
    /// active instance of the type appeared in the meantime.
    fn commit(&self, prior: Option<&FlagInstance>, next: Option<&FlagInstance>)
        -> StoreResult<()>;

    /// All instances currently in the `Open` state
    fn open_flags(&self) -> StoreResult<Vec<FlagInstance>>;

    /// Every instance of a flag type, oldest first
    fn history(&self, flag_type: FlagType) -> StoreResult<Vec<FlagInstance>>;

    /// The active instance, or the most recently resolved one
    fn latest(&self, flag_type: FlagType) -> StoreResult<Option<FlagInstance>> {
        if let Some(active) = self.active(flag_type)? {
            return Ok(Some(active));
        }
        Ok(self.history(flag_type)?.pop())
    }
}
