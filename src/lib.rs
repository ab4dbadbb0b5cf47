//! # Vigil
//!
//! Biometric trend and anomaly detection over daily wearable data.
//!
//! ## Features
//!
//! - **Rolling baselines**: Per-metric mean and deviation over a trailing window
//! - **Streak-based flags**: Open after consecutive triggered days, resolve after a cooldown
//! - **Journal correlations**: Median deltas between days with and without a factor
//! - **Structured reports**: Daily and weekly, for delivery by the caller
//!
//! ## Modules
//!
//! - [`store`]: SQLite record and flag store
//! - [`engine`]: Baselines, rules, flag lifecycle, correlations, reports
//! - [`import`]: CSV import of records and journal entries
//! - [`api`]: REST API server with Axum
//! - [`notify`]: Message formatting and webhook delivery
//! - [`scheduler`]: Daily and weekly runs
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use vigil::{Config, Database, Engine, ReportCadence};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Config::default();
//!     let db = Arc::new(Database::open(&config.storage.data_dir_path())?);
//!     let engine = Engine::new(db, &config)?;
//!
//!     let today = chrono::Local::now().date_naive();
//!     let run = engine.run(today, ReportCadence::Daily)?;
//!     println!("{} events, {} open flags", run.pass.events.len(), run.report.open_flags.len());
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod engine;
pub mod import;
pub mod logging;
pub mod notify;
pub mod scheduler;
pub mod store;

pub use config::{Config, ConfigError};

pub use engine::{
    BaselineWindow, CorrelationResult, Engine, EngineError, EngineResult, EngineRun,
    EvaluationPass, FlagDefinition, FlagEvent, FlagInstance, FlagSeverity, FlagState, FlagStore,
    FlagTransition, FlagType, Report, ReportCadence, WeeklySummary,
};

pub use store::{
    DailyRecord, Database, DateRange, JournalEntry, JournalFactor, Metric, RecordSource,
    StoreError, StoreResult,
};

pub use import::{CsvImporter, ImportError, ImportResult};
pub use notify::{Notifier, NotifyError, WebhookNotifier};
pub use scheduler::{ReportScheduler, SchedulerError};
