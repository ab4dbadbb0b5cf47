//! Vigil Record Store
//!
//! SQLite persistence for everything the engine reads and the flag rows it owns:
//!
//! - **types**: Daily record families, journal entries, metrics, date ranges
//! - **schema**: Table definitions and schema versioning
//! - **records**: Idempotent per-date upserts and range queries
//! - **flags**: FlagStore implementation with optimistic write guards
//! - **error**: Error types
//!
//! # Tables
//!
//! ```text
//! cycles | recovery | sleep | journal_entries   one row per date
//! workouts                                       one row per (date, sport)
//! flag_instances                                 keyed by (flag_type, first_triggered_date)
//! ```

pub mod error;
pub mod flags;
pub mod records;
pub mod schema;
pub mod types;

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::NaiveDate;
use rusqlite::Connection;
use tracing::{debug, info};

pub use error::{StoreError, StoreResult};
pub use types::{
    CycleRecord, DailyRecord, DateRange, JournalEntry, JournalFactor, Metric, RecoveryRecord,
    SleepRecord, Workout,
};

/// Database file name inside the data directory
pub const DB_FILE_NAME: &str = "vigil.db";

/// Read access to persisted daily records
///
/// The engine only ever reads through this trait; ingestion writes happen elsewhere.
pub trait RecordSource: Send + Sync {
    /// All record families for a single date (empty record if nothing stored)
    fn day(&self, date: NaiveDate) -> StoreResult<DailyRecord>;

    /// Records for every date in the range that has any data, ascending by date
    fn range(&self, range: DateRange) -> StoreResult<Vec<DailyRecord>>;

    /// Journal entries in the range, ascending by date
    fn journal(&self, range: DateRange) -> StoreResult<Vec<JournalEntry>>;

    /// Present values of one metric in the range, ascending by date
    fn series(&self, metric: Metric, range: DateRange) -> StoreResult<Vec<(NaiveDate, f64)>> {
        Ok(self
            .range(range)?
            .iter()
            .filter_map(|record| metric.value_in(record).map(|v| (record.date, v)))
            .collect())
    }
}

/// SQLite database holding records and flag state
pub struct Database {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl Database {
    /// Open or create the database inside `data_dir`
    pub fn open(data_dir: &Path) -> StoreResult<Self> {
        std::fs::create_dir_all(data_dir)?;
        let db_path = data_dir.join(DB_FILE_NAME);
        info!("Opening SQLite database at {:?}", db_path);

        let conn = Connection::open(&db_path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        let db = Self {
            conn: Mutex::new(conn),
            path: Some(db_path),
        };
        db.init_schema()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> StoreResult<Self> {
        debug!("Opening in-memory SQLite database");
        let conn = Connection::open_in_memory()?;

        let db = Self {
            conn: Mutex::new(conn),
            path: None,
        };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> StoreResult<()> {
        self.with_conn(schema::init_schema)
    }

    /// Path of the backing file, `None` when in memory
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run a read or single-statement write against the connection
    pub fn with_conn<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> StoreResult<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| StoreError::Lock(format!("Lock poisoned: {}", e)))?;
        f(&conn)
    }

    /// Run `f` inside a transaction, committing only if it succeeds
    pub fn with_transaction<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&rusqlite::Transaction<'_>) -> StoreResult<T>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| StoreError::Lock(format!("Lock poisoned: {}", e)))?;
        let tx = conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Row counts per table
    pub fn stats(&self) -> StoreResult<DbStats> {
        self.with_conn(|conn| {
            let count = |table: &str| -> StoreResult<u64> {
                let n: i64 =
                    conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                        row.get(0)
                    })?;
                Ok(n as u64)
            };

            Ok(DbStats {
                cycle_days: count("cycles")?,
                recovery_days: count("recovery")?,
                sleep_days: count("sleep")?,
                workouts: count("workouts")?,
                journal_entries: count("journal_entries")?,
                flag_instances: count("flag_instances")?,
            })
        })
    }
}

/// Database statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct DbStats {
    pub cycle_days: u64,
    pub recovery_days: u64,
    pub sleep_days: u64,
    pub workouts: u64,
    pub journal_entries: u64,
    pub flag_instances: u64,
}

impl std::fmt::Display for DbStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "cycles={}, recovery={}, sleep={}, workouts={}, journal={}, flags={}",
            self.cycle_days,
            self.recovery_days,
            self.sleep_days,
            self.workouts,
            self.journal_entries,
            self.flag_instances
        )
    }
}

/// Format a date as stored in TEXT columns
pub(crate) fn date_to_sql(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Read a TEXT date column
pub(crate) fn date_from_row(row: &rusqlite::Row<'_>, idx: &str) -> rusqlite::Result<NaiveDate> {
    let raw: String = row.get(idx)?;
    NaiveDate::parse_from_str(&raw, "%Y-%m-%d").map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            Box::new(e),
        )
    })
}
