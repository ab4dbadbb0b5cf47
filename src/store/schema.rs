//! Database schema definitions

use rusqlite::Connection;
use tracing::info;

use super::error::StoreResult;

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> StoreResult<()> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        info!("Creating new database schema v{}", SCHEMA_VERSION);
        conn.execute_batch(RECORDS_SCHEMA)?;
        conn.execute_batch(FLAGS_SCHEMA)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if current_version < SCHEMA_VERSION {
        info!(
            "Migrating schema from v{} to v{}",
            current_version, SCHEMA_VERSION
        );
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else {
        info!("Database schema is up to date (v{})", current_version);
    }

    Ok(())
}

/// Get current schema version (0 if not initialized)
fn get_schema_version(conn: &Connection) -> StoreResult<i32> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        [],
    )?;

    let version: i32 = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .unwrap_or(0);

    Ok(version)
}

fn set_schema_version(conn: &Connection, version: i32) -> StoreResult<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    Ok(())
}

/// Daily record families, one row per date (workouts: one per date and sport)
const RECORDS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cycles (
    date TEXT PRIMARY KEY NOT NULL,
    strain REAL,
    kilojoules REAL,
    avg_heart_rate INTEGER,
    max_heart_rate INTEGER,
    synced_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS recovery (
    date TEXT PRIMARY KEY NOT NULL,
    recovery_score REAL,
    hrv_ms REAL,
    resting_heart_rate REAL,
    spo2 REAL,
    skin_temp_celsius REAL,
    synced_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS sleep (
    date TEXT PRIMARY KEY NOT NULL,
    duration_minutes REAL,
    sleep_debt_minutes REAL,
    performance_pct REAL,
    efficiency_pct REAL,
    respiratory_rate REAL,
    synced_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS workouts (
    date TEXT NOT NULL,
    sport TEXT NOT NULL,
    strain REAL,
    synced_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (date, sport)
);

CREATE TABLE IF NOT EXISTS journal_entries (
    date TEXT PRIMARY KEY NOT NULL,
    alcohol_units INTEGER,
    stress_level INTEGER CHECK (stress_level IS NULL OR stress_level BETWEEN 1 AND 5),
    caffeine INTEGER,
    late_caffeine INTEGER,
    notes TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

/// Flag lifecycle rows. At most one non-resolved row per flag type.
const FLAGS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS flag_instances (
    flag_type TEXT NOT NULL,
    first_triggered_date TEXT NOT NULL,
    state TEXT NOT NULL CHECK (state IN ('observing', 'open', 'resolved')),
    last_triggered_date TEXT NOT NULL,
    last_evaluated_date TEXT NOT NULL,
    resolved_date TEXT,
    consecutive_trigger_count INTEGER NOT NULL DEFAULT 0,
    consecutive_clear_count INTEGER NOT NULL DEFAULT 0,
    version INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (flag_type, first_triggered_date)
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_flag_single_active
    ON flag_instances(flag_type) WHERE state != 'resolved';

CREATE INDEX IF NOT EXISTS idx_flag_state ON flag_instances(state);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_schema_is_repeatable() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();

        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);

        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN \
                 ('cycles', 'recovery', 'sleep', 'workouts', 'journal_entries', 'flag_instances')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 6);
    }

    #[test]
    fn test_single_active_index_rejects_second_open_row() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        let insert = "INSERT INTO flag_instances (flag_type, first_triggered_date, state, \
                      last_triggered_date, last_evaluated_date) VALUES (?1, ?2, ?3, ?2, ?2)";
        conn.execute(insert, ["hrv_drop", "2024-01-01", "open"]).unwrap();
        assert!(conn.execute(insert, ["hrv_drop", "2024-01-05", "observing"]).is_err());

        // Resolved history does not count against the invariant
        conn.execute(insert, ["hrv_drop", "2023-12-01", "resolved"]).unwrap();
    }
}
