//! Daily record upserts and range queries
//!
//! Every family is keyed by date, so re-syncing a day overwrites it in place.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;

use super::{
    date_from_row, date_to_sql, CycleRecord, DailyRecord, Database, DateRange, JournalEntry,
    RecordSource, RecoveryRecord, SleepRecord, StoreResult, Workout,
};

impl CycleRecord {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            date: date_from_row(row, "date")?,
            strain: row.get("strain")?,
            kilojoules: row.get("kilojoules")?,
            avg_heart_rate: row.get("avg_heart_rate")?,
            max_heart_rate: row.get("max_heart_rate")?,
        })
    }
}

impl RecoveryRecord {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            date: date_from_row(row, "date")?,
            recovery_score: row.get("recovery_score")?,
            hrv_ms: row.get("hrv_ms")?,
            resting_heart_rate: row.get("resting_heart_rate")?,
            spo2: row.get("spo2")?,
            skin_temp_celsius: row.get("skin_temp_celsius")?,
        })
    }
}

impl SleepRecord {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            date: date_from_row(row, "date")?,
            duration_minutes: row.get("duration_minutes")?,
            sleep_debt_minutes: row.get("sleep_debt_minutes")?,
            performance_pct: row.get("performance_pct")?,
            efficiency_pct: row.get("efficiency_pct")?,
            respiratory_rate: row.get("respiratory_rate")?,
        })
    }
}

impl Workout {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            date: date_from_row(row, "date")?,
            sport: row.get("sport")?,
            strain: row.get("strain")?,
        })
    }
}

impl JournalEntry {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let alcohol: Option<i64> = row.get("alcohol_units")?;
        let stress: Option<i64> = row.get("stress_level")?;
        Ok(Self {
            date: date_from_row(row, "date")?,
            alcohol_units: alcohol.map(|u| u.max(0) as u32),
            stress_level: stress.map(|s| s.clamp(1, 5) as u8),
            caffeine: row.get("caffeine")?,
            late_caffeine: row.get("late_caffeine")?,
            notes: row.get("notes")?,
        })
    }
}

fn insert_cycle(conn: &Connection, cycle: &CycleRecord) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO cycles (date, strain, kilojoules, avg_heart_rate, max_heart_rate)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(date) DO UPDATE SET
            strain = excluded.strain,
            kilojoules = excluded.kilojoules,
            avg_heart_rate = excluded.avg_heart_rate,
            max_heart_rate = excluded.max_heart_rate,
            synced_at = datetime('now')",
        params![
            date_to_sql(cycle.date),
            cycle.strain,
            cycle.kilojoules,
            cycle.avg_heart_rate,
            cycle.max_heart_rate
        ],
    )?;
    Ok(())
}

fn insert_recovery(conn: &Connection, recovery: &RecoveryRecord) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO recovery (date, recovery_score, hrv_ms, resting_heart_rate, spo2, skin_temp_celsius)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(date) DO UPDATE SET
            recovery_score = excluded.recovery_score,
            hrv_ms = excluded.hrv_ms,
            resting_heart_rate = excluded.resting_heart_rate,
            spo2 = excluded.spo2,
            skin_temp_celsius = excluded.skin_temp_celsius,
            synced_at = datetime('now')",
        params![
            date_to_sql(recovery.date),
            recovery.recovery_score,
            recovery.hrv_ms,
            recovery.resting_heart_rate,
            recovery.spo2,
            recovery.skin_temp_celsius
        ],
    )?;
    Ok(())
}

fn insert_sleep(conn: &Connection, sleep: &SleepRecord) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO sleep (date, duration_minutes, sleep_debt_minutes, performance_pct, efficiency_pct, respiratory_rate)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(date) DO UPDATE SET
            duration_minutes = excluded.duration_minutes,
            sleep_debt_minutes = excluded.sleep_debt_minutes,
            performance_pct = excluded.performance_pct,
            efficiency_pct = excluded.efficiency_pct,
            respiratory_rate = excluded.respiratory_rate,
            synced_at = datetime('now')",
        params![
            date_to_sql(sleep.date),
            sleep.duration_minutes,
            sleep.sleep_debt_minutes,
            sleep.performance_pct,
            sleep.efficiency_pct,
            sleep.respiratory_rate
        ],
    )?;
    Ok(())
}

fn insert_workout(conn: &Connection, workout: &Workout) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO workouts (date, sport, strain) VALUES (?1, ?2, ?3)
         ON CONFLICT(date, sport) DO UPDATE SET
            strain = excluded.strain,
            synced_at = datetime('now')",
        params![date_to_sql(workout.date), workout.sport, workout.strain],
    )?;
    Ok(())
}

impl Database {
    pub fn upsert_cycle(&self, cycle: &CycleRecord) -> StoreResult<()> {
        self.with_conn(|conn| insert_cycle(conn, cycle))
    }

    pub fn upsert_recovery(&self, recovery: &RecoveryRecord) -> StoreResult<()> {
        self.with_conn(|conn| insert_recovery(conn, recovery))
    }

    pub fn upsert_sleep(&self, sleep: &SleepRecord) -> StoreResult<()> {
        self.with_conn(|conn| insert_sleep(conn, sleep))
    }

    pub fn upsert_workout(&self, workout: &Workout) -> StoreResult<()> {
        self.with_conn(|conn| insert_workout(conn, workout))
    }

    /// Write every family present on the record in one transaction
    pub fn upsert_day(&self, record: &DailyRecord) -> StoreResult<()> {
        self.with_transaction(|tx| {
            if let Some(cycle) = &record.cycle {
                insert_cycle(tx, cycle)?;
            }
            if let Some(recovery) = &record.recovery {
                insert_recovery(tx, recovery)?;
            }
            if let Some(sleep) = &record.sleep {
                insert_sleep(tx, sleep)?;
            }
            for workout in &record.workouts {
                insert_workout(tx, workout)?;
            }
            Ok(())
        })?;
        debug!(date = %record.date, "Upserted daily record");
        Ok(())
    }

    pub fn upsert_journal(&self, entry: &JournalEntry) -> StoreResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO journal_entries (date, alcohol_units, stress_level, caffeine, late_caffeine, notes)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(date) DO UPDATE SET
                    alcohol_units = excluded.alcohol_units,
                    stress_level = excluded.stress_level,
                    caffeine = excluded.caffeine,
                    late_caffeine = excluded.late_caffeine,
                    notes = excluded.notes",
                params![
                    date_to_sql(entry.date),
                    entry.alcohol_units,
                    entry.stress_level,
                    entry.caffeine,
                    entry.late_caffeine,
                    entry.notes
                ],
            )?;
            Ok(())
        })
    }

    /// Journal entry for a single date
    pub fn journal_entry(&self, date: NaiveDate) -> StoreResult<Option<JournalEntry>> {
        self.with_conn(|conn| {
            let entry = conn
                .query_row(
                    "SELECT * FROM journal_entries WHERE date = ?1",
                    [date_to_sql(date)],
                    JournalEntry::from_row,
                )
                .optional()?;
            Ok(entry)
        })
    }
}

/// Query one family table for a date range
fn query_range<T>(
    conn: &Connection,
    table: &str,
    range: DateRange,
    from_row: fn(&Row) -> rusqlite::Result<T>,
) -> StoreResult<Vec<T>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT * FROM {} WHERE date >= ?1 AND date <= ?2 ORDER BY date",
        table
    ))?;
    let rows = stmt
        .query_map(
            params![date_to_sql(range.start), date_to_sql(range.end)],
            from_row,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn slot(days: &mut BTreeMap<NaiveDate, DailyRecord>, date: NaiveDate) -> &mut DailyRecord {
    days.entry(date).or_insert_with(|| DailyRecord::empty(date))
}

impl RecordSource for Database {
    fn day(&self, date: NaiveDate) -> StoreResult<DailyRecord> {
        let mut records = self.range(DateRange::new(date, date))?;
        Ok(records.pop().unwrap_or_else(|| DailyRecord::empty(date)))
    }

    fn range(&self, range: DateRange) -> StoreResult<Vec<DailyRecord>> {
        self.with_conn(|conn| {
            let mut days: BTreeMap<NaiveDate, DailyRecord> = BTreeMap::new();

            for cycle in query_range(conn, "cycles", range, CycleRecord::from_row)? {
                let date = cycle.date;
                slot(&mut days, date).cycle = Some(cycle);
            }
            for recovery in query_range(conn, "recovery", range, RecoveryRecord::from_row)? {
                let date = recovery.date;
                slot(&mut days, date).recovery = Some(recovery);
            }
            for sleep in query_range(conn, "sleep", range, SleepRecord::from_row)? {
                let date = sleep.date;
                slot(&mut days, date).sleep = Some(sleep);
            }
            for workout in query_range(conn, "workouts", range, Workout::from_row)? {
                let date = workout.date;
                slot(&mut days, date).workouts.push(workout);
            }

            Ok(days.into_values().collect())
        })
    }

    fn journal(&self, range: DateRange) -> StoreResult<Vec<JournalEntry>> {
        self.with_conn(|conn| query_range(conn, "journal_entries", range, JournalEntry::from_row))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Metric;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn recovery(d: &str, score: f64, hrv: f64) -> RecoveryRecord {
        RecoveryRecord {
            date: date(d),
            recovery_score: Some(score),
            hrv_ms: Some(hrv),
            resting_heart_rate: Some(52.0),
            spo2: None,
            skin_temp_celsius: None,
        }
    }

    #[test]
    fn test_upsert_is_idempotent_per_date() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_recovery(&recovery("2024-02-01", 60.0, 50.0)).unwrap();
        db.upsert_recovery(&recovery("2024-02-01", 61.0, 52.0)).unwrap();

        assert_eq!(db.stats().unwrap().recovery_days, 1);
        let day = db.day(date("2024-02-01")).unwrap();
        assert_eq!(day.value(Metric::Hrv), Some(52.0));
        assert_eq!(day.value(Metric::RecoveryScore), Some(61.0));
    }

    #[test]
    fn test_day_without_data_is_empty() {
        let db = Database::open_in_memory().unwrap();
        let day = db.day(date("2024-02-01")).unwrap();
        assert!(day.is_empty());
        assert_eq!(day.date, date("2024-02-01"));
    }

    #[test]
    fn test_range_merges_families() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_recovery(&recovery("2024-02-01", 60.0, 50.0)).unwrap();
        db.upsert_recovery(&recovery("2024-02-03", 40.0, 45.0)).unwrap();
        db.upsert_sleep(&SleepRecord {
            date: date("2024-02-03"),
            duration_minutes: Some(410.0),
            sleep_debt_minutes: None,
            performance_pct: None,
            efficiency_pct: None,
            respiratory_rate: None,
        })
        .unwrap();
        db.upsert_cycle(&CycleRecord {
            date: date("2024-02-02"),
            strain: Some(15.2),
            kilojoules: None,
            avg_heart_rate: None,
            max_heart_rate: None,
        })
        .unwrap();
        db.upsert_workout(&Workout {
            date: date("2024-02-02"),
            sport: "running".to_string(),
            strain: Some(11.0),
        })
        .unwrap();

        let days = db
            .range(DateRange::new(date("2024-02-01"), date("2024-02-03")))
            .unwrap();
        assert_eq!(days.len(), 3);
        assert_eq!(days[1].value(Metric::Strain), Some(15.2));
        assert_eq!(days[1].workouts.len(), 1);
        assert_eq!(days[2].value(Metric::SleepDuration), Some(410.0));
        assert_eq!(days[2].value(Metric::Hrv), Some(45.0));

        let series = db
            .series(Metric::Hrv, DateRange::new(date("2024-02-01"), date("2024-02-03")))
            .unwrap();
        assert_eq!(series, vec![(date("2024-02-01"), 50.0), (date("2024-02-03"), 45.0)]);
    }

    #[test]
    fn test_journal_roundtrip_and_range() {
        let db = Database::open_in_memory().unwrap();
        let entry = JournalEntry::new(date("2024-02-01")).alcohol(2).stress(4);
        db.upsert_journal(&entry).unwrap();
        db.upsert_journal(&JournalEntry::new(date("2024-02-05")).late_caffeine(true))
            .unwrap();

        assert_eq!(db.journal_entry(date("2024-02-01")).unwrap(), Some(entry));
        assert_eq!(db.journal_entry(date("2024-02-02")).unwrap(), None);

        let entries = db
            .journal(DateRange::new(date("2024-02-01"), date("2024-02-04")))
            .unwrap();
        assert_eq!(entries.len(), 1);
    }
}
