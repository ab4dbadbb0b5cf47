//! Flag instance persistence
//!
//! Writes are guarded by the row's `version` column: an update or delete only
//! applies if the stored version still matches what the caller read. The
//! partial unique index on active rows turns a racing insert into a conflict.

use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use tracing::debug;

use super::{date_from_row, date_to_sql, Database, StoreError, StoreResult};
use crate::engine::lifecycle::{FlagInstance, FlagState, FlagStore};
use crate::engine::rules::FlagType;

const COLUMNS: &str = "flag_type, state, first_triggered_date, last_triggered_date, \
                       last_evaluated_date, resolved_date, consecutive_trigger_count, \
                       consecutive_clear_count, version";

fn parse_column<T>(row: &Row, idx: &str) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    let raw: String = row.get(idx)?;
    raw.parse::<T>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            Box::new(StoreError::Corruption(e)),
        )
    })
}

impl FlagInstance {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let resolved: Option<String> = row.get("resolved_date")?;
        let resolved_date = match resolved {
            Some(_) => Some(date_from_row(row, "resolved_date")?),
            None => None,
        };
        let trigger_count: i64 = row.get("consecutive_trigger_count")?;
        let clear_count: i64 = row.get("consecutive_clear_count")?;

        Ok(Self {
            flag_type: parse_column(row, "flag_type")?,
            state: parse_column(row, "state")?,
            first_triggered_date: date_from_row(row, "first_triggered_date")?,
            last_triggered_date: date_from_row(row, "last_triggered_date")?,
            last_evaluated_date: date_from_row(row, "last_evaluated_date")?,
            resolved_date,
            consecutive_trigger_count: trigger_count.max(0) as u32,
            consecutive_clear_count: clear_count.max(0) as u32,
            version: row.get("version")?,
        })
    }
}

fn conflict(flag_type: FlagType, reason: impl Into<String>) -> StoreError {
    StoreError::Conflict {
        flag_type: flag_type.name().to_string(),
        reason: reason.into(),
    }
}

/// Map a unique-index violation to a conflict, pass everything else through
fn map_constraint(flag_type: FlagType, err: rusqlite::Error) -> StoreError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation => {
            conflict(flag_type, "another active instance exists")
        }
        _ => StoreError::Sqlite(err),
    }
}

fn insert_instance(conn: &Connection, instance: &FlagInstance) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO flag_instances (flag_type, state, first_triggered_date, last_triggered_date,
                                     last_evaluated_date, resolved_date, consecutive_trigger_count,
                                     consecutive_clear_count, version)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0)",
        params![
            instance.flag_type.name(),
            instance.state.name(),
            date_to_sql(instance.first_triggered_date),
            date_to_sql(instance.last_triggered_date),
            date_to_sql(instance.last_evaluated_date),
            instance.resolved_date.map(date_to_sql),
            instance.consecutive_trigger_count,
            instance.consecutive_clear_count,
        ],
    )
    .map_err(|e| map_constraint(instance.flag_type, e))?;
    Ok(())
}

fn update_instance(conn: &Connection, prior: &FlagInstance, next: &FlagInstance) -> StoreResult<()> {
    let changed = conn
        .execute(
            "UPDATE flag_instances SET
                state = ?3,
                last_triggered_date = ?4,
                last_evaluated_date = ?5,
                resolved_date = ?6,
                consecutive_trigger_count = ?7,
                consecutive_clear_count = ?8,
                version = version + 1,
                updated_at = datetime('now')
             WHERE flag_type = ?1 AND first_triggered_date = ?2 AND version = ?9",
            params![
                next.flag_type.name(),
                date_to_sql(next.first_triggered_date),
                next.state.name(),
                date_to_sql(next.last_triggered_date),
                date_to_sql(next.last_evaluated_date),
                next.resolved_date.map(date_to_sql),
                next.consecutive_trigger_count,
                next.consecutive_clear_count,
                prior.version,
            ],
        )
        .map_err(|e| map_constraint(next.flag_type, e))?;

    if changed == 0 {
        return Err(conflict(prior.flag_type, "stored version changed"));
    }
    Ok(())
}

fn delete_instance(conn: &Connection, prior: &FlagInstance) -> StoreResult<()> {
    let changed = conn.execute(
        "DELETE FROM flag_instances
         WHERE flag_type = ?1 AND first_triggered_date = ?2 AND version = ?3
           AND state != 'resolved'",
        params![
            prior.flag_type.name(),
            date_to_sql(prior.first_triggered_date),
            prior.version,
        ],
    )?;

    if changed == 0 {
        return Err(conflict(prior.flag_type, "instance already replaced"));
    }
    Ok(())
}

impl Database {
    /// Flag instances, optionally restricted to one state, oldest first
    pub fn list_flags(&self, state: Option<FlagState>) -> StoreResult<Vec<FlagInstance>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM flag_instances
                 WHERE (?1 IS NULL OR state = ?1)
                 ORDER BY first_triggered_date ASC, flag_type ASC",
                COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![state.map(|s| s.name())], FlagInstance::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

impl FlagStore for Database {
    fn active(&self, flag_type: FlagType) -> StoreResult<Option<FlagInstance>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM flag_instances WHERE flag_type = ?1 AND state != 'resolved'",
                COLUMNS
            );
            let instance = conn
                .query_row(&sql, params![flag_type.name()], FlagInstance::from_row)
                .optional()?;
            Ok(instance)
        })
    }

    fn commit(
        &self,
        prior: Option<&FlagInstance>,
        next: Option<&FlagInstance>,
    ) -> StoreResult<()> {
        self.with_transaction(|tx| {
            match (prior, next) {
                (None, None) => {}
                (None, Some(next)) => insert_instance(tx, next)?,
                (Some(prior), Some(next)) if prior.same_row(next) => {
                    update_instance(tx, prior, next)?
                }
                (Some(prior), next) => {
                    delete_instance(tx, prior)?;
                    if let Some(next) = next {
                        insert_instance(tx, next)?;
                    }
                }
            }

            debug!(
                flag_type = ?prior.or(next).map(|f| f.flag_type),
                state = ?next.map(|f| f.state),
                "Committed flag instance"
            );
            Ok(())
        })
    }

    fn latest(&self, flag_type: FlagType) -> StoreResult<Option<FlagInstance>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM flag_instances WHERE flag_type = ?1
                 ORDER BY (state != 'resolved') DESC, first_triggered_date DESC
                 LIMIT 1",
                COLUMNS
            );
            let instance = conn
                .query_row(&sql, params![flag_type.name()], FlagInstance::from_row)
                .optional()?;
            Ok(instance)
        })
    }

    fn open_flags(&self) -> StoreResult<Vec<FlagInstance>> {
        self.list_flags(Some(FlagState::Open))
    }

    fn history(&self, flag_type: FlagType) -> StoreResult<Vec<FlagInstance>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM flag_instances WHERE flag_type = ?1
                 ORDER BY first_triggered_date ASC",
                COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![flag_type.name()], FlagInstance::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn observing(flag_type: FlagType, d: &str) -> FlagInstance {
        FlagInstance::start(flag_type, date(d))
    }

    #[test]
    fn test_insert_then_update_bumps_version() {
        let db = Database::open_in_memory().unwrap();
        let first = observing(FlagType::HrvDrop, "2024-02-01");
        db.commit(None, Some(&first)).unwrap();

        let stored = db.active(FlagType::HrvDrop).unwrap().unwrap();
        assert_eq!(stored.version, 0);
        assert_eq!(stored.state, FlagState::Observing);

        let mut next = stored.clone();
        next.consecutive_trigger_count = 2;
        next.last_triggered_date = date("2024-02-02");
        next.last_evaluated_date = date("2024-02-02");
        db.commit(Some(&stored), Some(&next)).unwrap();

        let stored = db.active(FlagType::HrvDrop).unwrap().unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(stored.consecutive_trigger_count, 2);
        assert_eq!(stored.last_evaluated_date, date("2024-02-02"));
    }

    #[test]
    fn test_stale_prior_conflicts() {
        let db = Database::open_in_memory().unwrap();
        db.commit(None, Some(&observing(FlagType::SleepDebt, "2024-02-01")))
            .unwrap();
        let read_a = db.active(FlagType::SleepDebt).unwrap().unwrap();
        let read_b = read_a.clone();

        let mut next_a = read_a.clone();
        next_a.consecutive_trigger_count = 2;
        db.commit(Some(&read_a), Some(&next_a)).unwrap();

        let mut next_b = read_b.clone();
        next_b.consecutive_trigger_count = 5;
        let err = db.commit(Some(&read_b), Some(&next_b)).unwrap_err();
        assert!(err.is_conflict());

        let stored = db.active(FlagType::SleepDebt).unwrap().unwrap();
        assert_eq!(stored.consecutive_trigger_count, 2);
    }

    #[test]
    fn test_racing_insert_conflicts() {
        let db = Database::open_in_memory().unwrap();
        db.commit(None, Some(&observing(FlagType::TempSpike, "2024-02-01")))
            .unwrap();

        let err = db
            .commit(None, Some(&observing(FlagType::TempSpike, "2024-02-03")))
            .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(db.history(FlagType::TempSpike).unwrap().len(), 1);
    }

    #[test]
    fn test_discard_deletes_observing_row() {
        let db = Database::open_in_memory().unwrap();
        db.commit(None, Some(&observing(FlagType::HrvDrop, "2024-02-01")))
            .unwrap();
        let stored = db.active(FlagType::HrvDrop).unwrap().unwrap();

        db.commit(Some(&stored), None).unwrap();
        assert!(db.active(FlagType::HrvDrop).unwrap().is_none());

        // Deleting again with the same stale read is a conflict, not a silent no-op
        assert!(db.commit(Some(&stored), None).unwrap_err().is_conflict());
    }

    #[test]
    fn test_replace_with_fresh_instance() {
        let db = Database::open_in_memory().unwrap();
        db.commit(None, Some(&observing(FlagType::HrvDrop, "2024-02-01")))
            .unwrap();
        let stored = db.active(FlagType::HrvDrop).unwrap().unwrap();

        let fresh = observing(FlagType::HrvDrop, "2024-02-05");
        db.commit(Some(&stored), Some(&fresh)).unwrap();

        let active = db.active(FlagType::HrvDrop).unwrap().unwrap();
        assert_eq!(active.first_triggered_date, date("2024-02-05"));
        assert_eq!(db.history(FlagType::HrvDrop).unwrap().len(), 1);
    }

    #[test]
    fn test_resolved_rows_leave_active_slot_free() {
        let db = Database::open_in_memory().unwrap();
        db.commit(None, Some(&observing(FlagType::RecoveryRedStreak, "2024-01-01")))
            .unwrap();
        let stored = db.active(FlagType::RecoveryRedStreak).unwrap().unwrap();

        let mut open = stored.clone();
        open.state = FlagState::Open;
        db.commit(Some(&stored), Some(&open)).unwrap();
        assert_eq!(db.open_flags().unwrap().len(), 1);

        let stored = db.active(FlagType::RecoveryRedStreak).unwrap().unwrap();
        let mut resolved = stored.clone();
        resolved.state = FlagState::Resolved;
        resolved.resolved_date = Some(date("2024-01-09"));
        db.commit(Some(&stored), Some(&resolved)).unwrap();

        assert!(db.active(FlagType::RecoveryRedStreak).unwrap().is_none());
        assert!(db.open_flags().unwrap().is_empty());

        db.commit(None, Some(&observing(FlagType::RecoveryRedStreak, "2024-02-01")))
            .unwrap();
        let history = db.history(FlagType::RecoveryRedStreak).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].resolved_date, Some(date("2024-01-09")));
        assert_eq!(
            db.list_flags(Some(FlagState::Resolved)).unwrap().len(),
            1
        );
        assert_eq!(db.list_flags(None).unwrap().len(), 2);
    }

    #[test]
    fn test_latest_prefers_active_then_newest_resolved() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.latest(FlagType::HrvDrop).unwrap().is_none());

        for first in ["2024-01-01", "2024-01-10"] {
            db.commit(None, Some(&observing(FlagType::HrvDrop, first)))
                .unwrap();
            let stored = db.active(FlagType::HrvDrop).unwrap().unwrap();
            let mut resolved = stored.clone();
            resolved.state = FlagState::Resolved;
            resolved.resolved_date = Some(stored.first_triggered_date);
            db.commit(Some(&stored), Some(&resolved)).unwrap();
        }
        let latest = db.latest(FlagType::HrvDrop).unwrap().unwrap();
        assert_eq!(latest.first_triggered_date, date("2024-01-10"));
        assert_eq!(latest.state, FlagState::Resolved);

        db.commit(None, Some(&observing(FlagType::HrvDrop, "2024-01-20")))
            .unwrap();
        let latest = db.latest(FlagType::HrvDrop).unwrap().unwrap();
        assert_eq!(latest.state, FlagState::Observing);
        assert_eq!(latest.first_triggered_date, date("2024-01-20"));
    }
}
