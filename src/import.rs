//! CSV Import
//!
//! Loads daily records and journal entries from CSV exports into the record
//! store. Columns are matched by header name, so any subset and order works.
//! Re-importing a file overwrites the same dates in place.
//!
//! Records columns: `date`, `recovery_score`, `hrv_ms` (or `hrv`),
//! `resting_heart_rate` (or `rhr`), `spo2`, `skin_temp_celsius` (or `skin_temp`),
//! `strain`, `kilojoules`, `avg_heart_rate`, `max_heart_rate`,
//! `sleep_minutes` (or `duration_minutes`), `sleep_debt_minutes`,
//! `sleep_performance`, `sleep_efficiency`, `respiratory_rate`.
//!
//! Journal columns: `date`, `alcohol_units` (or `alcohol`), `stress_level`
//! (or `stress`), `caffeine`, `late_caffeine`, `notes`.

use crate::store::{
    CycleRecord, DailyRecord, Database, JournalEntry, RecoveryRecord, SleepRecord, StoreError,
};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use thiserror::Error;

/// Errors that stop an import as a whole (bad rows are collected instead)
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Result of an import
#[derive(Debug, Default, serde::Serialize)]
pub struct ImportResult {
    pub rows_processed: usize,
    pub rows_failed: usize,
    pub errors: Vec<String>,
}

impl ImportResult {
    fn fail(&mut self, line: usize, message: impl std::fmt::Display) {
        self.rows_failed += 1;
        if self.errors.len() < MAX_REPORTED_ERRORS {
            self.errors.push(format!("Line {}: {}", line, message));
        }
    }
}

const MAX_REPORTED_ERRORS: usize = 100;

/// Header name to column index, normalized to snake_case
struct Columns(HashMap<String, usize>);

impl Columns {
    fn from_headers(headers: &csv::StringRecord) -> Self {
        Self(
            headers
                .iter()
                .enumerate()
                .map(|(idx, h)| (h.trim().to_lowercase().replace([' ', '-'], "_"), idx))
                .collect(),
        )
    }

    /// First non-empty cell among the aliases
    fn get<'r>(&self, record: &'r csv::StringRecord, aliases: &[&str]) -> Option<&'r str> {
        aliases
            .iter()
            .filter_map(|name| self.0.get(*name))
            .filter_map(|&idx| record.get(idx))
            .map(str::trim)
            .find(|v| !v.is_empty())
    }

    fn has_date(&self) -> bool {
        self.0.contains_key("date")
    }
}

fn number(columns: &Columns, record: &csv::StringRecord, aliases: &[&str]) -> Result<Option<f64>, String> {
    match columns.get(record, aliases) {
        Some(raw) => raw
            .parse::<f64>()
            .map(Some)
            .map_err(|_| format!("{} is not a number: {:?}", aliases[0], raw)),
        None => Ok(None),
    }
}

fn flag(columns: &Columns, record: &csv::StringRecord, aliases: &[&str]) -> Result<Option<bool>, String> {
    match columns.get(record, aliases) {
        Some(raw) => parse_bool(raw)
            .map(Some)
            .ok_or_else(|| format!("{} is not a yes/no value: {:?}", aliases[0], raw)),
        None => Ok(None),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_lowercase().as_str() {
        "true" | "yes" | "y" | "1" => Some(true),
        "false" | "no" | "n" | "0" => Some(false),
        _ => None,
    }
}

/// Parse a date, trying common export formats
pub fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    let formats = ["%Y-%m-%d", "%m/%d/%Y", "%Y/%m/%d", "%d.%m.%Y"];
    for fmt in formats {
        if let Ok(date) = NaiveDate::parse_from_str(raw, fmt) {
            return Ok(date);
        }
    }

    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Ok(dt.date());
        }
    }

    // Keep the local calendar date of the timestamp
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.date_naive());
    }

    Err(format!("Could not parse date: {}", raw))
}

fn record_from_row(columns: &Columns, row: &csv::StringRecord) -> Result<DailyRecord, String> {
    let raw_date = columns
        .get(row, &["date"])
        .ok_or_else(|| "missing date".to_string())?;
    let date = parse_date(raw_date)?;
    let num = |aliases: &[&str]| number(columns, row, aliases);

    let mut record = DailyRecord::empty(date);

    let recovery = RecoveryRecord {
        date,
        recovery_score: num(&["recovery_score", "recovery"])?,
        hrv_ms: num(&["hrv_ms", "hrv"])?,
        resting_heart_rate: num(&["resting_heart_rate", "rhr"])?,
        spo2: num(&["spo2"])?,
        skin_temp_celsius: num(&["skin_temp_celsius", "skin_temp"])?,
    };
    if recovery.recovery_score.is_some()
        || recovery.hrv_ms.is_some()
        || recovery.resting_heart_rate.is_some()
        || recovery.spo2.is_some()
        || recovery.skin_temp_celsius.is_some()
    {
        record.recovery = Some(recovery);
    }

    let cycle = CycleRecord {
        date,
        strain: num(&["strain", "day_strain"])?,
        kilojoules: num(&["kilojoules", "kj"])?,
        avg_heart_rate: num(&["avg_heart_rate"])?.map(|v| v.round() as i64),
        max_heart_rate: num(&["max_heart_rate"])?.map(|v| v.round() as i64),
    };
    if cycle.strain.is_some()
        || cycle.kilojoules.is_some()
        || cycle.avg_heart_rate.is_some()
        || cycle.max_heart_rate.is_some()
    {
        record.cycle = Some(cycle);
    }

    let sleep = SleepRecord {
        date,
        duration_minutes: num(&["sleep_minutes", "duration_minutes", "sleep_duration"])?,
        sleep_debt_minutes: num(&["sleep_debt_minutes", "sleep_debt"])?,
        performance_pct: num(&["sleep_performance", "performance_pct"])?,
        efficiency_pct: num(&["sleep_efficiency", "efficiency_pct"])?,
        respiratory_rate: num(&["respiratory_rate"])?,
    };
    if sleep.duration_minutes.is_some()
        || sleep.sleep_debt_minutes.is_some()
        || sleep.performance_pct.is_some()
        || sleep.efficiency_pct.is_some()
        || sleep.respiratory_rate.is_some()
    {
        record.sleep = Some(sleep);
    }

    Ok(record)
}

fn journal_from_row(columns: &Columns, row: &csv::StringRecord) -> Result<JournalEntry, String> {
    let raw_date = columns
        .get(row, &["date"])
        .ok_or_else(|| "missing date".to_string())?;
    let mut entry = JournalEntry::new(parse_date(raw_date)?);

    // "alcohol" may be a yes/no answer or a unit count
    if let Some(raw) = columns.get(row, &["alcohol_units", "alcohol"]) {
        entry.alcohol_units = Some(match parse_bool(raw) {
            Some(drank) => u32::from(drank),
            None => raw
                .parse::<u32>()
                .map_err(|_| format!("alcohol is not a count or yes/no: {:?}", raw))?,
        });
    }

    if let Some(raw) = columns.get(row, &["stress_level", "stress"]) {
        let level = raw
            .parse::<u8>()
            .ok()
            .filter(|l| (1..=5).contains(l))
            .ok_or_else(|| format!("stress must be 1-5, got {:?}", raw))?;
        entry.stress_level = Some(level);
    }

    entry.caffeine = flag(columns, row, &["caffeine"])?;
    entry.late_caffeine = flag(columns, row, &["late_caffeine"])?;
    entry.notes = columns.get(row, &["notes", "note"]).map(str::to_string);

    Ok(entry)
}

/// Parse every row with `parse`, collecting failures instead of stopping
fn parse_rows<R, T, F>(reader: R, parse: F) -> Result<(Vec<T>, ImportResult), ImportError>
where
    R: Read,
    F: Fn(&Columns, &csv::StringRecord) -> Result<T, String>,
{
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let columns = Columns::from_headers(reader.headers()?);
    if !columns.has_date() {
        return Err(ImportError::Parse("CSV header has no date column".to_string()));
    }

    let mut rows = Vec::new();
    let mut result = ImportResult::default();

    for (idx, row) in reader.records().enumerate() {
        let line = idx + 2;
        let row = match row {
            Ok(r) => r,
            Err(e) => {
                result.fail(line, e);
                continue;
            }
        };
        match parse(&columns, &row) {
            Ok(value) => {
                rows.push(value);
                result.rows_processed += 1;
            }
            Err(e) => result.fail(line, e),
        }
    }

    Ok((rows, result))
}

/// Parse daily records without touching the store
pub fn parse_records<R: Read>(reader: R) -> Result<(Vec<DailyRecord>, ImportResult), ImportError> {
    parse_rows(reader, record_from_row)
}

/// Parse journal entries without touching the store
pub fn parse_journal<R: Read>(reader: R) -> Result<(Vec<JournalEntry>, ImportResult), ImportError> {
    parse_rows(reader, journal_from_row)
}

/// Imports CSV exports into a database
pub struct CsvImporter<'a> {
    db: &'a Database,
}

impl<'a> CsvImporter<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Upsert one day per valid row
    pub fn import_records<R: Read>(&self, reader: R) -> Result<ImportResult, ImportError> {
        let (records, result) = parse_records(reader)?;
        for record in records.iter().filter(|r| !r.is_empty()) {
            self.db.upsert_day(record)?;
        }
        tracing::info!(
            rows = result.rows_processed,
            failed = result.rows_failed,
            "Imported daily records"
        );
        Ok(result)
    }

    pub fn import_records_path(&self, path: &Path) -> Result<ImportResult, ImportError> {
        let file = std::fs::File::open(path).map_err(csv::Error::from)?;
        self.import_records(file)
    }

    /// Upsert one journal entry per valid row
    pub fn import_journal<R: Read>(&self, reader: R) -> Result<ImportResult, ImportError> {
        let (entries, result) = parse_journal(reader)?;
        for entry in &entries {
            self.db.upsert_journal(entry)?;
        }
        tracing::info!(
            rows = result.rows_processed,
            failed = result.rows_failed,
            "Imported journal entries"
        );
        Ok(result)
    }

    pub fn import_journal_path(&self, path: &Path) -> Result<ImportResult, ImportError> {
        let file = std::fs::File::open(path).map_err(csv::Error::from)?;
        self.import_journal(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::RecordSource;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_records_by_header_name() {
        let csv_data = "Date,HRV,Recovery Score,strain,sleep_minutes
2024-01-15,55.2,71,12.4,452
2024-01-16,48.0,,9.1,
01/17/2024,,,,";

        let (records, result) = parse_records(csv_data.as_bytes()).unwrap();
        assert_eq!(result.rows_processed, 3);
        assert_eq!(result.rows_failed, 0);

        let first = &records[0];
        assert_eq!(first.date, date("2024-01-15"));
        assert_eq!(first.recovery.as_ref().unwrap().hrv_ms, Some(55.2));
        assert_eq!(first.recovery.as_ref().unwrap().recovery_score, Some(71.0));
        assert_eq!(first.cycle.as_ref().unwrap().strain, Some(12.4));
        assert_eq!(first.sleep.as_ref().unwrap().duration_minutes, Some(452.0));

        assert!(records[1].sleep.is_none());
        assert_eq!(records[2].date, date("2024-01-17"));
        assert!(records[2].is_empty());
    }

    #[test]
    fn test_bad_rows_are_collected() {
        let csv_data = "date,hrv
2024-01-15,55
not-a-date,50
2024-01-17,high";

        let (records, result) = parse_records(csv_data.as_bytes()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(result.rows_failed, 2);
        assert!(result.errors[0].starts_with("Line 3"));
        assert!(result.errors[1].contains("hrv_ms is not a number"));
    }

    #[test]
    fn test_missing_date_column() {
        let err = parse_records("hrv,strain\n50,10".as_bytes()).unwrap_err();
        assert!(matches!(err, ImportError::Parse(_)));
    }

    #[test]
    fn test_journal_answers() {
        let csv_data = "date,alcohol,stress,late_caffeine,notes
2024-01-15,yes,4,no,late dinner
2024-01-16,3,,,
2024-01-17,0,9,,";

        let (entries, result) = parse_journal(csv_data.as_bytes()).unwrap();
        assert_eq!(result.rows_processed, 2);
        assert_eq!(result.rows_failed, 1);

        assert_eq!(entries[0].alcohol_units, Some(1));
        assert_eq!(entries[0].stress_level, Some(4));
        assert_eq!(entries[0].late_caffeine, Some(false));
        assert_eq!(entries[0].notes.as_deref(), Some("late dinner"));
        assert_eq!(entries[1].alcohol_units, Some(3));
        assert_eq!(entries[1].stress_level, None);
    }

    #[test]
    fn test_import_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let importer = CsvImporter::new(&db);
        let csv_data = "date,hrv,rhr\n2024-01-15,55,50\n2024-01-16,52,51\n";

        importer.import_records(csv_data.as_bytes()).unwrap();
        importer.import_records(csv_data.as_bytes()).unwrap();

        let stats = db.stats().unwrap();
        assert_eq!(stats.recovery_days, 2);
        let day = db.day(date("2024-01-16")).unwrap();
        assert_eq!(day.recovery.unwrap().resting_heart_rate, Some(51.0));
    }

    #[test]
    fn test_import_journal_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.csv");
        std::fs::write(&path, "date,alcohol_units,stress_level\n2024-01-15,2,3\n").unwrap();

        let db = Database::open_in_memory().unwrap();
        let result = CsvImporter::new(&db).import_journal_path(&path).unwrap();
        assert_eq!(result.rows_processed, 1);
        let entry = db.journal_entry(date("2024-01-15")).unwrap().unwrap();
        assert_eq!(entry.alcohol_units, Some(2));
    }
}
