//! End-to-end tests: CSV import, evaluation over many days, reports and
//! persistence across reopening the store.

use chrono::{Duration, NaiveDate};
use std::collections::HashMap;
use std::sync::Arc;
use tempfile::tempdir;
use vigil::{
    Config, CsvImporter, Database, Engine, FlagState, FlagTransition, FlagType, JournalFactor,
    Metric, ReportCadence,
};

fn day(n: i64) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 5, 1).unwrap() + Duration::days(n - 1)
}

/// Ten green days, three red, two green, three red
fn recovery_plan() -> Vec<(i64, f64)> {
    let mut plan: Vec<(i64, f64)> = (1..=10).map(|n| (n, 60.0)).collect();
    plan.extend([(11, 25.0), (12, 25.0), (13, 25.0)]);
    plan.extend([(14, 60.0), (15, 60.0)]);
    plan.extend([(16, 25.0), (17, 25.0), (18, 25.0)]);
    plan
}

fn records_csv() -> String {
    let mut csv = String::from("date,recovery_score\n");
    for (n, score) in recovery_plan() {
        csv.push_str(&format!("{},{}\n", day(n), score));
    }
    csv
}

/// Alcohol logged on exactly the red days
fn journal_csv() -> String {
    let mut csv = String::from("date,alcohol_units,stress_level\n");
    for (n, score) in recovery_plan() {
        let units = if score < 33.0 { 2 } else { 0 };
        csv.push_str(&format!("{},{},2\n", day(n), units));
    }
    csv
}

fn setup(dir: &std::path::Path) -> (Arc<Database>, Engine) {
    let db = Arc::new(Database::open(dir).unwrap());
    let importer = CsvImporter::new(&db);
    let result = importer.import_records(records_csv().as_bytes()).unwrap();
    assert_eq!(result.rows_failed, 0);
    importer.import_journal(journal_csv().as_bytes()).unwrap();

    let engine = Engine::new(db.clone(), &config()).unwrap();
    (db, engine)
}

fn config() -> Config {
    let mut config = Config::default();
    config.correlation.lookback_days = 14;
    config
}

#[test]
fn test_open_resolve_reopen_cycle() {
    let dir = tempdir().unwrap();
    let (db, engine) = setup(dir.path());

    let passes = engine.evaluate_range(day(11), day(18)).unwrap();
    let events: Vec<(NaiveDate, FlagType, FlagTransition)> = passes
        .iter()
        .flat_map(|p| p.events.iter().map(move |e| (p.date, e.flag_type, e.transition)))
        .collect();

    assert_eq!(
        events,
        vec![
            (day(13), FlagType::RecoveryRedStreak, FlagTransition::Opened),
            (day(15), FlagType::RecoveryRedStreak, FlagTransition::Resolved),
            (day(18), FlagType::RecoveryRedStreak, FlagTransition::Opened),
        ]
    );
    assert!(passes.iter().all(|p| p.is_clean()));

    let history = engine.flag_history(FlagType::RecoveryRedStreak).unwrap();
    assert_eq!(history.len(), 2);
    let resolved = history
        .iter()
        .find(|f| f.state == FlagState::Resolved)
        .unwrap();
    assert_eq!(resolved.first_triggered_date, day(11));
    assert_eq!(resolved.resolved_date, Some(day(15)));
    let open = history.iter().find(|f| f.state == FlagState::Open).unwrap();
    assert_eq!(open.first_triggered_date, day(16));

    assert_eq!(db.list_flags(Some(FlagState::Resolved)).unwrap().len(), 1);
}

#[test]
fn test_reevaluation_emits_nothing() {
    let dir = tempdir().unwrap();
    let (db, engine) = setup(dir.path());

    engine.evaluate_range(day(11), day(18)).unwrap();
    let rows_before = db.stats().unwrap().flag_instances;
    let open_before = engine.open_flags().unwrap();

    let again = engine.evaluate_range(day(11), day(18)).unwrap();
    assert!(again.iter().all(|p| p.events.is_empty()));
    assert_eq!(db.stats().unwrap().flag_instances, rows_before);
    assert_eq!(engine.open_flags().unwrap(), open_before);
}

#[test]
fn test_replaying_a_resolved_episode_is_a_no_op() {
    let dir = tempdir().unwrap();
    let (db, engine) = setup(dir.path());

    let first = engine.evaluate_range(day(11), day(15)).unwrap();
    let transitions: Vec<FlagTransition> = first
        .iter()
        .flat_map(|p| p.events.iter().map(|e| e.transition))
        .collect();
    assert_eq!(
        transitions,
        vec![FlagTransition::Opened, FlagTransition::Resolved]
    );
    assert!(engine.open_flags().unwrap().is_empty());
    let history = engine.flag_history(FlagType::RecoveryRedStreak).unwrap();

    // Overlapping manual re-run of the same days
    let replay = engine.evaluate_range(day(11), day(15)).unwrap();
    assert!(replay.iter().all(|p| p.events.is_empty()));
    assert!(replay.iter().all(|p| p.is_clean()));
    assert_eq!(
        engine.flag_history(FlagType::RecoveryRedStreak).unwrap(),
        history
    );
    assert_eq!(db.list_flags(Some(FlagState::Observing)).unwrap().len(), 0);

    // The next episode still opens normally
    let later = engine.evaluate_range(day(16), day(18)).unwrap();
    assert_eq!(later[2].events.len(), 1);
    assert_eq!(later[2].events[0].transition, FlagTransition::Opened);
}

#[test]
fn test_at_most_one_active_instance_per_type() {
    let dir = tempdir().unwrap();
    let (db, engine) = setup(dir.path());

    for n in 1..=18 {
        engine.evaluate(day(n)).unwrap();

        let mut active: HashMap<FlagType, usize> = HashMap::new();
        for state in [FlagState::Observing, FlagState::Open] {
            for flag in db.list_flags(Some(state)).unwrap() {
                *active.entry(flag.flag_type).or_default() += 1;
            }
        }
        assert!(
            active.values().all(|&count| count <= 1),
            "day {}: {:?}",
            n,
            active
        );
    }
}

#[test]
fn test_state_survives_reopen() {
    let dir = tempdir().unwrap();
    {
        let (_db, engine) = setup(dir.path());
        engine.evaluate_range(day(11), day(18)).unwrap();
    }

    let db = Arc::new(Database::open(dir.path()).unwrap());
    let engine = Engine::new(db.clone(), &config()).unwrap();
    let open = engine.open_flags().unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].consecutive_trigger_count, 3);

    // Another red day extends the open flag without a new alert
    CsvImporter::new(&db)
        .import_records(format!("date,recovery_score\n{},20\n", day(19)).as_bytes())
        .unwrap();
    let pass = engine.evaluate(day(19)).unwrap();
    assert!(pass.events.is_empty());
    assert_eq!(
        engine.open_flags().unwrap()[0].consecutive_trigger_count,
        4
    );
}

#[test]
fn test_weekly_report() {
    let dir = tempdir().unwrap();
    let (_db, engine) = setup(dir.path());

    let run = engine.run(day(13), ReportCadence::Weekly).unwrap();
    assert_eq!(run.pass.events.len(), 0, "no streak without the earlier days");

    engine.evaluate_range(day(11), day(17)).unwrap();
    let run = engine.run(day(18), ReportCadence::Weekly).unwrap();
    assert_eq!(run.pass.events.len(), 1);

    let report = run.report;
    assert_eq!(report.today.unwrap().value(Metric::RecoveryScore), Some(25.0));
    assert_eq!(report.open_flags.len(), 1);
    assert_eq!(report.open_flags[0].first_triggered_date, day(16));

    let correlations = report.correlations.unwrap();
    let alcohol = correlations
        .iter()
        .find(|c| {
            c.factor == JournalFactor::Alcohol && c.metric == Metric::RecoveryScore && c.lag_days == 0
        })
        .unwrap();
    assert!(alcohol.is_sufficient());
    assert_eq!((alcohol.present.count, alcohol.absent.count), (6, 8));
    assert_eq!(alcohol.median_delta, Some(-35.0));

    // Sufficient results sort ahead of insufficient ones
    let first_insufficient = correlations
        .iter()
        .position(|c| !c.is_sufficient())
        .unwrap_or(correlations.len());
    assert!(correlations[first_insufficient..]
        .iter()
        .all(|c| !c.is_sufficient()));
}
