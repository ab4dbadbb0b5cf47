//! Vigil CLI
//!
//! Command-line interface for the Vigil engine:
//! - Evaluate flags and print reports
//! - Inspect baselines, flags and correlations
//! - Import CSV exports
//! - Serve the API with the daily scheduler

use anyhow::{bail, Context, Result};
use chrono::{Duration, Local, NaiveDate};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

use vigil::api::{self, AppState};
use vigil::config::{generate_default_config, Config};
use vigil::engine::{BaselineWindow, CorrelationResult, EvaluationPass, FlagInstance};
use vigil::import::{CsvImporter, ImportResult};
use vigil::notify;
use vigil::scheduler::ReportScheduler;
use vigil::{Database, Engine, FlagState, FlagType, Metric, ReportCadence};

#[derive(Parser)]
#[command(name = "vigil")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Biometric trend and anomaly detection")]
#[command(long_about = "Vigil keeps rolling personal baselines over daily wearable data,\nflags sustained deviations and relates them to your journal.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: ~/.config/vigil/config.toml, then ./config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the data directory
    #[arg(long, global = true)]
    pub data_dir: Option<String>,

    /// Output format (table, json)
    #[arg(short, long, default_value = "table", global = true)]
    pub format: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Evaluate every rule for a date, or each date in a range
    Evaluate {
        /// Date (YYYY-MM-DD, "today", "yesterday"); default today
        #[arg(short, long, value_parser = parse_day)]
        date: Option<NaiveDate>,
        /// Last date of a range starting at --date
        #[arg(long, value_parser = parse_day)]
        to: Option<NaiveDate>,
    },

    /// Evaluate a date, then print or deliver its report
    Run {
        #[arg(short, long, value_parser = parse_day)]
        date: Option<NaiveDate>,
        /// Weekly report with journal correlations
        #[arg(short, long)]
        weekly: bool,
        /// Deliver through the configured notifier instead of printing
        #[arg(long)]
        notify: bool,
    },

    /// Print the report for a date without evaluating
    Report {
        #[arg(short, long, value_parser = parse_day)]
        date: Option<NaiveDate>,
        #[arg(short, long)]
        weekly: bool,
    },

    /// Rolling baseline for one metric
    Baseline {
        /// hrv, recovery_score, resting_heart_rate, sleep_duration, sleep_debt, skin_temp, strain
        metric: String,
        #[arg(short, long, value_parser = parse_day)]
        date: Option<NaiveDate>,
    },

    /// List flags (active by default)
    Flags {
        /// Every instance of one flag type
        #[arg(long)]
        history: Option<String>,
        /// Only flags in this state (observing, open, resolved)
        #[arg(long)]
        state: Option<String>,
    },

    /// Journal factor effects over the lookback window
    Correlations {
        #[arg(short, long, value_parser = parse_day)]
        date: Option<NaiveDate>,
    },

    /// Import a CSV export
    Import {
        #[command(subcommand)]
        kind: ImportKind,
    },

    /// Show store row counts
    Stats,

    /// Run the API server and the daily scheduler
    Serve {
        /// Serve the API only
        #[arg(long)]
        no_scheduler: bool,
    },

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum ImportKind {
    /// Daily records (recovery, sleep, strain columns)
    Records { path: PathBuf },
    /// Journal answers (alcohol, stress, caffeine columns)
    Journal { path: PathBuf },
}

fn parse_day(s: &str) -> Result<NaiveDate, String> {
    let today = Local::now().date_naive();
    match s {
        "today" => Ok(today),
        "yesterday" => Ok(today - Duration::days(1)),
        _ => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map_err(|_| format!("expected YYYY-MM-DD, today or yesterday, got {:?}", s)),
    }
}

fn today_or(date: Option<NaiveDate>) -> NaiveDate {
    date.unwrap_or_else(|| Local::now().date_naive())
}

fn cadence(weekly: bool) -> ReportCadence {
    if weekly {
        ReportCadence::Weekly
    } else {
        ReportCadence::Daily
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Config { output } = &cli.command {
        let content = generate_default_config();
        match output {
            Some(path) => {
                std::fs::write(path, content)
                    .with_context(|| format!("writing {}", path.display()))?;
                println!("Config written to {}", path.display());
            }
            None => print!("{}", content),
        }
        return Ok(());
    }

    let mut config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };
    if let Some(dir) = &cli.data_dir {
        config.storage.data_dir = dir.clone();
    }
    config.validate()?;
    vigil::logging::init(&config.logging)?;

    let json = match cli.format.as_str() {
        "json" => true,
        "table" => false,
        other => bail!("unknown output format {:?} (expected table or json)", other),
    };

    let data_dir = config.storage.data_dir_path();
    let db = Arc::new(
        Database::open(&data_dir)
            .with_context(|| format!("opening store in {}", data_dir.display()))?,
    );
    let engine = Arc::new(Engine::new(db.clone(), &config)?);

    match cli.command {
        Commands::Evaluate { date, to } => {
            let start = today_or(date);
            let passes = match to {
                Some(end) => engine.evaluate_range(start, end)?,
                None => vec![engine.evaluate(start)?],
            };
            if json {
                print_json(&passes)?;
            } else {
                passes.iter().for_each(print_pass);
            }
            if passes.iter().any(|p| !p.is_clean()) {
                bail!("some rules could not be persisted; re-run to retry");
            }
        }

        Commands::Run {
            date,
            weekly,
            notify: deliver,
        } => {
            let date = today_or(date);
            if deliver {
                let notifier = notify::from_config(&config.notify)?;
                let scheduler = ReportScheduler::new(engine.clone(), notifier, &config)?;
                let run = scheduler.run_for(date, cadence(weekly)).await?;
                println!(
                    "Delivered {} report for {} ({} events)",
                    run.report.cadence,
                    date,
                    run.pass.events.len()
                );
            } else {
                let run = engine.run(date, cadence(weekly))?;
                if json {
                    print_json(&run)?;
                } else {
                    print_pass(&run.pass);
                    println!();
                    println!("{}", notify::format_report(&run.report, None));
                }
            }
        }

        Commands::Report { date, weekly } => {
            let report = engine.report(today_or(date), cadence(weekly))?;
            if json {
                print_json(&report)?;
            } else {
                println!("{}", notify::format_report(&report, None));
            }
        }

        Commands::Baseline { metric, date } => {
            let metric: Metric = metric.parse().map_err(anyhow::Error::msg)?;
            let window = engine.baseline(metric, today_or(date))?;
            if json {
                print_json(&window)?;
            } else {
                print_baseline(&window);
            }
        }

        Commands::Flags { history, state } => {
            let flags = match (history, state) {
                (Some(raw), _) => {
                    let flag_type: FlagType = raw.parse().map_err(anyhow::Error::msg)?;
                    engine.flag_history(flag_type)?
                }
                (None, Some(raw)) => {
                    let state: FlagState = raw.parse().map_err(anyhow::Error::msg)?;
                    db.list_flags(Some(state))?
                }
                (None, None) => engine.open_flags()?,
            };
            if json {
                print_json(&flags)?;
            } else {
                print_flags(&flags);
            }
        }

        Commands::Correlations { date } => {
            let results = engine.correlations(today_or(date))?;
            if json {
                print_json(&results)?;
            } else {
                print_correlations(&results);
            }
        }

        Commands::Import { kind } => {
            let importer = CsvImporter::new(&db);
            let result = match &kind {
                ImportKind::Records { path } => importer.import_records_path(path)?,
                ImportKind::Journal { path } => importer.import_journal_path(path)?,
            };
            if json {
                print_json(&result)?;
            } else {
                print_import(&result);
            }
        }

        Commands::Stats => {
            let stats = db.stats()?;
            if json {
                print_json(&stats)?;
            } else {
                println!("Vigil v{}", env!("CARGO_PKG_VERSION"));
                println!("Data directory: {}", data_dir.display());
                println!("{}", stats);
            }
        }

        Commands::Serve { no_scheduler } => {
            tracing::info!("Vigil v{}", env!("CARGO_PKG_VERSION"));

            let scheduler = if config.schedule.enabled && !no_scheduler {
                let notifier = notify::from_config(&config.notify)?;
                let scheduler = Arc::new(ReportScheduler::new(engine.clone(), notifier, &config)?);
                let handle = scheduler.clone().start();
                Some((scheduler, handle))
            } else {
                None
            };

            api::serve(AppState::new(engine, db), &config.api).await?;

            if let Some((scheduler, handle)) = scheduler {
                scheduler.stop().await;
                handle.abort();
            }
        }

        // Handled before the store is opened
        Commands::Config { .. } => {}
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_pass(pass: &EvaluationPass) {
    println!("{} (run {})", pass.date, pass.run_id);
    match notify::format_events(&pass.events) {
        Some(text) => println!("{}", text),
        None => println!("  no flag changes"),
    }
    for skipped in &pass.skipped {
        println!("  skipped {}: {}", skipped.flag_type, skipped.reason);
    }
    for failure in &pass.failures {
        println!("  FAILED {}: {}", failure.flag_type, failure.error);
    }
}

fn print_baseline(window: &BaselineWindow) {
    println!(
        "{} baseline for {} ({})",
        window.metric, window.reference_date, window.window
    );
    println!("  samples: {}", window.sample_count);
    match (window.mean, window.std_dev) {
        (Some(mean), Some(sd)) => {
            println!("  mean:    {:.2} {}", mean, window.metric.unit());
            println!("  std dev: {:.2}", sd);
        }
        _ => println!("  insufficient data"),
    }
}

fn print_flags(flags: &[FlagInstance]) {
    if flags.is_empty() {
        println!("No flags.");
        return;
    }
    println!(
        "{:<26} {:<10} {:<12} {:<12} {:<12}",
        "Flag", "State", "First", "Last", "Resolved"
    );
    println!("{}", "-".repeat(76));
    for flag in flags {
        println!(
            "{:<26} {:<10} {:<12} {:<12} {:<12}",
            flag.flag_type.name(),
            flag.state.name(),
            flag.first_triggered_date,
            flag.last_triggered_date,
            flag.resolved_date
                .map(|d| d.to_string())
                .unwrap_or_else(|| "-".to_string())
        );
    }
}

fn print_correlations(results: &[CorrelationResult]) {
    let sufficient: Vec<&CorrelationResult> =
        results.iter().filter(|r| r.is_sufficient()).collect();
    if sufficient.is_empty() {
        println!("Not enough journal entries for correlations yet.");
        return;
    }
    println!(
        "{:<14} {:<20} {:<4} {:>8} {:>8} {:>10}",
        "Factor", "Metric", "Lag", "With", "Without", "Delta"
    );
    println!("{}", "-".repeat(70));
    for r in sufficient {
        println!(
            "{:<14} {:<20} {:<4} {:>8} {:>8} {:>+10.2}",
            r.factor.name(),
            r.metric.name(),
            r.lag_days,
            r.present.count,
            r.absent.count,
            r.median_delta.unwrap_or(0.0)
        );
    }
}

fn print_import(result: &ImportResult) {
    println!("Import results:");
    println!("  Rows processed: {}", result.rows_processed);
    println!("  Rows failed: {}", result.rows_failed);
    if !result.errors.is_empty() {
        println!();
        println!("Errors (first 10):");
        for error in result.errors.iter().take(10) {
            println!("  {}", error);
        }
    }
}
