//! Report Scheduler
//!
//! Runs the engine once a day at the configured local hour and hands the
//! output to a notifier. The weekly report replaces the daily one on the
//! configured weekday. Before each run the previous `catch_up_days` are
//! re-evaluated so a missed morning does not break streaks.

use chrono::{Datelike, Duration, Local, NaiveDate, NaiveDateTime, Timelike, Weekday};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::config::{Config, ConfigError};
use crate::engine::{Engine, EngineError, EngineResult, EngineRun, FlagEvent, ReportCadence};
use crate::notify::{self, Notifier};

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Engine task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// How often the loop checks the clock
const TICK: std::time::Duration = std::time::Duration::from_secs(60);

/// Which report is due at `now`, if any.
///
/// At most one run per calendar date; anything at or after `daily_hour`
/// counts, so a scheduler started late still runs that day.
pub fn due_job(
    now: NaiveDateTime,
    last_run: Option<NaiveDate>,
    daily_hour: u32,
    weekly_day: Weekday,
) -> Option<ReportCadence> {
    let today = now.date();
    if now.hour() < daily_hour || last_run.is_some_and(|d| d >= today) {
        return None;
    }
    if today.weekday() == weekly_day {
        Some(ReportCadence::Weekly)
    } else {
        Some(ReportCadence::Daily)
    }
}

pub struct ReportScheduler {
    engine: Arc<Engine>,
    notifier: Arc<dyn Notifier>,
    daily_hour: u32,
    weekly_day: Weekday,
    catch_up_days: u32,
    dashboard_url: Option<String>,
    last_run: Arc<RwLock<Option<NaiveDate>>>,
    running: Arc<RwLock<bool>>,
}

impl ReportScheduler {
    pub fn new(
        engine: Arc<Engine>,
        notifier: Arc<dyn Notifier>,
        config: &Config,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            engine,
            notifier,
            daily_hour: config.schedule.daily_hour,
            weekly_day: config.schedule.weekday()?,
            catch_up_days: config.schedule.catch_up_days,
            dashboard_url: config.notify.dashboard_url.clone(),
            last_run: Arc::new(RwLock::new(None)),
            running: Arc::new(RwLock::new(false)),
        })
    }

    pub async fn last_run(&self) -> Option<NaiveDate> {
        *self.last_run.read().await
    }

    /// Start the scheduler background task
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let scheduler = self.clone();

        tokio::spawn(async move {
            *scheduler.running.write().await = true;
            tracing::info!(
                daily_hour = scheduler.daily_hour,
                weekly_day = %scheduler.weekly_day,
                notifier = scheduler.notifier.name(),
                "Report scheduler started"
            );

            let mut interval = tokio::time::interval(TICK);

            loop {
                interval.tick().await;

                if !*scheduler.running.read().await {
                    break;
                }

                scheduler.check_and_run().await;
            }
        })
    }

    pub async fn stop(&self) {
        *self.running.write().await = false;
    }

    async fn check_and_run(&self) {
        let now = Local::now().naive_local();
        let last_run = *self.last_run.read().await;
        let Some(cadence) = due_job(now, last_run, self.daily_hour, self.weekly_day) else {
            return;
        };

        let date = now.date();
        // Marked before running so a failing day is not retried every tick
        *self.last_run.write().await = Some(date);

        if let Err(e) = self.run_for(date, cadence).await {
            tracing::error!(date = %date, cadence = %cadence, error = %e, "Scheduled run failed");
        }
    }

    /// Catch up, evaluate `date`, then deliver events and the report.
    ///
    /// Transitions found while catching up are delivered ahead of the day's own.
    pub async fn run_for(
        &self,
        date: NaiveDate,
        cadence: ReportCadence,
    ) -> Result<EngineRun, SchedulerError> {
        let mut events: Vec<FlagEvent> = Vec::new();
        if self.catch_up_days > 0 {
            let start = date - Duration::days(self.catch_up_days as i64);
            let end = date - Duration::days(1);
            let passes = self
                .blocking(move |engine| engine.evaluate_range(start, end))
                .await?;
            events.extend(passes.into_iter().flat_map(|p| p.events));
            tracing::debug!(start = %start, end = %end, events = events.len(), "Caught up on previous days");
        }

        let run = self.blocking(move |engine| engine.run(date, cadence)).await?;
        events.extend(run.pass.events.iter().cloned());

        for failure in &run.pass.failures {
            tracing::warn!(
                flag_type = %failure.flag_type,
                error = %failure.error,
                "Rule not persisted; it will be retried on the next run"
            );
        }

        if let Some(text) = notify::format_events(&events) {
            self.deliver(&text).await;
        }
        let text = notify::format_report(&run.report, self.dashboard_url.as_deref());
        self.deliver(&text).await;

        tracing::info!(
            date = %date,
            cadence = %cadence,
            events = events.len(),
            open_flags = run.report.open_flags.len(),
            "Scheduled run complete"
        );
        Ok(run)
    }

    async fn deliver(&self, text: &str) {
        if let Err(e) = self.notifier.send(text).await {
            tracing::error!(notifier = self.notifier.name(), error = %e, "Notification failed");
        }
    }

    async fn blocking<F, T>(&self, f: F) -> Result<T, SchedulerError>
    where
        F: FnOnce(&Engine) -> EngineResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let engine = Arc::clone(&self.engine);
        Ok(tokio::task::spawn_blocking(move || f(&engine)).await??)
    }
}
