//! Notifications
//!
//! Turns engine output into short chat messages and delivers them. The engine
//! never calls into this module; the scheduler and CLI decide what to send.

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde::Serialize;
use std::fmt::Write as _;
use std::sync::Arc;
use thiserror::Error;

use crate::config::NotifyConfig;
use crate::engine::{
    CorrelationResult, EffectDirection, FlagEvent, FlagInstance, FlagSeverity, FlagTransition,
    FlagType, MetricSnapshot, MetricTrend, Report, ReportCadence, WeeklySummary,
};
use crate::store::{DailyRecord, Metric};

/// Correlations listed in a weekly message
const WEEKLY_CORRELATION_LIMIT: usize = 5;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Notifications enabled but no webhook_url configured")]
    MissingWebhook,

    #[error("HTTP client error: {0}")]
    Client(String),

    #[error("Webhook request timed out")]
    Timeout,

    #[error("Webhook unreachable")]
    Unavailable,

    #[error("Webhook rejected message: HTTP {status}")]
    Rejected { status: u16 },

    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),
}

/// A delivery channel for formatted messages
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, text: &str) -> Result<(), NotifyError>;
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    text: &'a str,
}

/// Posts `{"text": ...}` to an incoming-webhook URL
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout_ms: u64) -> Result<Self, NotifyError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| NotifyError::Client(e.to_string()))?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn send(&self, text: &str) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.url)
            .json(&WebhookPayload { text })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    NotifyError::Timeout
                } else if e.is_connect() {
                    NotifyError::Unavailable
                } else {
                    NotifyError::Request(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
            });
        }

        tracing::debug!(bytes = text.len(), "Webhook message delivered");
        Ok(())
    }
}

/// Writes messages to the log instead of delivering them
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, text: &str) -> Result<(), NotifyError> {
        tracing::info!(target: "vigil::notify", "{}", text);
        Ok(())
    }
}

/// Webhook when enabled, log output otherwise
pub fn from_config(config: &NotifyConfig) -> Result<Arc<dyn Notifier>, NotifyError> {
    if !config.enabled {
        return Ok(Arc::new(LogNotifier));
    }
    let url = config
        .webhook_url
        .as_deref()
        .ok_or(NotifyError::MissingWebhook)?;
    Ok(Arc::new(WebhookNotifier::new(url, config.request_timeout_ms)?))
}

/// Human label for a flag type
pub fn flag_label(flag_type: FlagType) -> &'static str {
    match flag_type {
        FlagType::HrvDrop => "HRV drop",
        FlagType::RecoveryRedStreak => "Red recovery streak",
        FlagType::SleepDebt => "Sleep debt",
        FlagType::TempSpike => "Skin temperature spike",
        FlagType::StrainRecoveryMismatch => "Strain above recovery",
    }
}

fn severity_icon(severity: FlagSeverity) -> &'static str {
    match severity {
        FlagSeverity::Warn => "⚠️",
        FlagSeverity::Alert => "🚨",
    }
}

/// Colored dot for a recovery score
pub fn recovery_zone(score: f64) -> &'static str {
    if score >= 67.0 {
        "🟢"
    } else if score >= 34.0 {
        "🟡"
    } else {
        "🔴"
    }
}

fn format_minutes(minutes: f64) -> String {
    let total = minutes.round().max(0.0) as i64;
    format!("{}h {:02}m", total / 60, total % 60)
}

fn format_value(metric: Metric, value: f64) -> String {
    match metric {
        Metric::SleepDuration | Metric::SleepDebt => format_minutes(value),
        Metric::RecoveryScore => format!("{:.0}%", value),
        Metric::Strain => format!("{:.1}", value),
        Metric::SkinTemp => format!("{:.2} {}", value, metric.unit()),
        _ => format!("{:.1} {}", value, metric.unit()),
    }
}

fn format_snapshot(snapshot: &MetricSnapshot) -> String {
    let mut line = format!(
        "{} {}",
        snapshot.metric,
        format_value(snapshot.metric, snapshot.value)
    );
    if let Some(mean) = snapshot.baseline_mean {
        let _ = write!(line, " vs baseline {}", format_value(snapshot.metric, mean));
    }
    match (snapshot.metric, snapshot.deviation) {
        (Metric::Hrv, Some(dev)) => {
            let _ = write!(line, " ({:+.1}%)", dev * 100.0);
        }
        (_, Some(dev)) => {
            let _ = write!(line, " ({:+.2})", dev);
        }
        _ => {}
    }
    for related in &snapshot.related {
        let _ = write!(
            line,
            ", {} {}",
            related.metric,
            format_value(related.metric, related.value)
        );
    }
    line
}

fn days_between(first: NaiveDate, last: NaiveDate) -> i64 {
    (last - first).num_days() + 1
}

/// One line per event, or `None` when there is nothing to say
pub fn format_events(events: &[FlagEvent]) -> Option<String> {
    if events.is_empty() {
        return None;
    }

    let lines: Vec<String> = events
        .iter()
        .map(|event| {
            let label = flag_label(event.flag_type);
            let mut line = match event.transition {
                FlagTransition::Opened => format!(
                    "{} {} flagged: {} days in a row (since {})",
                    severity_icon(event.severity),
                    label,
                    event.consecutive_trigger_count,
                    event.first_triggered_date
                ),
                FlagTransition::Resolved => format!(
                    "✅ {} resolved after {} days (since {})",
                    label,
                    days_between(event.first_triggered_date, event.current_date),
                    event.first_triggered_date
                ),
            };
            if let Some(snapshot) = &event.snapshot {
                let _ = write!(line, "\n    {}", format_snapshot(snapshot));
            }
            line
        })
        .collect();

    Some(lines.join("\n"))
}

fn format_today(record: Option<&DailyRecord>) -> String {
    let Some(record) = record else {
        return "No data recorded".to_string();
    };

    let mut parts = Vec::new();
    if let Some(score) = record.value(Metric::RecoveryScore) {
        parts.push(format!("{} Recovery {:.0}%", recovery_zone(score), score));
    }
    for metric in [
        Metric::Hrv,
        Metric::RestingHeartRate,
        Metric::SleepDuration,
        Metric::Strain,
    ] {
        if let Some(value) = record.value(metric) {
            parts.push(format!("{} {}", metric, format_value(metric, value)));
        }
    }

    if parts.is_empty() {
        "No data recorded".to_string()
    } else {
        parts.join(" | ")
    }
}

fn format_open_flag(flag: &FlagInstance, date: NaiveDate) -> String {
    format!(
        "• {} since {} ({} days)",
        flag_label(flag.flag_type),
        flag.first_triggered_date,
        days_between(flag.first_triggered_date, date)
    )
}

fn format_correlation(result: &CorrelationResult) -> Option<String> {
    let delta = result.median_delta?;
    let direction = match result.direction? {
        EffectDirection::Higher => "higher",
        EffectDirection::Lower => "lower",
        EffectDirection::Unchanged => "unchanged",
    };
    let when = if result.lag_days == 0 {
        "same day"
    } else {
        "next day"
    };
    Some(format!(
        "• {} → {} {} by {} ({}, {} vs {} days)",
        result.factor,
        result.metric,
        direction,
        format_value(result.metric, delta.abs()),
        when,
        result.present.count,
        result.absent.count
    ))
}

fn format_trend(trend: &MetricTrend) -> Option<String> {
    let week = trend.week_mean?;
    let mut line = format!("• {} {}", trend.metric, format_value(trend.metric, week));
    if let (Some(prior), Some(change)) = (trend.prior_mean, trend.change) {
        let _ = write!(
            line,
            " (prior {}, {}{})",
            format_value(trend.metric, prior),
            if change < 0.0 { "-" } else { "+" },
            format_value(trend.metric, change.abs())
        );
    }
    Some(line)
}

fn format_weekly(summary: &WeeklySummary) -> String {
    let mut out = String::from("\n*This week vs the prior 4 weeks*\n");
    for line in summary.trends.iter().filter_map(format_trend) {
        out.push_str(&line);
        out.push('\n');
    }
    if !summary.workouts.is_empty() {
        let sports: Vec<String> = summary
            .workouts
            .iter()
            .map(|w| format!("{} x{} (strain {:.1})", w.sport, w.sessions, w.total_strain))
            .collect();
        let _ = writeln!(out, "• workouts: {}", sports.join(", "));
    }
    if let Some(debt) = summary.ending_sleep_debt {
        let _ = writeln!(out, "• sleep debt at week end: {}", format_minutes(debt));
    }
    out
}

/// Message text for a daily or weekly report
pub fn format_report(report: &Report, dashboard_url: Option<&str>) -> String {
    let mut out = format!("*Vigil {} report - {}*\n", report.cadence, report.date);
    out.push_str(&format_today(report.today.as_ref()));
    out.push('\n');

    if report.open_flags.is_empty() {
        out.push_str("\nNo active flags\n");
    } else {
        out.push_str("\n*Active flags*\n");
        for flag in &report.open_flags {
            out.push_str(&format_open_flag(flag, report.date));
            out.push('\n');
        }
    }

    if report.cadence == ReportCadence::Weekly {
        if let Some(summary) = &report.weekly {
            out.push_str(&format_weekly(summary));
        }

        let lines: Vec<String> = report
            .correlations
            .iter()
            .flatten()
            .filter(|c| c.is_sufficient())
            .filter_map(format_correlation)
            .take(WEEKLY_CORRELATION_LIMIT)
            .collect();

        if lines.is_empty() {
            out.push_str("\nNot enough journal entries for correlations yet\n");
        } else {
            out.push_str("\n*Journal effects*\n");
            for line in lines {
                out.push_str(&line);
                out.push('\n');
            }
        }
    }

    if let Some(url) = dashboard_url {
        let _ = write!(out, "\n<{}|Open dashboard>", url);
    }

    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::correlation::{CorrelationStatus, PartitionSummary};
    use crate::engine::report::WorkoutSummary;
    use crate::store::DateRange;
    use crate::engine::FlagState;
    use crate::store::{JournalFactor, RecoveryRecord};
    use chrono::Utc;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn report(cadence: ReportCadence) -> Report {
        let day = date("2024-03-10");
        let mut today = DailyRecord::empty(day);
        today.recovery = Some(RecoveryRecord {
            date: day,
            recovery_score: Some(28.0),
            hrv_ms: Some(41.3),
            resting_heart_rate: None,
            spo2: None,
            skin_temp_celsius: None,
        });

        let mut flag = FlagInstance::start(FlagType::HrvDrop, date("2024-03-08"));
        flag.state = FlagState::Open;

        Report {
            date: day,
            cadence,
            generated_at: Utc::now(),
            today: Some(today),
            baselines: Vec::new(),
            open_flags: vec![flag],
            correlations: None,
            weekly: None,
        }
    }

    #[test]
    fn test_recovery_zone() {
        assert_eq!(recovery_zone(67.0), "🟢");
        assert_eq!(recovery_zone(34.0), "🟡");
        assert_eq!(recovery_zone(33.9), "🔴");
    }

    #[test]
    fn test_format_events() {
        assert_eq!(format_events(&[]), None);

        let events = vec![
            FlagEvent {
                flag_type: FlagType::HrvDrop,
                transition: FlagTransition::Opened,
                severity: FlagSeverity::Alert,
                first_triggered_date: date("2024-03-08"),
                current_date: date("2024-03-10"),
                consecutive_trigger_count: 3,
                snapshot: Some(
                    MetricSnapshot::new(Metric::Hrv, 40.0, -0.15)
                        .baseline(Some(50.0))
                        .deviation(-0.2),
                ),
            },
            FlagEvent {
                flag_type: FlagType::SleepDebt,
                transition: FlagTransition::Resolved,
                severity: FlagSeverity::Warn,
                first_triggered_date: date("2024-03-01"),
                current_date: date("2024-03-10"),
                consecutive_trigger_count: 0,
                snapshot: None,
            },
        ];

        let text = format_events(&events).unwrap();
        assert!(text.contains("🚨 HRV drop flagged: 3 days in a row (since 2024-03-08)"));
        assert!(text.contains("hrv 40.0 ms vs baseline 50.0 ms (-20.0%)"));
        assert!(text.contains("Sleep debt resolved after 10 days"));
    }

    #[test]
    fn test_daily_report_text() {
        let text = format_report(&report(ReportCadence::Daily), Some("http://localhost:8086"));
        assert!(text.starts_with("*Vigil daily report - 2024-03-10*"));
        assert!(text.contains("🔴 Recovery 28% | hrv 41.3 ms"));
        assert!(text.contains("• HRV drop since 2024-03-08 (3 days)"));
        assert!(text.ends_with("<http://localhost:8086|Open dashboard>"));
        assert!(!text.contains("Journal effects"));
    }

    #[test]
    fn test_weekly_report_lists_sufficient_correlations() {
        let mut weekly = report(ReportCadence::Weekly);
        weekly.correlations = Some(vec![
            CorrelationResult {
                factor: JournalFactor::Alcohol,
                metric: Metric::Hrv,
                lag_days: 1,
                present: PartitionSummary { count: 3, median: Some(40.0) },
                absent: PartitionSummary { count: 4, median: Some(56.5) },
                median_delta: Some(-16.5),
                direction: Some(EffectDirection::Lower),
                status: CorrelationStatus::Sufficient,
            },
            CorrelationResult {
                factor: JournalFactor::HighStress,
                metric: Metric::Hrv,
                lag_days: 0,
                present: PartitionSummary { count: 1, median: Some(45.0) },
                absent: PartitionSummary { count: 0, median: None },
                median_delta: None,
                direction: None,
                status: CorrelationStatus::Insufficient,
            },
        ]);

        weekly.weekly = Some(WeeklySummary {
            week: DateRange::trailing(date("2024-03-10"), 7),
            prior: DateRange::before(date("2024-03-04"), 28),
            trends: vec![MetricTrend {
                metric: Metric::Hrv,
                week_mean: Some(42.0),
                week_samples: 7,
                prior_mean: Some(50.0),
                prior_samples: 28,
                change: Some(-8.0),
            }],
            workouts: vec![WorkoutSummary {
                sport: "Running".to_string(),
                sessions: 2,
                total_strain: 16.0,
            }],
            ending_sleep_debt: Some(35.0),
        });

        let text = format_report(&weekly, None);
        assert!(text.contains("• hrv 42.0 ms (prior 50.0 ms, -8.0 ms)"));
        assert!(text.contains("• workouts: Running x2 (strain 16.0)"));
        assert!(text.contains("• sleep debt at week end: 0h 35m"));
        assert!(text.contains("*Journal effects*"));
        assert!(text.contains("• alcohol → hrv lower by 16.5 ms (next day, 3 vs 4 days)"));
        assert!(!text.contains("high_stress"));
    }

    #[test]
    fn test_from_config() {
        let notifier = from_config(&NotifyConfig::default()).unwrap();
        assert_eq!(notifier.name(), "log");

        let config = NotifyConfig {
            enabled: true,
            ..NotifyConfig::default()
        };
        assert!(matches!(from_config(&config), Err(NotifyError::MissingWebhook)));
    }

    #[tokio::test]
    async fn test_webhook_posts_text() {
        use axum::{routing::post, Json, Router};
        use tokio::sync::mpsc;

        let (tx, mut rx) = mpsc::channel::<serde_json::Value>(1);
        let app = Router::new().route(
            "/hook",
            post(move |Json(body): Json<serde_json::Value>| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(body).await;
                    "ok"
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let notifier = WebhookNotifier::new(format!("http://{}/hook", addr), 2000).unwrap();
        notifier.send("hello").await.unwrap();

        let body = rx.recv().await.unwrap();
        assert_eq!(body["text"], "hello");

        let missing = WebhookNotifier::new(format!("http://{}/nope", addr), 2000).unwrap();
        assert!(matches!(
            missing.send("hello").await,
            Err(NotifyError::Rejected { status: 404 })
        ));
    }
}
