//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use crate::engine::rules::FlagDefinition;
use crate::engine::EngineError;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub baseline: BaselineConfig,

    #[serde(default)]
    pub flags: FlagsConfig,

    #[serde(default)]
    pub correlation: CorrelationConfig,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub notify: NotifyConfig,

    #[serde(default)]
    pub schedule: ScheduleConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Record store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

fn default_data_dir() -> String {
    dirs::data_local_dir()
        .map(|p| p.join("vigil").to_string_lossy().to_string())
        .unwrap_or_else(|| "./vigil_data".to_string())
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl StorageConfig {
    /// Data directory with a leading `~/` expanded
    pub fn data_dir_path(&self) -> PathBuf {
        match (self.data_dir.strip_prefix("~/"), dirs::home_dir()) {
            (Some(rest), Some(home)) => home.join(rest),
            _ => PathBuf::from(&self.data_dir),
        }
    }
}

/// Rolling baseline configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BaselineConfig {
    #[serde(default = "default_window_days")]
    pub window_days: u32,

    #[serde(default = "default_min_samples")]
    pub min_samples: usize,
}

fn default_window_days() -> u32 {
    30
}

fn default_min_samples() -> usize {
    7
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            window_days: default_window_days(),
            min_samples: default_min_samples(),
        }
    }
}

/// Per-rule flag configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FlagsConfig {
    #[serde(default)]
    pub hrv_drop: HrvDropConfig,

    #[serde(default)]
    pub recovery_red_streak: RecoveryRedConfig,

    #[serde(default)]
    pub sleep_debt: SleepDebtConfig,

    #[serde(default)]
    pub temp_spike: TempSpikeConfig,

    #[serde(default)]
    pub strain_recovery_mismatch: StrainMismatchConfig,
}

fn default_enabled() -> bool {
    true
}

fn default_min_streak() -> u32 {
    3
}

fn default_cooldown() -> u32 {
    2
}

fn default_max_gap() -> u32 {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct HrvDropConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Fraction below the baseline mean, e.g. 0.15 for 15%
    #[serde(default = "default_drop_pct")]
    pub drop_pct: f64,

    #[serde(default = "default_min_streak")]
    pub min_streak: u32,

    #[serde(default = "default_cooldown")]
    pub cooldown: u32,

    #[serde(default = "default_max_gap")]
    pub max_gap_days: u32,
}

fn default_drop_pct() -> f64 {
    0.15
}

impl Default for HrvDropConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            drop_pct: default_drop_pct(),
            min_streak: default_min_streak(),
            cooldown: default_cooldown(),
            max_gap_days: default_max_gap(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecoveryRedConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Scores strictly below this are in the red tier
    #[serde(default = "default_red_threshold")]
    pub red_threshold: f64,

    #[serde(default = "default_min_streak")]
    pub min_streak: u32,

    #[serde(default = "default_cooldown")]
    pub cooldown: u32,

    #[serde(default = "default_max_gap")]
    pub max_gap_days: u32,
}

fn default_red_threshold() -> f64 {
    33.0
}

impl Default for RecoveryRedConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            red_threshold: default_red_threshold(),
            min_streak: default_min_streak(),
            cooldown: default_cooldown(),
            max_gap_days: default_max_gap(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SleepDebtConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default = "default_target_minutes")]
    pub target_minutes: f64,

    #[serde(default = "default_debt_window")]
    pub window_days: u32,

    #[serde(default = "default_debt_threshold")]
    pub threshold_minutes: f64,

    #[serde(default = "default_min_streak")]
    pub min_streak: u32,

    #[serde(default = "default_cooldown")]
    pub cooldown: u32,

    #[serde(default = "default_max_gap")]
    pub max_gap_days: u32,
}

fn default_target_minutes() -> f64 {
    480.0
}

fn default_debt_window() -> u32 {
    3
}

fn default_debt_threshold() -> f64 {
    120.0
}

impl Default for SleepDebtConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            target_minutes: default_target_minutes(),
            window_days: default_debt_window(),
            threshold_minutes: default_debt_threshold(),
            min_streak: default_min_streak(),
            cooldown: default_cooldown(),
            max_gap_days: default_max_gap(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TempSpikeConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Degrees Celsius above the baseline mean
    #[serde(default = "default_spike_celsius")]
    pub spike_celsius: f64,

    #[serde(default = "default_single_day")]
    pub min_streak: u32,

    #[serde(default = "default_cooldown")]
    pub cooldown: u32,

    #[serde(default = "default_max_gap")]
    pub max_gap_days: u32,
}

fn default_spike_celsius() -> f64 {
    0.5
}

fn default_single_day() -> u32 {
    1
}

impl Default for TempSpikeConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            spike_celsius: default_spike_celsius(),
            min_streak: default_single_day(),
            cooldown: default_cooldown(),
            max_gap_days: default_max_gap(),
        }
    }
}

/// Strain is flagged when above `capacity_intercept + capacity_slope * recovery`
#[derive(Debug, Clone, Deserialize)]
pub struct StrainMismatchConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default = "default_capacity_intercept")]
    pub capacity_intercept: f64,

    #[serde(default = "default_capacity_slope")]
    pub capacity_slope: f64,

    #[serde(default = "default_min_streak")]
    pub min_streak: u32,

    #[serde(default = "default_cooldown")]
    pub cooldown: u32,

    #[serde(default = "default_max_gap")]
    pub max_gap_days: u32,
}

fn default_capacity_intercept() -> f64 {
    8.0
}

fn default_capacity_slope() -> f64 {
    0.09
}

impl Default for StrainMismatchConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            capacity_intercept: default_capacity_intercept(),
            capacity_slope: default_capacity_slope(),
            min_streak: default_min_streak(),
            cooldown: default_cooldown(),
            max_gap_days: default_max_gap(),
        }
    }
}

/// Journal correlation configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CorrelationConfig {
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,

    #[serde(default = "default_min_partition")]
    pub min_partition: usize,

    /// Stress levels at or above this count as high stress
    #[serde(default = "default_stress_threshold")]
    pub stress_threshold: u8,
}

fn default_lookback_days() -> u32 {
    7
}

fn default_min_partition() -> usize {
    3
}

fn default_stress_threshold() -> u8 {
    4
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            lookback_days: default_lookback_days(),
            min_partition: default_min_partition(),
            stress_threshold: default_stress_threshold(),
        }
    }
}

/// Evaluation pass configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_conflict_retries")]
    pub conflict_retries: u32,
}

fn default_conflict_retries() -> u32 {
    3
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            conflict_retries: default_conflict_retries(),
        }
    }
}

/// Read-only HTTP API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8086
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: Vec::new(),
        }
    }
}

impl ApiConfig {
    /// Get the socket address string
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Webhook delivery of flag alerts and reports
#[derive(Debug, Clone, Deserialize)]
pub struct NotifyConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Incoming-webhook URL accepting `{"text": "..."}` payloads
    pub webhook_url: Option<String>,

    #[serde(default = "default_notify_timeout")]
    pub request_timeout_ms: u64,

    /// Linked at the bottom of report messages
    pub dashboard_url: Option<String>,
}

fn default_notify_timeout() -> u64 {
    5000
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            webhook_url: None,
            request_timeout_ms: default_notify_timeout(),
            dashboard_url: None,
        }
    }
}

/// When `vigil serve` runs the engine
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Local hour of the daily run
    #[serde(default = "default_daily_hour")]
    pub daily_hour: u32,

    /// Day of the weekly report, e.g. "sun"
    #[serde(default = "default_weekly_day")]
    pub weekly_day: String,

    /// Days re-evaluated before today on each run, for missed schedules
    #[serde(default = "default_catch_up_days")]
    pub catch_up_days: u32,
}

fn default_daily_hour() -> u32 {
    8
}

fn default_weekly_day() -> String {
    "sun".to_string()
}

fn default_catch_up_days() -> u32 {
    2
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            daily_hour: default_daily_hour(),
            weekly_day: default_weekly_day(),
            catch_up_days: default_catch_up_days(),
        }
    }
}

impl ScheduleConfig {
    pub fn weekday(&self) -> Result<chrono::Weekday, ConfigError> {
        self.weekly_day
            .parse::<chrono::Weekday>()
            .map_err(|_| ConfigError::Invalid(format!("unknown weekly_day {:?}", self.weekly_day)))
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,

    pub file: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Self::parse(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("vigil").join("config.toml")),
            Some(PathBuf::from("/etc/vigil/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path_opt in config_paths.iter().flatten() {
            if path_opt.exists() {
                match Self::load_with_env(path_opt) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path_opt);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path_opt, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Apply environment variable overrides to an existing config
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply `VIGIL_*` overrides from any key lookup
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(data_dir) = lookup("VIGIL_DATA_DIR") {
            self.storage.data_dir = data_dir;
        }

        if let Some(days) = lookup("VIGIL_BASELINE_WINDOW_DAYS").and_then(|v| v.parse().ok()) {
            self.baseline.window_days = days;
        }
        if let Some(samples) = lookup("VIGIL_BASELINE_MIN_SAMPLES").and_then(|v| v.parse().ok()) {
            self.baseline.min_samples = samples;
        }

        if let Some(host) = lookup("VIGIL_API_HOST") {
            self.api.host = host;
        }
        if let Some(port) = lookup("VIGIL_API_PORT").and_then(|v| v.parse().ok()) {
            self.api.port = port;
        }

        if let Some(url) = lookup("VIGIL_WEBHOOK_URL") {
            self.notify.webhook_url = Some(url);
            self.notify.enabled = true;
        }

        if let Some(level) = lookup("VIGIL_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("VIGIL_LOG_FORMAT") {
            self.logging.format = format;
        }
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.baseline.window_days == 0 {
            return invalid("baseline.window_days must be at least 1".to_string());
        }
        if self.baseline.min_samples == 0 {
            return invalid("baseline.min_samples must be at least 1".to_string());
        }
        if self.baseline.min_samples > self.baseline.window_days as usize {
            return invalid(format!(
                "baseline.min_samples ({}) exceeds window_days ({})",
                self.baseline.min_samples, self.baseline.window_days
            ));
        }

        if self.correlation.lookback_days == 0 {
            return invalid("correlation.lookback_days must be at least 1".to_string());
        }
        if self.correlation.min_partition == 0 {
            return invalid("correlation.min_partition must be at least 1".to_string());
        }
        if !(1..=5).contains(&self.correlation.stress_threshold) {
            return invalid(format!(
                "correlation.stress_threshold must be 1-5, got {}",
                self.correlation.stress_threshold
            ));
        }

        for definition in FlagDefinition::from_config(&self.flags) {
            definition.validate().map_err(|e| match e {
                EngineError::InvalidConfiguration(msg) => ConfigError::Invalid(msg),
                other => ConfigError::Invalid(other.to_string()),
            })?;
        }

        if self.schedule.daily_hour > 23 {
            return invalid(format!(
                "schedule.daily_hour must be 0-23, got {}",
                self.schedule.daily_hour
            ));
        }
        self.schedule.weekday()?;

        if self.notify.enabled && self.notify.webhook_url.is_none() {
            return invalid("notify.enabled requires notify.webhook_url".to_string());
        }

        match self.logging.format.as_str() {
            "pretty" | "json" => Ok(()),
            other => invalid(format!("logging.format must be pretty or json, got {}", other)),
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("{0}")]
    Invalid(String),
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Vigil Configuration
#
# Environment variables override these settings:
# - VIGIL_DATA_DIR
# - VIGIL_BASELINE_WINDOW_DAYS
# - VIGIL_BASELINE_MIN_SAMPLES
# - VIGIL_API_HOST
# - VIGIL_API_PORT
# - VIGIL_WEBHOOK_URL
# - VIGIL_LOG_LEVEL
# - VIGIL_LOG_FORMAT

[storage]
# Directory holding vigil.db
data_dir = "~/.local/share/vigil"

[baseline]
# Trailing days before the reference date
window_days = 30

# Fewer present samples than this marks the baseline insufficient
min_samples = 7

# Every rule accepts enabled, min_streak, cooldown and max_gap_days.
# min_streak: consecutive trigger days before a flag opens
# cooldown: consecutive clear days before an open flag resolves
# max_gap_days: missing days tolerated without breaking a streak

[flags.hrv_drop]
enabled = true
drop_pct = 0.15
min_streak = 3
cooldown = 2
max_gap_days = 1

[flags.recovery_red_streak]
enabled = true
red_threshold = 33.0
min_streak = 3
cooldown = 2
max_gap_days = 1

[flags.sleep_debt]
enabled = true
target_minutes = 480.0
window_days = 3
threshold_minutes = 120.0
min_streak = 3
cooldown = 2
max_gap_days = 1

[flags.temp_spike]
enabled = true
spike_celsius = 0.5
min_streak = 1
cooldown = 2
max_gap_days = 1

[flags.strain_recovery_mismatch]
enabled = true
# capacity = capacity_intercept + capacity_slope * recovery_score
capacity_intercept = 8.0
capacity_slope = 0.09
min_streak = 3
cooldown = 2
max_gap_days = 1

[correlation]
lookback_days = 7
min_partition = 3
stress_threshold = 4

[engine]
# Re-reads after a flag write conflict before the rule is reported as failed
conflict_retries = 3

[api]
host = "127.0.0.1"
port = 8086
cors_origins = []

[notify]
enabled = false
# webhook_url = "https://hooks.slack.com/services/..."
request_timeout_ms = 5000
# dashboard_url = "http://localhost:8501"

[schedule]
enabled = true
daily_hour = 8
weekly_day = "sun"
catch_up_days = 2

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"

# Optional log file path
# file = "/var/log/vigil/vigil.log"
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_generated_config_matches_defaults() {
        let config = Config::parse(&generate_default_config()).unwrap();
        config.validate().unwrap();

        let defaults = Config::default();
        assert_eq!(config.baseline.window_days, defaults.baseline.window_days);
        assert_eq!(config.flags.temp_spike.min_streak, 1);
        assert_eq!(config.flags.sleep_debt.window_days, 3);
        assert_eq!(config.engine.conflict_retries, 3);
        assert!(!config.notify.enabled);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config = Config::parse(
            r#"
            [flags.hrv_drop]
            drop_pct = 0.2
            "#,
        )
        .unwrap();
        assert_eq!(config.flags.hrv_drop.drop_pct, 0.2);
        assert_eq!(config.flags.hrv_drop.min_streak, 3);
        assert_eq!(config.correlation.min_partition, 3);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.flags.recovery_red_streak.cooldown = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("cooldown"));

        let mut config = Config::default();
        config.baseline.min_samples = 40;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.schedule.weekly_day = "someday".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.logging.format = "xml".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("VIGIL_DATA_DIR", "/tmp/vigil-test"),
            ("VIGIL_BASELINE_WINDOW_DAYS", "21"),
            ("VIGIL_API_PORT", "not-a-port"),
            ("VIGIL_WEBHOOK_URL", "http://localhost:9999/hook"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.storage.data_dir, "/tmp/vigil-test");
        assert_eq!(config.baseline.window_days, 21);
        assert_eq!(config.api.port, 8086);
        assert!(config.notify.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[baseline\nwindow_days = ").unwrap();
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));

        let missing = Config::load(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(missing, ConfigError::Io { .. }));
    }
}
