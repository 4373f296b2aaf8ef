//! Service configuration.
//!
//! Non-secret settings live in `hazmon.toml`; every section and field has a
//! default, so a missing file or a partial file is fine. API keys and the
//! database URL come from the environment (a `.env` file is honoured).

use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::alert::thresholds::HazardThresholds;
use crate::logging::LogLevel;
use crate::scheduler::MAX_INTERVAL_HOURS;

pub const DEFAULT_CONFIG_PATH: &str = "hazmon.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub thresholds: HazardThresholds,
    #[serde(default)]
    pub openweather: OpenWeatherConfig,
    #[serde(default)]
    pub weatherlink: WeatherLinkConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    #[serde(default)]
    pub alerts: AlertConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Loads and validates the config at `path`. A missing file yields the
    /// defaults; a file that exists but does not parse is an error.
    pub fn load(path: &Path) -> Result<AppConfig, ConfigError> {
        if !path.exists() {
            return Ok(AppConfig::default());
        }
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        let config = AppConfig::from_toml(&contents)
            .map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<AppConfig, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Collects every problem rather than stopping at the first.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if let Err(e) = self.thresholds.validate() {
            errors.push(format!("thresholds: {}", e));
        }
        if !(1..=MAX_INTERVAL_HOURS).contains(&self.scheduler.interval_hours) {
            errors.push(format!(
                "scheduler.interval_hours must be between 1 and {}",
                MAX_INTERVAL_HOURS
            ));
        }
        if self.scheduler.cooldown_secs == 0 {
            errors.push("scheduler.cooldown_secs must be at least 1".to_string());
        }
        if self.scheduler.worker_threads == 0 {
            errors.push("scheduler.worker_threads must be at least 1".to_string());
        }
        if !(-90.0..=90.0).contains(&self.openweather.lat) {
            errors.push(format!("openweather.lat out of range: {}", self.openweather.lat));
        }
        if !(-180.0..=180.0).contains(&self.openweather.lon) {
            errors.push(format!("openweather.lon out of range: {}", self.openweather.lon));
        }
        if LogLevel::parse(&self.logging.level).is_none() {
            errors.push(format!("logging.level unknown: '{}'", self.logging.level));
        }
        if !matches!(self.alerts.sink.as_str(), "log" | "postgres") {
            errors.push(format!(
                "alerts.sink must be 'log' or 'postgres', got '{}'",
                self.alerts.sink
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    pub fn log_level(&self) -> LogLevel {
        LogLevel::parse(&self.logging.level).unwrap_or(LogLevel::Info)
    }
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenWeatherConfig {
    #[serde(default = "default_openweather_url")]
    pub base_url: String,
    #[serde(default = "default_lat")]
    pub lat: f64,
    #[serde(default = "default_lon")]
    pub lon: f64,
    /// Optional `cnt` limit on forecast points; `None` takes everything.
    #[serde(default)]
    pub forecast_count: Option<usize>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_openweather_url() -> String {
    "https://api.openweathermap.org/data/2.5".to_string()
}
fn default_lat() -> f64 { 14.3644 }
fn default_lon() -> f64 { 121.0619 }
fn default_timeout_secs() -> u64 { 10 }

impl Default for OpenWeatherConfig {
    fn default() -> Self {
        OpenWeatherConfig {
            base_url: default_openweather_url(),
            lat: default_lat(),
            lon: default_lon(),
            forecast_count: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherLinkConfig {
    #[serde(default = "default_weatherlink_url")]
    pub base_url: String,
    #[serde(default)]
    pub station_id: Option<String>,
    /// Logical sensor id of the ISS whose readings are used.
    #[serde(default = "default_lsid")]
    pub lsid: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_weatherlink_url() -> String {
    "https://api.weatherlink.com/v2".to_string()
}
fn default_lsid() -> u64 { 813260 }

impl Default for WeatherLinkConfig {
    fn default() -> Self {
        WeatherLinkConfig {
            base_url: default_weatherlink_url(),
            station_id: None,
            lsid: default_lsid(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Directory holding `model.json` and `model_metadata.json`.
    #[serde(default = "default_model_dir")]
    pub dir: PathBuf,
}

fn default_model_dir() -> PathBuf {
    PathBuf::from("models")
}

impl Default for ModelConfig {
    fn default() -> Self {
        ModelConfig { dir: default_model_dir() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerSettings {
    #[serde(default = "default_interval_hours")]
    pub interval_hours: u64,
    /// Wait after a failed cycle before trying again.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    /// Upper bound on batch prediction threads.
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
}

fn default_interval_hours() -> u64 { 1 }
fn default_cooldown_secs() -> u64 { 300 }
fn default_worker_threads() -> usize { 4 }

impl Default for SchedulerSettings {
    fn default() -> Self {
        SchedulerSettings {
            interval_hours: default_interval_hours(),
            cooldown_secs: default_cooldown_secs(),
            worker_threads: default_worker_threads(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertConfig {
    /// "log" or "postgres".
    #[serde(default = "default_sink")]
    pub sink: String,
    /// Value written to `notifications.sent_to`.
    #[serde(default = "default_recipients")]
    pub recipients: String,
}

fn default_sink() -> String { "log".to_string() }
fn default_recipients() -> String { "all".to_string() }

impl Default for AlertConfig {
    fn default() -> Self {
        AlertConfig {
            sink: default_sink(),
            recipients: default_recipients(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub console_timestamps: bool,
}

fn default_log_level() -> String { "info".to_string() }

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            file: None,
            console_timestamps: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Secrets
// ---------------------------------------------------------------------------

/// Credentials read from the environment, never from `hazmon.toml`.
#[derive(Clone, Default)]
pub struct Secrets {
    pub openweather_api_key: Option<String>,
    pub weatherlink_api_key: Option<String>,
    pub weatherlink_api_secret: Option<String>,
    pub database_url: Option<String>,
}

impl Secrets {
    /// Loads `.env` (if present) and reads the known variables. Empty
    /// values count as unset.
    pub fn from_env() -> Secrets {
        dotenv::dotenv().ok();
        Secrets {
            openweather_api_key: non_empty_var("OPENWEATHER_API_KEY"),
            weatherlink_api_key: non_empty_var("WEATHERLINK_API_KEY"),
            weatherlink_api_secret: non_empty_var("WEATHERLINK_API_SECRET"),
            database_url: non_empty_var("DATABASE_URL"),
        }
    }
}

// Keys must never end up in logs via a derived Debug.
impl fmt::Debug for Secrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mask = |v: &Option<String>| if v.is_some() { "set" } else { "unset" };
        f.debug_struct("Secrets")
            .field("openweather_api_key", &mask(&self.openweather_api_key))
            .field("weatherlink_api_key", &mask(&self.weatherlink_api_key))
            .field("weatherlink_api_secret", &mask(&self.weatherlink_api_secret))
            .field("database_url", &mask(&self.database_url))
            .finish()
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum ConfigError {
    Io(PathBuf, std::io::Error),
    Parse(PathBuf, toml::de::Error),
    Validation(Vec<String>),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(path, e) => write!(f, "Config I/O error ({}): {}", path.display(), e),
            ConfigError::Parse(path, e) => {
                write!(f, "Config parse error ({}): {}", path.display(), e)
            }
            ConfigError::Validation(errors) => {
                write!(f, "Config validation failed: {}", errors.join("; "))
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config = AppConfig::from_toml("").unwrap();
        assert_eq!(config, AppConfig::default());
        assert!(config.validate().is_ok());
        assert_eq!(config.scheduler.cooldown_secs, 300);
        assert_eq!(config.scheduler.worker_threads, 4);
        assert_eq!(config.openweather.lat, 14.3644);
    }

    #[test]
    fn test_partial_threshold_table_keeps_other_defaults() {
        let config = AppConfig::from_toml(
            "[thresholds]\nprecipitation_mm = [5.0, 20.0, 40.0, 80.0]\n",
        )
        .unwrap();
        assert_eq!(config.thresholds.precipitation_mm, [5.0, 20.0, 40.0, 80.0]);
        assert_eq!(
            config.thresholds.pressure_hpa,
            HazardThresholds::default().pressure_hpa
        );
    }

    #[test]
    fn test_wrong_tier_count_is_a_parse_error() {
        let result = AppConfig::from_toml("[thresholds]\nwind_speed_ms = [8.0, 12.0, 17.0]\n");
        assert!(result.is_err(), "three breakpoints must not deserialize into [f64; 4]");
    }

    #[test]
    fn test_validation_collects_all_errors() {
        let mut config = AppConfig::default();
        config.scheduler.interval_hours = 0;
        config.thresholds.pressure_hpa = [960.0, 975.0, 990.0, 1000.0];
        config.logging.level = "chatty".to_string();

        match config.validate() {
            Err(ConfigError::Validation(errors)) => assert_eq!(errors.len(), 3, "{:?}", errors),
            other => panic!("expected validation errors, got {:?}", other),
        }
    }

    #[test]
    fn test_shipped_config_matches_defaults() {
        let config = AppConfig::from_toml(include_str!("../hazmon.toml")).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.thresholds, HazardThresholds::default());
        assert_eq!(config.scheduler, SchedulerSettings::default());
        assert!(config.logging.console_timestamps);
    }

    #[test]
    fn test_oversized_interval_rejected() {
        let mut config = AppConfig::default();
        config.scheduler.interval_hours = u64::MAX;
        assert!(matches!(config.validate(), Err(ConfigError::Validation(ref e)) if e.len() == 1));
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let path = std::env::temp_dir().join("hazmon_missing_config_for_test.toml");
        let _ = std::fs::remove_file(&path);
        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_secrets_debug_is_masked() {
        let secrets = Secrets {
            openweather_api_key: Some("abc123".to_string()),
            ..Default::default()
        };
        let printed = format!("{:?}", secrets);
        assert!(!printed.contains("abc123"));
        assert!(printed.contains("set"));
    }
}
