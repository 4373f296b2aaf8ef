/// Structured logging for the hazard prediction service
///
/// Provides context-rich logging with subsystem tags, optional context
/// identifiers (station, endpoint, model directory), timestamps and
/// severity levels. Supports both console output and file-based logging
/// for daemon operations.

use chrono::Utc;
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Mutex;

use crate::model::FetchError;

// ---------------------------------------------------------------------------
// Log Levels
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    /// Parses a level name from config. Unknown names yield `None`.
    pub fn parse(name: &str) -> Option<LogLevel> {
        match name.trim().to_ascii_lowercase().as_str() {
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" | "warning" => Some(LogLevel::Warning),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warning => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

// ---------------------------------------------------------------------------
// Log Sources
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogSource {
    OpenWeather,
    WeatherLink,
    Model,
    Rules,
    Forecast,
    Scheduler,
    Alert,
    System,
}

impl fmt::Display for LogSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogSource::OpenWeather => write!(f, "OWM"),
            LogSource::WeatherLink => write!(f, "WLINK"),
            LogSource::Model => write!(f, "MODEL"),
            LogSource::Rules => write!(f, "RULES"),
            LogSource::Forecast => write!(f, "FCST"),
            LogSource::Scheduler => write!(f, "SCHED"),
            LogSource::Alert => write!(f, "ALERT"),
            LogSource::System => write!(f, "SYS"),
        }
    }
}

// ---------------------------------------------------------------------------
// Failure Classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureType {
    /// The key's plan does not cover the endpoint; a fallback exists.
    Expected,
    /// Outage, bad credentials or an API change.
    Unexpected,
    /// Transient or ambiguous (timeouts, 4xx other than auth).
    Unknown,
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureType::Expected => write!(f, "EXPECTED"),
            FailureType::Unexpected => write!(f, "UNEXPECTED"),
            FailureType::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

// ---------------------------------------------------------------------------
// Logger Configuration
// ---------------------------------------------------------------------------

static LOGGER: Mutex<Option<Logger>> = Mutex::new(None);

/// Process-wide sink for log lines. Installed once by `init_logger`;
/// until then every logging call is dropped.
pub struct Logger {
    min_level: LogLevel,
    /// Appended to when set; the console always gets a copy.
    log_file: Option<String>,
    /// Daemon mode: full timestamped lines on the console.
    console_timestamps: bool,
}

impl Logger {
    pub fn init(min_level: LogLevel, log_file: Option<String>, console_timestamps: bool) {
        let logger = Logger {
            min_level,
            log_file,
            console_timestamps,
        };

        // A poisoned lock only means another thread panicked mid-log.
        let mut slot = LOGGER.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = Some(logger);
    }

    fn log(&self, level: LogLevel, source: LogSource, context: Option<&str>, message: &str) {
        if level < self.min_level {
            return;
        }

        let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S UTC");

        let context_part = context.map(|s| format!(" [{}]", s)).unwrap_or_default();
        let log_entry = format!(
            "{} {} {}{}: {}",
            timestamp, level, source, context_part, message
        );

        if self.console_timestamps {
            match level {
                LogLevel::Error => eprintln!("{}", log_entry),
                LogLevel::Warning => eprintln!("   {}", log_entry),
                LogLevel::Info => println!("   {}", message),
                LogLevel::Debug => println!("   [DEBUG] {}", message),
            }
        } else {
            match level {
                LogLevel::Error => eprintln!("   ✗ {}{}: {}", source, context_part, message),
                LogLevel::Warning => eprintln!("   ⚠ {}{}: {}", source, context_part, message),
                LogLevel::Info => println!("   {}", message),
                LogLevel::Debug => {}
            }
        }

        if let Some(path) = self.log_file.as_deref() {
            if let Err(e) = Self::append_to_file(path, &log_entry) {
                eprintln!("Log file {} not writable: {}", path, e);
            }
        }
    }

    fn append_to_file(path: &str, entry: &str) -> std::io::Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", entry)?;
        Ok(())
    }
}

fn emit(level: LogLevel, source: LogSource, context: Option<&str>, message: &str) {
    let guard = LOGGER.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Some(logger) = guard.as_ref() {
        logger.log(level, source, context, message);
    }
}

// ---------------------------------------------------------------------------
// Public Logging Functions
// ---------------------------------------------------------------------------
//
// `context` is an optional identifier shown in brackets after the source
// tag: an endpoint, a model directory, a forecast index.

/// Installs the global logger. Calling it again replaces the previous one.
pub fn init_logger(min_level: LogLevel, log_file: Option<&str>, console_timestamps: bool) {
    Logger::init(min_level, log_file.map(String::from), console_timestamps);
}

pub fn info(source: LogSource, context: Option<&str>, message: &str) {
    emit(LogLevel::Info, source, context, message);
}

pub fn warn(source: LogSource, context: Option<&str>, message: &str) {
    emit(LogLevel::Warning, source, context, message);
}

pub fn error(source: LogSource, context: Option<&str>, message: &str) {
    emit(LogLevel::Error, source, context, message);
}

pub fn debug(source: LogSource, context: Option<&str>, message: &str) {
    emit(LogLevel::Debug, source, context, message);
}

// ---------------------------------------------------------------------------
// Failure Classification Helpers
// ---------------------------------------------------------------------------

/// Classify an upstream fetch failure.
///
/// A 401/403 is expected on the hourly endpoint for free-tier keys and is
/// handled by the 3-hour fallback, so it is logged quietly. Server errors
/// and parse failures point at an outage or an API change.
pub fn classify_fetch_failure(err: &FetchError) -> FailureType {
    match err {
        FetchError::Unauthorized(_) | FetchError::NotSupported(_) => FailureType::Expected,
        FetchError::HttpError(code) if *code >= 500 => FailureType::Unexpected,
        FetchError::ParseError(_) | FetchError::MissingCredentials(_) => FailureType::Unexpected,
        FetchError::RequestFailed(msg) if msg.contains("timed out") => FailureType::Unknown,
        FetchError::HttpError(_) | FetchError::RequestFailed(_) => FailureType::Unknown,
    }
}

// ---------------------------------------------------------------------------
// Structured Failure Logging
// ---------------------------------------------------------------------------

/// Logs a fetch failure at a level chosen by its classification.
pub fn log_fetch_failure(source: LogSource, endpoint: &str, operation: &str, err: &FetchError) {
    let failure_type = classify_fetch_failure(err);
    let message = format!("{} failed [{}]: {}", operation, failure_type, err);

    match failure_type {
        FailureType::Expected => debug(source, Some(endpoint), &message),
        FailureType::Unexpected => error(source, Some(endpoint), &message),
        FailureType::Unknown => warn(source, Some(endpoint), &message),
    }
}

// ---------------------------------------------------------------------------
// Cycle Summary Logging
// ---------------------------------------------------------------------------

/// One line per scheduler cycle; zero intervals is an error.
pub fn log_cycle_summary(intervals: usize, hazards: usize, skipped: usize, seconds: f64) {
    let message = format!(
        "Cycle complete: {} intervals, {} hazards, {} skipped in {:.1}s",
        intervals, hazards, skipped, seconds
    );

    if intervals == 0 {
        error(LogSource::Scheduler, None, &message);
    } else if skipped > 0 {
        warn(LogSource::Scheduler, None, &message);
    } else {
        info(LogSource::Scheduler, None, &message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_ordering() {
        let mut levels = vec![LogLevel::Error, LogLevel::Debug, LogLevel::Warning, LogLevel::Info];
        levels.sort();
        assert_eq!(
            levels,
            vec![LogLevel::Debug, LogLevel::Info, LogLevel::Warning, LogLevel::Error],
            "filtering relies on Debug < Info < Warning < Error"
        );
    }

    #[test]
    fn test_log_level_parse() {
        assert_eq!(LogLevel::parse("WARN"), Some(LogLevel::Warning));
        assert_eq!(LogLevel::parse("info"), Some(LogLevel::Info));
        assert_eq!(LogLevel::parse("verbose"), None);
    }

    #[test]
    fn test_failure_classification() {
        assert_eq!(
            classify_fetch_failure(&FetchError::Unauthorized(401)),
            FailureType::Expected,
            "hourly plan restrictions are expected"
        );
        assert_eq!(
            classify_fetch_failure(&FetchError::HttpError(503)),
            FailureType::Unexpected
        );
        assert_eq!(
            classify_fetch_failure(&FetchError::ParseError("bad json".into())),
            FailureType::Unexpected
        );
        assert_eq!(
            classify_fetch_failure(&FetchError::HttpError(429)),
            FailureType::Unknown
        );
    }

    #[test]
    fn test_logging_without_init_is_a_no_op() {
        // Must not panic when no logger has been installed.
        debug(LogSource::System, None, "no logger yet");
    }
}
