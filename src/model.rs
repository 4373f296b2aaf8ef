/// Core data types for the hazard prediction service.
///
/// This module defines the shared domain model imported by all other modules:
/// the canonical feature record every payload is normalized into, the
/// prediction record handed back to callers, and the error enums.
/// It contains no I/O.

use chrono::{DateTime, Datelike, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Defaults for missing source fields
// ---------------------------------------------------------------------------

/// Relative humidity assumed when a source does not report it.
pub const DEFAULT_HUMIDITY_PCT: f64 = 60.0;

/// Sea-level pressure assumed when a source does not report it.
/// A zero here would read as the deepest pressure tier.
pub const DEFAULT_PRESSURE_HPA: f64 = 1013.0;

/// Wind direction assumed when a source does not report it.
pub const DEFAULT_WIND_DIRECTION_DEG: f64 = 180.0;

/// Kelvin offset used by OpenWeather's `units=standard` payloads.
pub const KELVIN_OFFSET: f64 = 273.15;

// ---------------------------------------------------------------------------
// Source identifiers
// ---------------------------------------------------------------------------

/// The payload shapes the normalizer knows how to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Nested `main`/`wind`/`rain` objects, temperatures in Kelvin.
    OpenWeather,
    /// Flat `*_last`/`*_hi`/`*_lo` fields, already metric.
    WeatherLink,
}

impl SourceKind {
    /// Parses a source tag as sent by API callers.
    pub fn parse(tag: &str) -> Result<SourceKind, HazardError> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "openweather" => Ok(SourceKind::OpenWeather),
            "weatherlink" => Ok(SourceKind::WeatherLink),
            _ => Err(HazardError::UnsupportedSource(tag.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::OpenWeather => "openweather",
            SourceKind::WeatherLink => "weatherlink",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Canonical feature record
// ---------------------------------------------------------------------------

/// One weather observation or forecast point, independent of the provider.
///
/// Built by `analysis::features::normalize` (or `CanonicalFeatureRecord::new`
/// for already-metric measurements). The derived fields are computed once at
/// construction; the rolling means start out equal to the point's own values
/// and are only widened by `analysis::features::apply_rolling_means` when a
/// time-ordered series is available.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalFeatureRecord {
    pub timestamp: DateTime<Utc>,
    pub temperature_c: f64,
    pub temp_min_c: f64,
    pub temp_max_c: f64,
    pub pressure_hpa: f64,
    pub humidity_pct: f64,
    pub wind_speed_ms: f64,
    pub wind_gust_ms: f64,
    pub wind_direction_deg: f64,
    pub precipitation_mm: f64,

    // Derived
    pub temp_range: f64,
    pub humidity_estimate: f64,
    pub heat_index: f64,
    pub day_of_year: u32,
    pub month: u32,
    pub season: u32,
    pub is_weekend: bool,
    pub precip_rolling_3: f64,
    pub temp_rolling_3: f64,
    pub wind_rolling_3: f64,
}

/// Raw measurements before derivation. Every field is optional so that
/// each source adapter only fills what its payload actually carries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Measurements {
    pub timestamp: Option<DateTime<Utc>>,
    pub temperature_c: Option<f64>,
    pub temp_min_c: Option<f64>,
    pub temp_max_c: Option<f64>,
    pub pressure_hpa: Option<f64>,
    pub humidity_pct: Option<f64>,
    pub wind_speed_ms: Option<f64>,
    pub wind_gust_ms: Option<f64>,
    pub wind_direction_deg: Option<f64>,
    pub precipitation_mm: Option<f64>,
}

/// Drops NaN/inf so a bad upstream number falls back to the default.
fn finite(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite())
}

impl CanonicalFeatureRecord {
    /// Builds a record from raw measurements, applying the documented
    /// defaults and computing every derived field.
    ///
    /// `now` is used only when the measurements carry no timestamp.
    pub fn from_measurements(m: Measurements, now: DateTime<Utc>) -> Self {
        let temperature_c = finite(m.temperature_c).unwrap_or(0.0);
        let temp_min_c = finite(m.temp_min_c).unwrap_or(temperature_c);
        let temp_max_c = finite(m.temp_max_c).unwrap_or(temperature_c);
        let pressure_hpa = finite(m.pressure_hpa).unwrap_or(DEFAULT_PRESSURE_HPA);
        let humidity_pct = finite(m.humidity_pct)
            .unwrap_or(DEFAULT_HUMIDITY_PCT)
            .clamp(0.0, 100.0);
        let wind_speed_ms = finite(m.wind_speed_ms).unwrap_or(0.0);
        let wind_gust_ms = finite(m.wind_gust_ms).unwrap_or(wind_speed_ms);
        let wind_direction_deg =
            finite(m.wind_direction_deg).unwrap_or(DEFAULT_WIND_DIRECTION_DEG);
        let precipitation_mm = finite(m.precipitation_mm).unwrap_or(0.0);
        let timestamp = m.timestamp.unwrap_or(now);

        let month = timestamp.month();
        let humidity_estimate =
            (60.0 + precipitation_mm * 10.0 - (temperature_c - 20.0) * 2.0).clamp(0.0, 100.0);
        let heat_index = if temperature_c > 25.0 {
            temperature_c + 0.5 * (humidity_pct - 10.0)
        } else {
            temperature_c
        };

        CanonicalFeatureRecord {
            timestamp,
            temperature_c,
            temp_min_c,
            temp_max_c,
            pressure_hpa,
            humidity_pct,
            wind_speed_ms,
            wind_gust_ms,
            wind_direction_deg,
            precipitation_mm,
            temp_range: temp_max_c - temp_min_c,
            humidity_estimate,
            heat_index,
            day_of_year: timestamp.ordinal(),
            month,
            season: (month % 12 + 3) / 3,
            is_weekend: matches!(timestamp.weekday(), Weekday::Sat | Weekday::Sun),
            precip_rolling_3: precipitation_mm,
            temp_rolling_3: temperature_c,
            wind_rolling_3: wind_speed_ms,
        }
    }

    /// Looks up a feature by the column name used in model metadata.
    /// Returns `None` for names this record cannot produce.
    pub fn feature(&self, name: &str) -> Option<f64> {
        let value = match name {
            "temperature" => self.temperature_c,
            "temp_min" => self.temp_min_c,
            "temp_max" => self.temp_max_c,
            "pressure" => self.pressure_hpa,
            "humidity" => self.humidity_pct,
            "wind_speed" => self.wind_speed_ms,
            "wind_gust" => self.wind_gust_ms,
            "wind_direction" => self.wind_direction_deg,
            "precipitation" => self.precipitation_mm,
            "temp_range" => self.temp_range,
            "humidity_est" => self.humidity_estimate,
            "heat_index" => self.heat_index,
            "day_of_year" => self.day_of_year as f64,
            "month" => self.month as f64,
            "season" => self.season as f64,
            "is_weekend" => {
                if self.is_weekend {
                    1.0
                } else {
                    0.0
                }
            }
            "precip_rolling_3" => self.precip_rolling_3,
            "temp_rolling_3" => self.temp_rolling_3,
            "wind_rolling_3" => self.wind_rolling_3,
            _ => return None,
        };
        Some(value)
    }

    /// Like `feature`, but substitutes the neutral default for unknown names
    /// (humidity-like columns get 60, everything else 0).
    pub fn feature_or_default(&self, name: &str) -> f64 {
        self.feature(name).unwrap_or_else(|| default_for_column(name))
    }
}

/// Every column name `CanonicalFeatureRecord::feature` can produce, in the
/// order the trainer emits them.
pub const FEATURE_COLUMNS: &[&str] = &[
    "temperature",
    "temp_min",
    "temp_max",
    "precipitation",
    "wind_speed",
    "wind_gust",
    "wind_direction",
    "pressure",
    "humidity",
    "temp_range",
    "day_of_year",
    "month",
    "season",
    "is_weekend",
    "humidity_est",
    "heat_index",
    "precip_rolling_3",
    "temp_rolling_3",
    "wind_rolling_3",
];

/// Neutral default for a model column the normalizer does not produce.
pub fn default_for_column(name: &str) -> f64 {
    if name == "humidity" {
        DEFAULT_HUMIDITY_PCT
    } else {
        0.0
    }
}

// ---------------------------------------------------------------------------
// Hazard vocabulary
// ---------------------------------------------------------------------------

/// Named hazard categories, derived from the triggered tag set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HazardType {
    #[serde(rename = "Tropical Cyclone")]
    TropicalCyclone,
    #[serde(rename = "Tropical Storm")]
    TropicalStorm,
    #[serde(rename = "Flood Risk")]
    FloodRisk,
    #[serde(rename = "Windstorm")]
    Windstorm,
    #[serde(rename = "Heatwave")]
    Heatwave,
    #[serde(rename = "Possible Cyclone")]
    PossibleCyclone,
    #[serde(rename = "Low Pressure")]
    LowPressure,
    /// The model predicted an event the rules could not explain.
    #[serde(rename = "General Hazard")]
    GeneralHazard,
    #[serde(rename = "None")]
    None,
}

impl HazardType {
    pub fn as_str(&self) -> &'static str {
        match self {
            HazardType::TropicalCyclone => "Tropical Cyclone",
            HazardType::TropicalStorm => "Tropical Storm",
            HazardType::FloodRisk => "Flood Risk",
            HazardType::Windstorm => "Windstorm",
            HazardType::Heatwave => "Heatwave",
            HazardType::PossibleCyclone => "Possible Cyclone",
            HazardType::LowPressure => "Low Pressure",
            HazardType::GeneralHazard => "General Hazard",
            HazardType::None => "None",
        }
    }

    pub fn is_none(&self) -> bool {
        *self == HazardType::None
    }

    /// Cyclone-class hazards use the stricter risk ladder.
    pub fn is_cyclonic(&self) -> bool {
        matches!(self, HazardType::TropicalCyclone | HazardType::TropicalStorm)
    }
}

impl fmt::Display for HazardType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity ladder, in ascending order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Moderate,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Moderate => "moderate",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Prediction output
// ---------------------------------------------------------------------------

/// Which path produced a prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionSource {
    /// The trained model decided the event flag.
    MlModel,
    /// No model is available; the rule engine decided.
    RulesOnly,
    /// A model is present but failed; the rule engine decided.
    RulesFallback,
}

impl PredictionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PredictionSource::MlModel => "ml_model",
            PredictionSource::RulesOnly => "rules_only",
            PredictionSource::RulesFallback => "rules_fallback",
        }
    }
}

impl fmt::Display for PredictionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Class probabilities as reported by the model (zero/one for rules).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassProbabilities {
    pub no_event: f64,
    pub event: f64,
}

/// The outcome of one prediction.
///
/// Invariant: `!event` implies `hazard_type == HazardType::None`, which
/// implies `risk_level == RiskLevel::Low`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HazardPrediction {
    pub timestamp: DateTime<Utc>,
    pub event: bool,
    pub probability: f64,
    pub probabilities: ClassProbabilities,
    pub hazard_type: HazardType,
    pub hazards_triggered: Vec<String>,
    pub risk_level: RiskLevel,
    pub source: PredictionSource,
    /// Set only for `rules_fallback`: why the model path was abandoned.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Input errors: surfaced to the caller of a single prediction, logged and
/// skipped inside batches.
#[derive(Debug, Clone, PartialEq)]
pub enum HazardError {
    /// The source tag is not one the normalizer understands.
    UnsupportedSource(String),
    /// The payload does not have the shape its source promises.
    MalformedPayload(String),
}

impl fmt::Display for HazardError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HazardError::UnsupportedSource(tag) => {
                write!(f, "Unsupported source: {} (use 'openweather' or 'weatherlink')", tag)
            }
            HazardError::MalformedPayload(msg) => write!(f, "Malformed payload: {}", msg),
        }
    }
}

impl std::error::Error for HazardError {}

/// Errors raised while fetching from an upstream weather API.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchError {
    /// 401/403: bad key or the plan does not include this endpoint.
    Unauthorized(u16),
    /// Any other non-2xx HTTP response.
    HttpError(u16),
    /// Connection, timeout or TLS failure.
    RequestFailed(String),
    /// The response body could not be deserialized.
    ParseError(String),
    /// A required credential is missing from the environment.
    MissingCredentials(String),
    /// The source has no endpoint for the requested data.
    NotSupported(String),
}

impl FetchError {
    /// Maps an HTTP status to the matching error variant.
    pub fn from_status(status: u16) -> FetchError {
        match status {
            401 | 403 => FetchError::Unauthorized(status),
            other => FetchError::HttpError(other),
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, FetchError::Unauthorized(_))
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::Unauthorized(code) => write!(f, "Unauthorized: HTTP {}", code),
            FetchError::HttpError(code) => write!(f, "HTTP error: {}", code),
            FetchError::RequestFailed(msg) => write!(f, "Request failed: {}", msg),
            FetchError::ParseError(msg) => write!(f, "Parse error: {}", msg),
            FetchError::MissingCredentials(what) => write!(f, "Missing credentials: {}", what),
            FetchError::NotSupported(what) => write!(f, "Not supported: {}", what),
        }
    }
}

impl std::error::Error for FetchError {}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => FetchError::from_status(status.as_u16()),
            None if err.is_decode() => FetchError::ParseError(err.to_string()),
            None => FetchError::RequestFailed(err.to_string()),
        }
    }
}

/// Errors from loading or invoking the trained model. Never surfaced past
/// the hybrid predictor.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelError {
    /// No artifact exists at the configured location.
    NotFound(String),
    /// The artifact exists but could not be read or parsed.
    LoadFailed(String),
    /// The input vector does not match what the model was fit on.
    ShapeMismatch { expected: usize, actual: usize },
    /// The model produced a non-finite or otherwise unusable output.
    InvalidOutput(String),
}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::NotFound(path) => write!(f, "Model not found: {}", path),
            ModelError::LoadFailed(msg) => write!(f, "Model load failed: {}", msg),
            ModelError::ShapeMismatch { expected, actual } => {
                write!(f, "Feature shape mismatch: expected {}, got {}", expected, actual)
            }
            ModelError::InvalidOutput(msg) => write!(f, "Invalid model output: {}", msg),
        }
    }
}

impl std::error::Error for ModelError {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
