/// Feature normalization.
///
/// Turns provider payloads into `CanonicalFeatureRecord`s. Each provider
/// gets a typed view of its payload; any field may be absent or null, but a
/// field of the wrong JSON type (or a payload that is not an object) is a
/// `MalformedPayload` error rather than a silent default.

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::model::{
    CanonicalFeatureRecord, HazardError, KELVIN_OFFSET, Measurements, SourceKind,
};

/// Trailing window used for the rolling-mean features.
pub const ROLLING_WINDOW: usize = 3;

// ============================================================================
// OpenWeather payload
// ============================================================================

#[derive(Debug, Default, Deserialize)]
struct OwPayload {
    dt: Option<i64>,
    main: Option<OwMain>,
    wind: Option<OwWind>,
    rain: Option<OwPrecip>,
    snow: Option<OwPrecip>,
}

#[derive(Debug, Default, Deserialize)]
struct OwMain {
    temp: Option<f64>,
    temp_min: Option<f64>,
    temp_max: Option<f64>,
    pressure: Option<f64>,
    humidity: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct OwWind {
    speed: Option<f64>,
    gust: Option<f64>,
    deg: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct OwPrecip {
    #[serde(rename = "1h")]
    one_hour: Option<f64>,
    #[serde(rename = "3h")]
    three_hour: Option<f64>,
}

impl OwPrecip {
    /// 1-hour accumulation when reported, otherwise the 3-hour one.
    fn amount(&self) -> Option<f64> {
        self.one_hour.or(self.three_hour)
    }
}

fn kelvin_to_celsius(k: Option<f64>) -> Option<f64> {
    k.map(|v| v - KELVIN_OFFSET)
}

fn openweather_measurements(payload: OwPayload) -> Measurements {
    let main = payload.main.unwrap_or_default();
    let wind = payload.wind.unwrap_or_default();

    let rain = payload.rain.as_ref().and_then(OwPrecip::amount);
    let snow = payload.snow.as_ref().and_then(OwPrecip::amount);
    let precipitation_mm = match (rain, snow) {
        (None, None) => None,
        (r, s) => Some(r.unwrap_or(0.0) + s.unwrap_or(0.0)),
    };

    Measurements {
        timestamp: payload.dt.and_then(unix_seconds),
        temperature_c: kelvin_to_celsius(main.temp),
        temp_min_c: kelvin_to_celsius(main.temp_min),
        temp_max_c: kelvin_to_celsius(main.temp_max),
        pressure_hpa: main.pressure,
        humidity_pct: main.humidity,
        wind_speed_ms: wind.speed,
        wind_gust_ms: wind.gust,
        wind_direction_deg: wind.deg,
        precipitation_mm,
    }
}

// ============================================================================
// WeatherLink payload
// ============================================================================

#[derive(Debug, Default, Deserialize)]
struct WlRecord {
    ts: Option<i64>,
    temp_last: Option<f64>,
    temp_lo: Option<f64>,
    temp_hi: Option<f64>,
    pressure: Option<f64>,
    bar_sea_level: Option<f64>,
    hum_last: Option<f64>,
    wind_speed_last: Option<f64>,
    wind_speed_hi: Option<f64>,
    wind_dir_last: Option<f64>,
    rainfall_mm: Option<f64>,
}

fn weatherlink_measurements(record: WlRecord) -> Measurements {
    Measurements {
        timestamp: record.ts.and_then(unix_seconds),
        temperature_c: record.temp_last,
        temp_min_c: record.temp_lo,
        temp_max_c: record.temp_hi,
        pressure_hpa: record.pressure.or(record.bar_sea_level),
        humidity_pct: record.hum_last,
        wind_speed_ms: record.wind_speed_last,
        wind_gust_ms: record.wind_speed_hi,
        wind_direction_deg: record.wind_dir_last,
        precipitation_mm: record.rainfall_mm,
    }
}

fn unix_seconds(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}

// ============================================================================
// Public API
// ============================================================================

/// Normalizes a payload tagged with a source name ("openweather" or
/// "weatherlink", case-insensitive). Points without a timestamp are stamped
/// with the current time.
pub fn normalize(payload: &Value, source: &str) -> Result<CanonicalFeatureRecord, HazardError> {
    let kind = SourceKind::parse(source)?;
    normalize_as(kind, payload, Utc::now())
}

/// Normalizes a payload of a known source kind. `now` is used only when the
/// payload carries no timestamp.
pub fn normalize_as(
    kind: SourceKind,
    payload: &Value,
    now: DateTime<Utc>,
) -> Result<CanonicalFeatureRecord, HazardError> {
    if !payload.is_object() {
        return Err(HazardError::MalformedPayload(format!(
            "{} payload must be a JSON object",
            kind
        )));
    }

    let measurements = match kind {
        SourceKind::OpenWeather => {
            let parsed: OwPayload = OwPayload::deserialize(payload)
                .map_err(|e| HazardError::MalformedPayload(format!("openweather: {}", e)))?;
            openweather_measurements(parsed)
        }
        SourceKind::WeatherLink => {
            let parsed: WlRecord = WlRecord::deserialize(payload)
                .map_err(|e| HazardError::MalformedPayload(format!("weatherlink: {}", e)))?;
            weatherlink_measurements(parsed)
        }
    };

    Ok(CanonicalFeatureRecord::from_measurements(measurements, now))
}

/// Recomputes the rolling-mean features over a time-ordered series.
///
/// Each point averages itself with up to `ROLLING_WINDOW - 1` predecessors,
/// so the first points use a shorter window.
pub fn apply_rolling_means(records: &mut [CanonicalFeatureRecord]) {
    let raw: Vec<(f64, f64, f64)> = records
        .iter()
        .map(|r| (r.precipitation_mm, r.temperature_c, r.wind_speed_ms))
        .collect();

    for (i, record) in records.iter_mut().enumerate() {
        let start = (i + 1).saturating_sub(ROLLING_WINDOW);
        let window = &raw[start..=i];
        let n = window.len() as f64;

        record.precip_rolling_3 = window.iter().map(|w| w.0).sum::<f64>() / n;
        record.temp_rolling_3 = window.iter().map(|w| w.1).sum::<f64>() / n;
        record.wind_rolling_3 = window.iter().map(|w| w.2).sum::<f64>() / n;
    }
}

// ============================================================================
// Tests
// ============================================================================
