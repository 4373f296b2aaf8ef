/// OpenWeather Data API Client
///
/// Retrieves current conditions and forecasts for a fixed coordinate.
/// All requests use `units=standard` (Kelvin), which is what the feature
/// normalizer and the trained model expect.
///
/// API Documentation: https://openweathermap.org/forecast5
/// Hourly (paid plans): https://openweathermap.org/api/hourly-forecast

use serde_json::Value;

use crate::config::OpenWeatherConfig;
use crate::ingest::{ForecastResolution, WeatherSource, build_http_client, send_json};
use crate::logging::{self, LogSource};
use crate::model::{FetchError, SourceKind};

// ============================================================================
// URL Construction
// ============================================================================

/// Path of the forecast endpoint for a resolution. The hourly endpoint is
/// only available on paid plans and answers 401/403 otherwise.
pub fn forecast_path(resolution: ForecastResolution) -> &'static str {
    match resolution {
        ForecastResolution::Hourly => "/forecast/hourly",
        ForecastResolution::ThreeHourly => "/forecast",
    }
}

pub fn build_current_url(base_url: &str, lat: f64, lon: f64, api_key: &str) -> String {
    format!(
        "{}/weather?lat={}&lon={}&appid={}&units=standard",
        base_url.trim_end_matches('/'),
        lat,
        lon,
        api_key
    )
}

pub fn build_forecast_url(
    base_url: &str,
    resolution: ForecastResolution,
    lat: f64,
    lon: f64,
    api_key: &str,
    count: Option<usize>,
) -> String {
    let mut url = format!(
        "{}{}?lat={}&lon={}&appid={}&units=standard",
        base_url.trim_end_matches('/'),
        forecast_path(resolution),
        lat,
        lon,
        api_key
    );
    if let Some(cnt) = count {
        url.push_str(&format!("&cnt={}", cnt));
    }
    url
}

// ============================================================================
// Response Parsing
// ============================================================================

/// Pulls the `list` array out of a forecast response. A body without one is
/// a parse error; an empty list is a valid (if useless) answer.
pub fn extract_forecast_list(body: Value) -> Result<Vec<Value>, FetchError> {
    match body {
        Value::Object(mut map) => match map.remove("list") {
            Some(Value::Array(points)) => Ok(points),
            Some(other) => Err(FetchError::ParseError(format!(
                "forecast 'list' is not an array: {}",
                type_name(&other)
            ))),
            None => Err(FetchError::ParseError(
                "forecast response has no 'list' field".to_string(),
            )),
        },
        other => Err(FetchError::ParseError(format!(
            "forecast response is not an object: {}",
            type_name(&other)
        ))),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ============================================================================
// API Client
// ============================================================================

pub struct OpenWeatherClient {
    http: reqwest::blocking::Client,
    base_url: String,
    api_key: String,
    lat: f64,
    lon: f64,
}

impl OpenWeatherClient {
    pub fn new(config: &OpenWeatherConfig, api_key: Option<String>) -> Result<Self, FetchError> {
        let api_key = api_key
            .ok_or_else(|| FetchError::MissingCredentials("OPENWEATHER_API_KEY".to_string()))?;
        Ok(OpenWeatherClient {
            http: build_http_client(config.timeout_secs)?,
            base_url: config.base_url.clone(),
            api_key,
            lat: config.lat,
            lon: config.lon,
        })
    }
}

impl WeatherSource for OpenWeatherClient {
    fn kind(&self) -> SourceKind {
        SourceKind::OpenWeather
    }

    fn fetch_current(&self) -> Result<Value, FetchError> {
        let url = build_current_url(&self.base_url, self.lat, self.lon, &self.api_key);
        send_json(self.http.get(&url))
    }

    fn fetch_forecast(
        &self,
        resolution: ForecastResolution,
        count: Option<usize>,
    ) -> Result<Vec<Value>, FetchError> {
        let url = build_forecast_url(
            &self.base_url,
            resolution,
            self.lat,
            self.lon,
            &self.api_key,
            count,
        );
        let points = extract_forecast_list(send_json(self.http.get(&url))?)?;

        logging::debug(
            LogSource::OpenWeather,
            Some(forecast_path(resolution)),
            &format!("Fetched {} forecast points", points.len()),
        );
        Ok(points)
    }
}

// ============================================================================
// Tests
// ============================================================================
