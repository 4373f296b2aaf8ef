pub mod openweather;
pub mod weatherlink;

use reqwest::blocking::RequestBuilder;
use serde::Serialize;
use serde_json::Value;

use crate::model::{FetchError, SourceKind};

/// Spacing of forecast points requested from a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ForecastResolution {
    Hourly,
    ThreeHourly,
}

impl ForecastResolution {
    pub fn interval_hours(&self) -> u64 {
        match self {
            ForecastResolution::Hourly => 1,
            ForecastResolution::ThreeHourly => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ForecastResolution::Hourly => "hourly",
            ForecastResolution::ThreeHourly => "three_hourly",
        }
    }
}

/// A provider of raw weather payloads.
///
/// Payloads are returned untouched; `analysis::features::normalize` turns
/// them into canonical records using `kind()` to pick the field mapping.
pub trait WeatherSource: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// Latest observation as a single payload object.
    fn fetch_current(&self) -> Result<Value, FetchError>;

    /// Forecast points in time order. `count` caps the number of points
    /// when the provider supports it.
    fn fetch_forecast(
        &self,
        resolution: ForecastResolution,
        count: Option<usize>,
    ) -> Result<Vec<Value>, FetchError>;
}

/// Sends a prepared request and decodes the JSON body, mapping non-2xx
/// statuses through `FetchError::from_status`.
pub(crate) fn send_json(request: RequestBuilder) -> Result<Value, FetchError> {
    let response = request.header("Accept", "application/json").send()?;

    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::from_status(status.as_u16()));
    }

    response
        .json::<Value>()
        .map_err(|e| FetchError::ParseError(e.to_string()))
}

/// Builds the shared blocking client with the configured timeout.
pub(crate) fn build_http_client(timeout_secs: u64) -> Result<reqwest::blocking::Client, FetchError> {
    reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| FetchError::RequestFailed(e.to_string()))
}
