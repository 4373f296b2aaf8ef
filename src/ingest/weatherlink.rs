/// WeatherLink v2 API Client
///
/// Reads current and historic conditions from a Davis station. Responses
/// carry one entry per logical sensor; only the sensor whose `lsid` matches
/// the configured ISS is used, and its first data record is the flat
/// payload the normalizer expects.
///
/// API Documentation: https://weatherlink.github.io/v2-api/

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::config::WeatherLinkConfig;
use crate::ingest::{ForecastResolution, WeatherSource, build_http_client, send_json};
use crate::model::{FetchError, SourceKind};

// ============================================================================
// WeatherLink API Response Structures
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct StationResponse {
    #[serde(default)]
    pub station_id: Option<u64>,
    #[serde(default)]
    pub sensors: Vec<SensorBlock>,
}

#[derive(Debug, Deserialize)]
pub struct SensorBlock {
    pub lsid: u64,
    #[serde(default)]
    pub sensor_type: Option<u64>,
    #[serde(default)]
    pub data: Vec<Value>,
}

/// Returns the data records of the sensor with `lsid`.
pub fn sensor_records(body: Value, lsid: u64) -> Result<Vec<Value>, FetchError> {
    let response: StationResponse =
        serde_json::from_value(body).map_err(|e| FetchError::ParseError(e.to_string()))?;

    response
        .sensors
        .into_iter()
        .find(|s| s.lsid == lsid)
        .map(|s| s.data)
        .ok_or_else(|| FetchError::ParseError(format!("sensor with lsid {} not found", lsid)))
}

// ============================================================================
// API Client
// ============================================================================

pub struct WeatherLinkClient {
    http: reqwest::blocking::Client,
    base_url: String,
    station_id: String,
    lsid: u64,
    api_key: String,
    api_secret: String,
}

impl WeatherLinkClient {
    pub fn new(
        config: &WeatherLinkConfig,
        api_key: Option<String>,
        api_secret: Option<String>,
    ) -> Result<Self, FetchError> {
        let missing = |what: &str| FetchError::MissingCredentials(what.to_string());
        Ok(WeatherLinkClient {
            http: build_http_client(config.timeout_secs)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            station_id: config
                .station_id
                .clone()
                .ok_or_else(|| missing("weatherlink.station_id"))?,
            lsid: config.lsid,
            api_key: api_key.ok_or_else(|| missing("WEATHERLINK_API_KEY"))?,
            api_secret: api_secret.ok_or_else(|| missing("WEATHERLINK_API_SECRET"))?,
        })
    }

    fn get(&self, url: &str) -> reqwest::blocking::RequestBuilder {
        self.http
            .get(url)
            .query(&[("api-key", self.api_key.as_str())])
            .header("x-api-secret", self.api_secret.as_str())
    }

    /// Archive records between two instants, oldest first.
    pub fn fetch_historic(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Value>, FetchError> {
        let url = format!("{}/historic/{}", self.base_url, self.station_id);
        let request = self.get(&url).query(&[
            ("start-timestamp", start.timestamp().to_string()),
            ("end-timestamp", end.timestamp().to_string()),
        ]);
        sensor_records(send_json(request)?, self.lsid)
    }
}

impl WeatherSource for WeatherLinkClient {
    fn kind(&self) -> SourceKind {
        SourceKind::WeatherLink
    }

    fn fetch_current(&self) -> Result<Value, FetchError> {
        let url = format!("{}/current/{}", self.base_url, self.station_id);
        sensor_records(send_json(self.get(&url))?, self.lsid)?
            .into_iter()
            .next()
            .ok_or_else(|| FetchError::ParseError(format!("sensor {} returned no data", self.lsid)))
    }

    fn fetch_forecast(
        &self,
        _resolution: ForecastResolution,
        _count: Option<usize>,
    ) -> Result<Vec<Value>, FetchError> {
        Err(FetchError::NotSupported(
            "WeatherLink stations report observations only".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn station_body() -> Value {
        json!({
            "station_id": 205011,
            "sensors": [
                {"lsid": 813259, "sensor_type": 504, "data": [{"bar_sea_level": 1008.1}]},
                {"lsid": 813260, "sensor_type": 45, "data": [
                    {"ts": 1760914800, "temp_last": 27.4, "hum_last": 88.0},
                    {"ts": 1760915700, "temp_last": 27.1, "hum_last": 90.0}
                ]}
            ]
        })
    }

    #[test]
    fn test_sensor_records_picks_matching_lsid() {
        let records = sensor_records(station_body(), 813260).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["temp_last"], 27.4);
    }

    #[test]
    fn test_missing_sensor_is_parse_error() {
        let err = sensor_records(station_body(), 1).unwrap_err();
        assert!(err.to_string().contains("lsid 1"));
    }

    #[test]
    fn test_body_without_sensors_yields_not_found() {
        assert!(sensor_records(json!({"station_id": 1}), 813260).is_err());
        assert!(matches!(
            sensor_records(json!("oops"), 813260),
            Err(FetchError::ParseError(_))
        ));
    }

    #[test]
    fn test_client_requires_station_and_secrets() {
        let config = WeatherLinkConfig::default();
        let result = WeatherLinkClient::new(&config, Some("k".into()), Some("s".into()));
        assert!(matches!(result, Err(FetchError::MissingCredentials(_))));

        let config = WeatherLinkConfig {
            station_id: Some("205011".into()),
            ..WeatherLinkConfig::default()
        };
        let result = WeatherLinkClient::new(&config, Some("k".into()), None);
        assert!(matches!(result, Err(FetchError::MissingCredentials(_))));
    }

    #[test]
    fn test_forecast_is_not_supported() {
        let config = WeatherLinkConfig {
            station_id: Some("205011".into()),
            ..WeatherLinkConfig::default()
        };
        let client = WeatherLinkClient::new(&config, Some("k".into()), Some("s".into())).unwrap();
        assert!(matches!(
            client.fetch_forecast(ForecastResolution::Hourly, None),
            Err(FetchError::NotSupported(_))
        ));
    }
}
