//! Current conditions and short-range forecast from OpenWeatherMap.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::FetchError;
use crate::fetch::auth::UrlParam;
use crate::fetch::{BasicClient, fetch_json};
use crate::output::{timestamp_now, write_json};
use crate::retry::RetryPolicy;

const WEATHER_TIMEOUT: Duration = Duration::from_secs(10);
const API_KEY_VAR: &str = "OPENWEATHER_API_KEY";
const API_KEY_PARAM: &str = "appid";
/// Fahrenheit, mph.
const UNITS: &str = "imperial";
/// The forecast endpoint returns one entry per 3-hour block.
const FORECAST_BLOCK_HOURS: u32 = 3;
pub const DEFAULT_FORECAST_HOURS: u32 = 24;

/// Flat summary of the current-conditions document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeatherSummary {
    pub timestamp: DateTime<Local>,
    pub temp: Option<f64>,
    pub feels_like: Option<f64>,
    pub humidity: Option<i64>,
    pub pressure: Option<i64>,
    pub description: String,
    pub wind_speed: Option<f64>,
    pub clouds: Option<i64>,
    pub visibility: Option<i64>,
    /// Present only when the source document reports rain.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rain_1h: Option<f64>,
    /// Present only when the source document reports snow.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snow_1h: Option<f64>,
}

pub struct WeatherFetcher {
    /// `None` when no API key is configured.
    client: Option<UrlParam<BasicClient>>,
    base_url: String,
    lat: f64,
    lon: f64,
    save_dir: PathBuf,
    retry: RetryPolicy,
}

impl WeatherFetcher {
    pub fn new(config: &Config) -> Result<Self> {
        let client = match &config.openweather_api_key {
            Some(key) => Some(UrlParam::new(
                BasicClient::with_timeout(WEATHER_TIMEOUT)?,
                API_KEY_PARAM,
                key,
            )),
            None => {
                warn!("No openweather api key found, get one at openweathermap.org/api");
                None
            }
        };

        let save_dir = config.raw_data_dir.join("weather");
        std::fs::create_dir_all(&save_dir)
            .with_context(|| format!("failed to create {}", save_dir.display()))?;

        Ok(Self {
            client,
            base_url: config.weather_api_base.clone(),
            lat: config.nyc_lat,
            lon: config.nyc_lon,
            save_dir,
            retry: RetryPolicy::new(2, Duration::from_secs(1)),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn save_dir(&self) -> &Path {
        &self.save_dir
    }

    /// Current conditions at the configured coordinates.
    #[tracing::instrument(skip(self))]
    pub async fn fetch_current_weather(&self) -> Result<Value, FetchError> {
        self.get("weather", &[])
            .await
            .inspect_err(|e| error!(kind = e.kind(), error = %e, "Failed to fetch weather"))
    }

    /// Forecast covering `hours`, requested as `hours / 3` three-hour blocks.
    #[tracing::instrument(skip(self))]
    pub async fn fetch_forecast(&self, hours: u32) -> Result<Value, FetchError> {
        let blocks = hours / FORECAST_BLOCK_HOURS;
        self.get("forecast", &[("cnt", blocks.to_string())])
            .await
            .inspect_err(|e| error!(kind = e.kind(), error = %e, "Failed to fetch forecast"))
    }

    async fn get(&self, endpoint: &str, extra: &[(&str, String)]) -> Result<Value, FetchError> {
        let Some(client) = &self.client else {
            return Err(FetchError::MissingCredential(API_KEY_VAR));
        };

        let url = format!("{}/{}", self.base_url, endpoint);
        let mut params = vec![
            ("lat", self.lat.to_string()),
            ("lon", self.lon.to_string()),
            ("units", UNITS.to_string()),
        ];
        params.extend(extra.iter().cloned());

        fetch_json(client, &url, &params).await
    }

    /// Fetches current conditions and the forecast, then writes
    /// `current_<ts>.json`, `forecast_<ts>.json` and `parsed_<ts>.json` under
    /// one shared timestamp.
    ///
    /// A failed current-conditions fetch is returned as an error; a failed
    /// forecast is logged and the forecast file is skipped. Returns `Ok(None)`
    /// without any request when no API key is configured, and when the
    /// current-conditions document is empty.
    #[tracing::instrument(skip(self))]
    pub async fn fetch_and_save(&self, forecast_hours: u32) -> Result<Option<WeatherSummary>> {
        if self.client.is_none() {
            warn!(var = API_KEY_VAR, "No api key, skipping weather fetch");
            return Ok(None);
        }

        info!("Fetching nyc weather");

        let current = self.retry.run(move || self.fetch_current_weather()).await?;

        let forecast = match self.retry.run(move || self.fetch_forecast(forecast_hours)).await {
            Ok(forecast) => Some(forecast),
            Err(e) => {
                warn!(error = %e, "Continuing without forecast");
                None
            }
        };

        let Some(summary) = parse_weather_data(&current, forecast.as_ref()) else {
            warn!("No weather data fetched");
            return Ok(None);
        };

        let timestamp = timestamp_now();

        let current_path = self.save_dir.join(format!("current_{timestamp}.json"));
        write_json(&current_path, &current)?;
        info!(path = %current_path.display(), "Saved current weather");

        if let Some(forecast) = forecast.as_ref().filter(|f| !is_empty_document(f)) {
            let forecast_path = self.save_dir.join(format!("forecast_{timestamp}.json"));
            write_json(&forecast_path, forecast)?;
            info!(path = %forecast_path.display(), "Saved forecast");
        }

        let parsed_path = self.save_dir.join(format!("parsed_{timestamp}.json"));
        write_json(&parsed_path, &summary)?;

        log_conditions(&summary);

        Ok(Some(summary))
    }
}

/// Extracts the fixed summary fields from a current-conditions document.
///
/// Missing fields become `None` (or `""` for the description). Returns `None`
/// for a null or empty document. `_forecast` is accepted for callers that have
/// one but does not contribute to the summary.
pub fn parse_weather_data(current: &Value, _forecast: Option<&Value>) -> Option<WeatherSummary> {
    if is_empty_document(current) {
        return None;
    }

    let main = &current["main"];
    let precipitation = |key: &str| {
        current
            .get(key)
            .map(|block| block["1h"].as_f64().unwrap_or(0.0))
    };

    Some(WeatherSummary {
        timestamp: Local::now(),
        temp: main["temp"].as_f64(),
        feels_like: main["feels_like"].as_f64(),
        humidity: as_int(&main["humidity"]),
        pressure: as_int(&main["pressure"]),
        description: current["weather"][0]["description"]
            .as_str()
            .unwrap_or_default()
            .to_string(),
        wind_speed: current["wind"]["speed"].as_f64(),
        clouds: as_int(&current["clouds"]["all"]),
        visibility: as_int(&current["visibility"]),
        rain_1h: precipitation("rain"),
        snow_1h: precipitation("snow"),
    })
}

fn log_conditions(summary: &WeatherSummary) {
    info!(
        "Current: {}°F, {}",
        or_unknown(summary.temp),
        summary.description
    );
    info!("Feels like: {}°F", or_unknown(summary.feels_like));

    if let Some(rain) = summary.rain_1h.filter(|v| *v != 0.0) {
        info!("Rain: {rain}mm in last hour");
    }
    if let Some(snow) = summary.snow_1h.filter(|v| *v != 0.0) {
        info!("Snow: {snow}mm in last hour");
    }
}

fn or_unknown(value: Option<f64>) -> String {
    value.map_or_else(|| "n/a".to_string(), |v| v.to_string())
}

/// Integer reading that tolerates a float encoding such as `1013.0`.
fn as_int(value: &Value) -> Option<i64> {
    value.as_i64().or_else(|| value.as_f64().map(|f| f.round() as i64))
}

fn is_empty_document(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}
