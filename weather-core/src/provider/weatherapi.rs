use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

use crate::{
    model::{AirQuality, RecordType, WeatherRecord},
    retry::{RetryError, RetryPolicy, with_retry},
};

use super::WeatherSource;

/// Days requested from the forecast endpoint.
pub const FORECAST_DAYS: u32 = 3;

/// Why a single GET did not produce JSON.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("WeatherAPI responded with status {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("response body is not valid JSON: {0}")]
    Decode(#[from] serde_json::Error),
}

impl FetchError {
    /// Timeouts, connection failures and error statuses are worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Transport(e) => {
                e.is_timeout() || e.is_connect() || e.is_request() || e.is_body()
            }
            FetchError::Status { .. } => true,
            FetchError::Decode(_) => false,
        }
    }
}

/// Parse a base URL, making sure endpoint names join onto it rather than replace its last segment.
pub fn parse_base_url(base: &str) -> Result<Url> {
    let normalized = if base.ends_with('/') { base.to_string() } else { format!("{base}/") };
    let url = Url::parse(&normalized)
        .with_context(|| format!("Invalid WeatherAPI base URL: {base}"))?;

    if url.cannot_be_a_base() {
        return Err(anyhow!("Invalid WeatherAPI base URL: {base}"));
    }
    Ok(url)
}

/// `forecast.json` for `city`: three days, air quality on, alerts off.
pub fn forecast_url(base: &Url, api_key: &str, city: &str) -> Result<Url> {
    let mut url = base.join("forecast.json").context("Failed to build forecast URL")?;
    url.query_pairs_mut()
        .append_pair("key", api_key)
        .append_pair("q", city)
        .append_pair("days", &FORECAST_DAYS.to_string())
        .append_pair("aqi", "yes")
        .append_pair("alerts", "no");
    Ok(url)
}

/// `history.json` for `city` on a single date.
pub fn history_url(base: &Url, api_key: &str, city: &str, date: NaiveDate) -> Result<Url> {
    let mut url = base.join("history.json").context("Failed to build history URL")?;
    url.query_pairs_mut()
        .append_pair("key", api_key)
        .append_pair("q", city)
        .append_pair("dt", &date.format("%Y-%m-%d").to_string());
    Ok(url)
}

#[derive(Debug, Clone)]
pub struct WeatherApiClient {
    api_key: String,
    base_url: Url,
    http: Client,
    retry: RetryPolicy,
}

impl WeatherApiClient {
    pub fn new(
        api_key: String,
        base_url: &str,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self { api_key, base_url: parse_base_url(base_url)?, http, retry })
    }

    async fn get_json(&self, url: &Url) -> Result<Value, FetchError> {
        let res = self.http.get(url.clone()).send().await?;

        let status = res.status();
        let body = res.text().await?;

        if !status.is_success() {
            return Err(FetchError::Status { status, body: truncate_body(&body) });
        }

        Ok(serde_json::from_str(&body)?)
    }

    /// GET `url` under the retry policy. `label` is logged in place of the URL,
    /// which carries the API key.
    pub async fn fetch(&self, url: &Url, label: &str) -> Option<Value> {
        match with_retry(&self.retry, label, FetchError::is_transient, || self.get_json(url)).await
        {
            Ok(value) => Some(value),
            // Already logged by `with_retry`.
            Err(RetryError::Exhausted { .. }) => None,
            Err(RetryError::Aborted(err)) => {
                tracing::error!(error = ?err, "Failed to fetch data for {label}: {err}");
                None
            }
        }
    }
}

#[async_trait]
impl WeatherSource for WeatherApiClient {
    async fn forecast(&self, city: &str) -> Option<Value> {
        let url = match forecast_url(&self.base_url, &self.api_key, city) {
            Ok(url) => url,
            Err(err) => {
                tracing::error!("{err:#}");
                return None;
            }
        };
        self.fetch(&url, &format!("forecast {city}")).await
    }

    async fn history(&self, city: &str, date: NaiveDate) -> Option<Value> {
        let url = match history_url(&self.base_url, &self.api_key, city, date) {
            Ok(url) => url,
            Err(err) => {
                tracing::error!("{err:#}");
                return None;
            }
        };
        self.fetch(&url, &format!("history {city} {date}")).await
    }
}

#[derive(Debug, Deserialize)]
struct WaLocation {
    name: String,
    country: String,
}

#[derive(Debug, Deserialize)]
struct WaDay {
    mintemp_c: f64,
    maxtemp_c: f64,
    avghumidity: f64,
}

#[derive(Debug, Deserialize)]
struct WaForecastDay {
    date: NaiveDate,
    day: WaDay,
}

#[derive(Debug, Deserialize)]
struct WaForecast {
    forecastday: Vec<WaForecastDay>,
}

#[derive(Debug, Deserialize)]
struct WaAirQuality {
    #[serde(default)]
    co: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct WaCurrent {
    #[serde(default)]
    air_quality: Option<WaAirQuality>,
}

/// The parts of a forecast/history response that end up in a city file.
#[derive(Debug, Deserialize)]
pub struct WaPayload {
    location: WaLocation,
    forecast: WaForecast,
    #[serde(default)]
    current: Option<WaCurrent>,
}

impl WaPayload {
    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value).context("Unexpected WeatherAPI payload shape")
    }

    /// Location name as reported by the API.
    pub fn location_name(&self) -> &str {
        &self.location.name
    }

    pub fn into_records(self, kind: RecordType) -> Vec<WeatherRecord> {
        let air_quality = AirQuality::from(
            self.current.and_then(|c| c.air_quality).and_then(|aq| aq.co),
        );
        let WaLocation { name, country } = self.location;

        self.forecast
            .forecastday
            .into_iter()
            .map(|fd| WeatherRecord {
                date: fd.date,
                location: name.clone(),
                country: country.clone(),
                min_temp_c: fd.day.mintemp_c,
                max_temp_c: fd.day.maxtemp_c,
                humidity_pct: fd.day.avghumidity,
                air_quality,
                kind,
            })
            .collect()
    }
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    if body.len() > MAX {
        let mut end = MAX;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &body[..end])
    } else {
        body.to_string()
    }
}
