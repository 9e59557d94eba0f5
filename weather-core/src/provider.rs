use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::Value;
use std::fmt::Debug;

use crate::{Config, provider::weatherapi::WeatherApiClient};

pub mod weatherapi;

/// Source of raw weather payloads.
///
/// `None` means "no data" for that unit: the implementation has already
/// logged why, and the caller should move on to the next city or date.
#[async_trait]
pub trait WeatherSource: Send + Sync + Debug {
    async fn forecast(&self, city: &str) -> Option<Value>;

    async fn history(&self, city: &str, date: NaiveDate) -> Option<Value>;
}

/// Construct the WeatherAPI.com source from config.
pub fn source_from_config(config: &Config) -> anyhow::Result<Box<dyn WeatherSource>> {
    let client = WeatherApiClient::new(
        config.api_key()?,
        &config.http.base_url,
        config.request_timeout(),
        config.retry_policy(),
    )?;

    Ok(Box::new(client))
}
