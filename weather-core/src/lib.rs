//! Core library for the `weather-etl` CLI.
//!
//! This crate defines:
//! - Configuration & credentials handling
//! - The WeatherAPI.com source with bounded retry
//! - Per-city append-only CSV storage with (date, type) deduplication
//! - The extractor that runs the forecast and history passes
//!
//! Everything runs sequentially; a failed city or date is logged and skipped.

pub mod config;
pub mod extract;
pub mod logging;
pub mod model;
pub mod provider;
pub mod retry;
pub mod store;

pub use config::Config;
pub use extract::{Extractor, HISTORY_DAYS, RunSummary};
pub use model::{AirQuality, RecordKey, RecordType, WeatherRecord};
pub use provider::{WeatherSource, source_from_config};
pub use retry::{RetryError, RetryPolicy, with_retry};
pub use store::CityStore;
