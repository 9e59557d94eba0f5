//! Fetch → extract → deduplicated append, one unit of work at a time.
//!
//! A unit is a single (city, date, record type). Failures are logged and
//! contained per unit; the passes always run to completion.

use anyhow::Result;
use chrono::{Days, NaiveDate};
use serde_json::Value;
use std::{fmt, ops::AddAssign};
use tracing::Instrument;

use crate::{
    model::RecordType,
    provider::{WeatherSource, weatherapi::WaPayload},
    store::{CityStore, WriteOutcome},
};

/// Number of past days covered by the history pass.
pub const HISTORY_DAYS: u32 = 3;

/// Rows produced by one successful extraction.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UnitReport {
    pub written: usize,
    pub skipped: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub units: usize,
    pub fetch_failures: usize,
    pub extract_failures: usize,
    pub rows_written: usize,
    pub duplicates_skipped: usize,
}

impl AddAssign for RunSummary {
    fn add_assign(&mut self, rhs: Self) {
        self.units += rhs.units;
        self.fetch_failures += rhs.fetch_failures;
        self.extract_failures += rhs.extract_failures;
        self.rows_written += rhs.rows_written;
        self.duplicates_skipped += rhs.duplicates_skipped;
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} units: {} rows written, {} duplicates skipped, \
             {} fetch failures, {} extract failures",
            self.units,
            self.rows_written,
            self.duplicates_skipped,
            self.fetch_failures,
            self.extract_failures,
        )
    }
}

/// The last `days` calendar days before `today`, most recent first.
pub fn history_dates(today: NaiveDate, days: u32) -> Vec<NaiveDate> {
    (1..=u64::from(days)).filter_map(|i| today.checked_sub_days(Days::new(i))).collect()
}

#[derive(Debug)]
pub struct Extractor {
    source: Box<dyn WeatherSource>,
    store: CityStore,
}

impl Extractor {
    pub fn new(source: Box<dyn WeatherSource>, store: CityStore) -> Self {
        Self { source, store }
    }

    pub fn store(&self) -> &CityStore {
        &self.store
    }

    /// Write every day in `payload` as a `kind` record, skipping keys already on file.
    ///
    /// Rows appended before an error stay appended.
    pub fn extract_and_write(&mut self, payload: Value, kind: RecordType) -> Result<UnitReport> {
        let payload = WaPayload::from_value(payload)?;
        let city = payload.location_name().to_string();
        self.store.ensure_city_file(&city)?;

        let mut report = UnitReport::default();
        for record in payload.into_records(kind) {
            match self.store.write(&record)? {
                WriteOutcome::Appended => report.written += 1,
                WriteOutcome::Duplicate => report.skipped += 1,
            }
        }
        Ok(report)
    }

    fn consume(&mut self, payload: Option<Value>, kind: RecordType) -> RunSummary {
        let mut summary = RunSummary { units: 1, ..Default::default() };

        let Some(payload) = payload else {
            tracing::warn!("No data received, skipping");
            summary.fetch_failures = 1;
            return summary;
        };

        match self.extract_and_write(payload, kind) {
            Ok(report) => {
                summary.rows_written = report.written;
                summary.duplicates_skipped = report.skipped;
            }
            Err(err) => {
                tracing::error!(error = ?err, "Error extracting/writing {kind} data: {err:#}");
                summary.extract_failures = 1;
            }
        }
        summary
    }

    /// One forecast fetch and extraction per city.
    pub async fn forecast_pass(&mut self, cities: &[String]) -> RunSummary {
        let mut summary = RunSummary::default();

        for city in cities {
            let span = tracing::info_span!("forecast", %city);
            tracing::info!(parent: &span, "Fetching forecast for {city}");

            let payload = self.source.forecast(city).instrument(span.clone()).await;
            summary += span.in_scope(|| self.consume(payload, RecordType::Forecast));
        }

        summary
    }

    /// One history fetch and extraction per city for each of the `days` days before `today`.
    pub async fn history_pass(
        &mut self,
        cities: &[String],
        today: NaiveDate,
        days: u32,
    ) -> RunSummary {
        let mut summary = RunSummary::default();

        for date in history_dates(today, days) {
            for city in cities {
                let span = tracing::info_span!("history", %city, %date);
                tracing::info!(parent: &span, "Fetching history for {city} on {date}");

                let payload = self.source.history(city, date).instrument(span.clone()).await;
                summary += span.in_scope(|| self.consume(payload, RecordType::History));
            }
        }

        summary
    }

    /// Forecast pass followed by the default history pass.
    pub async fn run(&mut self, cities: &[String], today: NaiveDate) -> RunSummary {
        let mut summary = self.forecast_pass(cities).await;
        summary += self.history_pass(cities, today, HISTORY_DAYS).await;
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::{
        fs,
        sync::{Arc, Mutex},
    };

    fn payload(city: &str, dates: &[&str]) -> Value {
        let days: Vec<Value> = dates
            .iter()
            .map(|d| {
                json!({
                    "date": d,
                    "day": { "mintemp_c": 1.5, "maxtemp_c": 9.0, "avghumidity": 80 }
                })
            })
            .collect();
        json!({
            "location": { "name": city, "country": "Testland" },
            "forecast": { "forecastday": days }
        })
    }

    /// Serves canned payloads; cities listed in `failing` get no data.
    #[derive(Debug, Default)]
    struct FakeSource {
        failing: Vec<String>,
        calls: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl WeatherSource for FakeSource {
        async fn forecast(&self, city: &str) -> Option<Value> {
            self.calls.lock().unwrap().push(format!("forecast {city}"));
            if self.failing.iter().any(|c| c == city) {
                return None;
            }
            Some(payload(city, &["2024-05-10", "2024-05-11", "2024-05-12"]))
        }

        async fn history(&self, city: &str, date: NaiveDate) -> Option<Value> {
            self.calls.lock().unwrap().push(format!("history {city} {date}"));
            if self.failing.iter().any(|c| c == city) {
                return None;
            }
            Some(payload(city, &[date.to_string().as_str()]))
        }
    }

    fn cities(names: &[&str]) -> Vec<String> {
        names.iter().map(|c| c.to_string()).collect()
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 10).unwrap()
    }

    #[test]
    fn history_dates_are_previous_days() {
        let dates = history_dates(today(), 3);
        let expected: Vec<NaiveDate> = ["2024-05-09", "2024-05-08", "2024-05-07"]
            .iter()
            .map(|d| d.parse().unwrap())
            .collect();
        assert_eq!(dates, expected);
    }

    #[test]
    fn summaries_add_up() {
        let mut a = RunSummary { units: 1, rows_written: 3, ..Default::default() };
        a += RunSummary {
            units: 2,
            fetch_failures: 1,
            duplicates_skipped: 2,
            ..Default::default()
        };

        assert_eq!(a.units, 3);
        assert_eq!(a.rows_written, 3);
        assert_eq!(a.fetch_failures, 1);
        assert_eq!(a.duplicates_skipped, 2);
    }

    #[tokio::test]
    async fn run_visits_forecast_then_each_history_day() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let source = FakeSource { calls: calls.clone(), ..Default::default() };
        let mut extractor = Extractor::new(Box::new(source), CityStore::new(dir.path()));

        let summary = extractor.run(&cities(&["Oslo", "Lima"]), today()).await;

        assert_eq!(
            *calls.lock().unwrap(),
            vec![
                "forecast Oslo",
                "forecast Lima",
                "history Oslo 2024-05-09",
                "history Lima 2024-05-09",
                "history Oslo 2024-05-08",
                "history Lima 2024-05-08",
                "history Oslo 2024-05-07",
                "history Lima 2024-05-07",
            ]
        );
        assert_eq!(summary.units, 8);
        assert_eq!(summary.rows_written, 12);
    }

    #[tokio::test]
    async fn second_run_adds_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let targets = cities(&["Oslo"]);

        let mut first = Extractor::new(Box::<FakeSource>::default(), CityStore::new(dir.path()));
        first.run(&targets, today()).await;
        let path = first.store().city_file_path("Oslo");
        let before = fs::read(&path).unwrap();

        let mut second = Extractor::new(Box::<FakeSource>::default(), CityStore::new(dir.path()));
        let summary = second.run(&targets, today()).await;

        assert_eq!(summary.rows_written, 0);
        assert_eq!(summary.duplicates_skipped, 6);
        assert_eq!(fs::read(&path).unwrap(), before);
    }

    #[tokio::test]
    async fn failed_city_does_not_stop_the_pass() {
        let dir = tempfile::tempdir().unwrap();
        let source = FakeSource { failing: vec!["Atlantis".into()], ..Default::default() };
        let mut extractor = Extractor::new(Box::new(source), CityStore::new(dir.path()));

        let summary = extractor.forecast_pass(&cities(&["Atlantis", "Oslo"])).await;

        assert_eq!(summary.fetch_failures, 1);
        assert_eq!(summary.rows_written, 3);
        assert!(!extractor.store().city_file_path("Atlantis").exists());
    }

    #[test]
    fn malformed_payload_is_an_error_and_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut extractor =
            Extractor::new(Box::<FakeSource>::default(), CityStore::new(dir.path()));

        let body = json!({ "error": { "message": "No matching location" } });
        let err = extractor.extract_and_write(body, RecordType::Forecast).unwrap_err();

        assert!(err.to_string().contains("Unexpected WeatherAPI payload shape"));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn malformed_payload_is_counted_not_propagated() {
        let dir = tempfile::tempdir().unwrap();
        let mut extractor =
            Extractor::new(Box::<FakeSource>::default(), CityStore::new(dir.path()));

        let summary = extractor.consume(Some(json!({ "location": {} })), RecordType::History);
        assert_eq!(summary.extract_failures, 1);
        assert_eq!(summary.rows_written, 0);
    }
}
