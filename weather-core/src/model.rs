use std::{fmt, str::FromStr};

use chrono::NaiveDate;
use serde::{Serialize, Serializer};

/// Which endpoint a record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecordType {
    Forecast,
    History,
}

impl RecordType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::Forecast => "FORECAST",
            RecordType::History => "HISTORY",
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordType {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_uppercase().as_str() {
            "FORECAST" => Ok(RecordType::Forecast),
            "HISTORY" => Ok(RecordType::History),
            _ => Err(anyhow::anyhow!(
                "Unknown record type '{value}'. Expected FORECAST or HISTORY."
            )),
        }
    }
}

/// Carbon monoxide reading, or the `N/A` sentinel when the payload has none.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AirQuality {
    Value(f64),
    NotAvailable,
}

impl AirQuality {
    pub const SENTINEL: &'static str = "N/A";
}

impl From<Option<f64>> for AirQuality {
    fn from(value: Option<f64>) -> Self {
        value.map_or(AirQuality::NotAvailable, AirQuality::Value)
    }
}

impl Serialize for AirQuality {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            AirQuality::Value(v) => serializer.serialize_f64(*v),
            AirQuality::NotAvailable => serializer.serialize_str(Self::SENTINEL),
        }
    }
}

/// Identity of a row inside a city file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordKey {
    pub date: NaiveDate,
    pub kind: RecordType,
}

/// One normalized day of weather, as stored in a city file.
///
/// Field order and renames define the CSV column layout.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeatherRecord {
    #[serde(rename = "Date")]
    pub date: NaiveDate,
    #[serde(rename = "Location")]
    pub location: String,
    #[serde(rename = "Country")]
    pub country: String,
    #[serde(rename = "Min_Temp")]
    pub min_temp_c: f64,
    #[serde(rename = "Max_Temp")]
    pub max_temp_c: f64,
    #[serde(rename = "Humidity")]
    pub humidity_pct: f64,
    #[serde(rename = "Air_Quality")]
    pub air_quality: AirQuality,
    #[serde(rename = "Type")]
    pub kind: RecordType,
}

impl WeatherRecord {
    pub fn key(&self) -> RecordKey {
        RecordKey { date: self.date, kind: self.kind }
    }
}
