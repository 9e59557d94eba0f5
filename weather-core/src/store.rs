//! Per-city CSV files and the in-memory ledger of keys already written.
//!
//! Files are only ever created or appended to. The ledger for a city is
//! hydrated from its file the first time that city is written during a run.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::{
    collections::{HashMap, HashSet},
    fs::{self, File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use crate::model::{RecordKey, RecordType, WeatherRecord};

/// Column order of every city file.
pub const HEADER: [&str; 8] =
    ["Date", "Location", "Country", "Min_Temp", "Max_Temp", "Humidity", "Air_Quality", "Type"];

/// Result of offering one record to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Appended,
    Duplicate,
}

#[derive(Debug)]
pub struct CityStore {
    data_dir: PathBuf,
    ledgers: HashMap<String, HashSet<RecordKey>>,
}

impl CityStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self { data_dir: data_dir.into(), ledgers: HashMap::new() }
    }

    /// Create the data directory if it does not exist yet.
    pub fn ensure_data_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.data_dir).with_context(|| {
            format!("Failed to create data directory: {}", self.data_dir.display())
        })
    }

    /// `<data_dir>/<city with spaces as underscores>.csv`
    pub fn city_file_path(&self, city: &str) -> PathBuf {
        self.data_dir.join(format!("{}.csv", file_stem(city)))
    }

    /// Make sure the city's file exists and starts with the header row.
    pub fn ensure_city_file(&self, city: &str) -> Result<PathBuf> {
        let path = self.city_file_path(city);

        let is_empty = match fs::metadata(&path) {
            Ok(meta) => meta.len() == 0,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to inspect city file: {}", path.display()));
            }
        };

        if is_empty {
            let mut writer = csv::Writer::from_path(&path)
                .with_context(|| format!("Failed to create city file: {}", path.display()))?;
            writer.write_record(HEADER)?;
            writer.flush()?;
            tracing::info!("CSV header written for {city}");
        }

        Ok(path)
    }

    /// Append `record` to its city's file unless its (date, type) key is already there.
    pub fn write(&mut self, record: &WeatherRecord) -> Result<WriteOutcome> {
        let city = record.location.as_str();
        let path = self.ensure_city_file(city)?;

        let stem = file_stem(city);
        if !self.ledgers.contains_key(&stem) {
            let keys = read_keys(&path)?;
            tracing::debug!("Loaded {} existing keys for {city}", keys.len());
            self.ledgers.insert(stem.clone(), keys);
        }
        let ledger = self.ledgers.entry(stem).or_default();

        let key = record.key();
        if ledger.contains(&key) {
            tracing::info!("Skipped duplicate for {city} on {} ({})", record.date, record.kind);
            return Ok(WriteOutcome::Duplicate);
        }

        append_row(&path, record)?;
        ledger.insert(key);
        tracing::info!("[{}] Wrote {city} on {}", record.kind, record.date);

        Ok(WriteOutcome::Appended)
    }
}

fn file_stem(city: &str) -> String {
    city.replace(' ', "_")
}

/// Every (date, type) pair already present in `path`. Rows with a blank,
/// missing or unparseable key are ignored, so a torn trailing row never
/// blocks further writes.
pub fn read_keys(path: &Path) -> Result<HashSet<RecordKey>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to open city file: {}", path.display()))?;

    let headers = reader
        .headers()
        .with_context(|| format!("Failed to read header of {}", path.display()))?;
    let column = |name: &str| headers.iter().position(|h| h.trim() == name);
    let (Some(date_col), Some(type_col)) = (column("Date"), column("Type")) else {
        tracing::warn!("{} has no Date/Type columns, treating it as empty", path.display());
        return Ok(HashSet::new());
    };

    let mut keys = HashSet::new();
    for (idx, row) in reader.records().enumerate() {
        let line = idx + 2;
        let row = match row {
            Ok(row) => row,
            Err(e) if e.is_io_error() => {
                return Err(e)
                    .with_context(|| format!("Failed to read line {line} of {}", path.display()));
            }
            Err(e) => {
                tracing::warn!("Ignoring unreadable line {line} of {}: {e}", path.display());
                continue;
            }
        };

        let date = row.get(date_col).unwrap_or_default().trim();
        let kind = row.get(type_col).unwrap_or_default().trim();
        if date.is_empty() || kind.is_empty() {
            continue;
        }

        match (date.parse::<NaiveDate>(), kind.parse::<RecordType>()) {
            (Ok(date), Ok(kind)) => {
                keys.insert(RecordKey { date, kind });
            }
            _ => tracing::warn!(
                "Ignoring line {line} of {} with unrecognized key ({date}, {kind})",
                path.display()
            ),
        }
    }

    Ok(keys)
}

fn append_row(path: &Path, record: &WeatherRecord) -> Result<()> {
    let mut file = OpenOptions::new()
        .read(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open city file for append: {}", path.display()))?;

    // A torn last row must not swallow the next one.
    if !ends_with_newline(&mut file)? {
        file.write_all(b"\n")
            .with_context(|| format!("Failed to terminate last row of {}", path.display()))?;
    }

    let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
    writer
        .serialize(record)
        .with_context(|| format!("Failed to append row to {}", path.display()))?;
    writer.flush()?;

    Ok(())
}

fn ends_with_newline(file: &mut File) -> Result<bool> {
    if file.metadata()?.len() == 0 {
        return Ok(true);
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1))?;
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}
