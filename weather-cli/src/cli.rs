use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use inquire::{Password, PasswordDisplayMode, Text};
use weather_etl_core::{
    CityStore, Config, Extractor, HISTORY_DAYS, logging, source_from_config,
};

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(name = "weather-etl", version, about = "Collect daily weather per city into CSV files")]
pub struct Cli {
    /// Config file; defaults to the platform config directory.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding the per-city CSV files (overrides the config).
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Log level or filter directive, e.g. "debug" or "weather_etl_core=trace".
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Forecast pass followed by the history pass (default).
    Run {
        /// Treat this date as today (YYYY-MM-DD).
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Forecast pass only.
    Forecast,

    /// History pass only.
    History {
        /// Treat this date as today (YYYY-MM-DD).
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Number of previous days to fetch.
        #[arg(long, default_value_t = HISTORY_DAYS)]
        days: u32,
    },

    /// Interactively set the API key and city list.
    Configure,
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        logging::init(self.log_level.as_deref())?;

        let (mut config, config_path) = match &self.config {
            Some(path) => (Config::load_from(path)?, path.clone()),
            None => (Config::load()?, Config::config_file_path()?),
        };
        if let Some(dir) = &self.data_dir {
            config.storage.data_dir = dir.clone();
        }

        let command = self.command.unwrap_or(Command::Run { date: None });
        let summary = match command {
            Command::Configure => return configure(config, self.config.as_deref()),
            Command::Run { date } => {
                let (mut extractor, cities) = prepare(&config, &config_path)?;
                extractor.run(&cities, date.unwrap_or_else(today)).await
            }
            Command::Forecast => {
                let (mut extractor, cities) = prepare(&config, &config_path)?;
                extractor.forecast_pass(&cities).await
            }
            Command::History { date, days } => {
                let (mut extractor, cities) = prepare(&config, &config_path)?;
                extractor.history_pass(&cities, date.unwrap_or_else(today), days).await
            }
        };

        tracing::info!("Finished: {summary}");
        println!("{summary}");

        Ok(())
    }
}

/// Validate the config and build the extractor over the configured cities.
fn prepare(config: &Config, config_path: &Path) -> Result<(Extractor, Vec<String>)> {
    let cities = config.cities();
    if cities.is_empty() {
        bail!(
            "No cities configured.\n\
             Hint: run `weather-etl configure` or set `cities` under [weather] in {}.",
            config_path.display()
        );
    }

    let store = CityStore::new(&config.storage.data_dir);
    store.ensure_data_dir()?;
    let extractor = Extractor::new(source_from_config(config)?, store);

    tracing::info!(
        "Collecting weather for {} cities into {}",
        cities.len(),
        config.storage.data_dir.display()
    );

    Ok((extractor, cities))
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// Prompt for credentials and cities; saves to `path`, or the default location.
fn configure(mut config: Config, path: Option<&Path>) -> Result<()> {
    let api_key = Password::new("WeatherAPI.com API key:")
        .with_display_mode(PasswordDisplayMode::Masked)
        .without_confirmation()
        .prompt()
        .context("Failed to read API key")?;
    if !api_key.trim().is_empty() {
        config.set_api_key(api_key.trim().to_string());
    }

    let current = config.weather.cities.clone();
    let cities = Text::new("Cities (comma-separated):")
        .with_default(&current)
        .prompt()
        .context("Failed to read city list")?;
    config.set_cities(cities.split(','));

    let saved_to = match path {
        Some(path) => {
            config.save_to(path)?;
            path.to_path_buf()
        }
        None => config.save()?,
    };
    println!("Configuration saved to {}", saved_to.display());

    Ok(())
}
