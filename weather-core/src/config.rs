use anyhow::{Context, Result, anyhow};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::retry::{DEFAULT_INITIAL_DELAY_SECS, DEFAULT_MAX_ATTEMPTS, RetryPolicy};

pub const DEFAULT_BASE_URL: &str = "http://api.weatherapi.com/v1/";
pub const DEFAULT_DATA_DIR: &str = "weather_data";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Environment variable that overrides the configured API key.
pub const API_KEY_ENV: &str = "WEATHER_API_KEY";

/// Credentials and the list of cities to collect.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WeatherConfig {
    #[serde(default)]
    pub api_key: Option<String>,

    /// Comma-separated, e.g. "London, New York".
    #[serde(default)]
    pub cities: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { data_dir: PathBuf::from(DEFAULT_DATA_DIR) }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { base_url: DEFAULT_BASE_URL.to_string(), timeout_secs: DEFAULT_TIMEOUT_SECS }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_secs: u64,
    pub backoff: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay_secs: DEFAULT_INITIAL_DELAY_SECS,
            backoff: true,
        }
    }
}

/// Top-level configuration stored on disk.
///
/// Example TOML:
/// [weather]
/// api_key = "..."
/// cities = "London, Paris"
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub weather: WeatherConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Config {
    /// Load config from the default location, or return an empty default if it doesn't exist yet.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_file_path()?)
    }

    /// Load config from `path`; a missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Save config to the default location and return where it was written.
    pub fn save(&self) -> Result<PathBuf> {
        let path = Self::config_file_path()?;
        self.save_to(&path)?;
        Ok(path)
    }

    /// Save config to `path`, creating parent directories as needed.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let toml =
            toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")?;

        fs::write(path, toml)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Path to the config file.
    pub fn config_file_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("dev", "weather-etl", "weather-etl")
            .ok_or_else(|| anyhow!("Could not determine platform config directory"))?;

        Ok(dirs.config_dir().join("config.toml"))
    }

    /// API key from the environment, falling back to the config file.
    pub fn api_key(&self) -> Result<String> {
        let from_env = std::env::var(API_KEY_ENV).ok();
        Self::resolve_api_key(from_env, self.weather.api_key.as_deref())
    }

    fn resolve_api_key(from_env: Option<String>, from_file: Option<&str>) -> Result<String> {
        from_env
            .filter(|k| !k.trim().is_empty())
            .or_else(|| from_file.map(str::trim).filter(|k| !k.is_empty()).map(str::to_owned))
            .ok_or_else(|| {
                anyhow!(
                    "No API key configured.\n\
                     Hint: run `weather-etl configure` or set {API_KEY_ENV}."
                )
            })
    }

    pub fn set_api_key(&mut self, api_key: String) {
        self.weather.api_key = Some(api_key);
    }

    /// Configured cities, trimmed, empty entries dropped.
    pub fn cities(&self) -> Vec<String> {
        self.weather
            .cities
            .split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_owned)
            .collect()
    }

    pub fn set_cities<I, S>(&mut self, cities: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let joined: Vec<String> = cities
            .into_iter()
            .map(|c| c.as_ref().trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();
        self.weather.cities = joined.join(", ");
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.max_attempts,
            Duration::from_secs(self.retry.initial_delay_secs),
            self.retry.backoff,
        )
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.http.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cities_are_split_and_trimmed() {
        let mut cfg = Config::default();
        cfg.weather.cities = " London, New York ,, Paris ".into();

        assert_eq!(cfg.cities(), vec!["London", "New York", "Paris"]);
    }

    #[test]
    fn set_cities_joins_with_commas() {
        let mut cfg = Config::default();
        cfg.set_cities(["Berlin", " ", "Rio de Janeiro "]);

        assert_eq!(cfg.weather.cities, "Berlin, Rio de Janeiro");
        assert_eq!(cfg.cities(), vec!["Berlin", "Rio de Janeiro"]);
    }

    #[test]
    fn api_key_errors_when_not_set() {
        let err = Config::resolve_api_key(None, None).unwrap_err();
        assert!(err.to_string().contains("No API key configured"));

        let err = Config::resolve_api_key(None, Some("  ")).unwrap_err();
        assert!(err.to_string().contains("Hint: run `weather-etl configure`"));
    }

    #[test]
    fn env_api_key_overrides_file() {
        let key = Config::resolve_api_key(Some("ENV_KEY".into()), Some("FILE_KEY")).unwrap();
        assert_eq!(key, "ENV_KEY");

        let key = Config::resolve_api_key(None, Some("FILE_KEY")).unwrap();
        assert_eq!(key, "FILE_KEY");
    }

    #[test]
    fn sections_fall_back_to_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            [weather]
            api_key = "KEY"
            cities = "London"
            "#,
        )
        .expect("minimal config must parse");

        assert_eq!(cfg.storage.data_dir, PathBuf::from(DEFAULT_DATA_DIR));
        assert_eq!(cfg.http.base_url, DEFAULT_BASE_URL);
        assert_eq!(cfg.retry_policy(), RetryPolicy::default());
        assert_eq!(cfg.request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn retry_section_without_backoff() {
        let cfg: Config = toml::from_str(
            r#"
            [retry]
            max_attempts = 5
            initial_delay_secs = 1
            backoff = false
            "#,
        )
        .expect("retry config must parse");

        let policy = cfg.retry_policy();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.multiplier, 1);
    }

    #[test]
    fn save_then_load_preserves_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut cfg = Config::default();
        cfg.set_api_key("KEY".into());
        cfg.set_cities(["Oslo", "Lima"]);
        cfg.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.weather.api_key.as_deref(), Some("KEY"));
        assert_eq!(loaded.cities(), vec!["Oslo", "Lima"]);
    }

    #[test]
    fn default_location_is_config_toml() {
        let path = Config::config_file_path().expect("platform config dir");
        assert_eq!(path.file_name().and_then(|n| n.to_str()), Some("config.toml"));
        assert!(path.to_string_lossy().contains("weather-etl"));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::load_from(&dir.path().join("absent.toml")).unwrap();
        assert!(cfg.cities().is_empty());
        assert!(cfg.weather.api_key.is_none());
    }
}
