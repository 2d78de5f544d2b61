//! Configuration for the history subsystem.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{HistoryError, Result};
use crate::retry::RetryConfig;
use crate::types::Season;

/// Tracked seasons, cache location and fetch budget
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_first_season")]
    pub first_season: Season,
    #[serde(default = "default_last_season")]
    pub last_season: Season,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    /// Advisory per-race fetch budget
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
}

fn default_first_season() -> Season {
    2021
}

fn default_last_season() -> Season {
    2025
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("cache/historical")
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            first_season: default_first_season(),
            last_season: default_last_season(),
            cache_dir: default_cache_dir(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
        }
    }
}

impl HistoryConfig {
    /// The historical window, oldest first
    pub fn seasons(&self) -> Vec<Season> {
        (self.first_season..=self.last_season).collect()
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

/// Data provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_fixtures_dir")]
    pub fixtures_dir: PathBuf,
}

fn default_fixtures_dir() -> PathBuf {
    PathBuf::from("data/fixtures")
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            fixtures_dir: default_fixtures_dir(),
        }
    }
}

/// Backoff for calendar and standings fetches
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

fn default_max_retries() -> u32 {
    2
}

fn default_initial_delay_ms() -> u64 {
    250
}

fn default_max_delay_ms() -> u64 {
    5000
}

fn default_multiplier() -> f64 {
    2.0
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
        }
    }
}

impl From<&RetrySettings> for RetryConfig {
    fn from(settings: &RetrySettings) -> Self {
        RetryConfig {
            max_retries: settings.max_retries,
            initial_delay: Duration::from_millis(settings.initial_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            multiplier: settings.multiplier,
        }
    }
}

/// Extra historical spellings for one team
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamAliasConfig {
    pub canonical: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

/// Team names configuration, merged over the built-in alias table
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TeamsConfig {
    #[serde(default)]
    pub aliases: Vec<TeamAliasConfig>,
}

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub teams: TeamsConfig,
}

impl AppConfig {
    /// Load configuration from defaults, an optional file and the environment
    pub fn load(file: Option<&Path>) -> anyhow::Result<Self> {
        let file_source = match file {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name("f1-history").required(false),
        };

        let config = config::Config::builder()
            // Start with defaults
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(file_source)
            // Override with environment variables (F1HIST_HISTORY__LAST_SEASON, etc.)
            .add_source(
                config::Environment::with_prefix("F1HIST")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let app: AppConfig = config.try_deserialize()?;
        app.validate()?;
        Ok(app)
    }

    pub fn validate(&self) -> Result<()> {
        if self.history.first_season > self.history.last_season {
            return Err(HistoryError::Config(format!(
                "first_season {} is after last_season {}",
                self.history.first_season, self.history.last_season
            )));
        }
        if self.history.fetch_timeout_secs == 0 {
            return Err(HistoryError::Config(
                "fetch_timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
