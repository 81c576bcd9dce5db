use anyhow::{Context, Result, anyhow, ensure};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{model::City, runner::FailurePolicy};

pub const API_KEY_ENV: &str = "WEATHERSTACK_API_KEY";
pub const DB_HOST_ENV: &str = "WEATHER_INGEST_DB_HOST";
pub const DB_PORT_ENV: &str = "WEATHER_INGEST_DB_PORT";
pub const DB_NAME_ENV: &str = "WEATHER_INGEST_DB_NAME";
pub const DB_USER_ENV: &str = "WEATHER_INGEST_DB_USER";
pub const DB_PASSWORD_ENV: &str = "WEATHER_INGEST_DB_PASSWORD";

/// weatherstack access.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub api_key: String,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.weatherstack.com".to_string(),
            timeout_secs: 30,
        }
    }
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// PostgreSQL connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: String,
    pub connect_timeout_secs: u64,
    /// Server-side `statement_timeout` applied to the session.
    pub statement_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "dw".to_string(),
            user: "postgres".to_string(),
            password: String::new(),
            connect_timeout_secs: 10,
            statement_timeout_secs: 30,
        }
    }
}

impl DatabaseConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// `host:port/dbname`, safe to log.
    pub fn target(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.dbname)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    /// Fixed delay between consecutive cities.
    pub interval_secs: u64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self { interval_secs: 10 }
    }
}

impl PacingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Top-level configuration stored on disk.
///
/// Example TOML:
/// ```toml
/// cities = ["London", "Tokyo"]
/// failure_policy = "fail-fast"
///
/// [api]
/// api_key = "..."
///
/// [database]
/// host = "localhost"
/// port = 5432
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Processed in this order, one at a time.
    pub cities: Vec<City>,
    pub failure_policy: FailurePolicy,
    pub api: ApiConfig,
    pub database: DatabaseConfig,
    pub pacing: PacingConfig,
}

impl Default for Config {
    fn default() -> Self {
        let cities = [
            "London",
            "Singapore",
            "Shanghai",
            "New York",
            "Tokyo",
            "Berlin",
            "Hanoi",
            "Ho Chi Minh City",
            "Paris",
            "Moscow",
        ]
        .into_iter()
        .filter_map(|name| City::new(name).ok())
        .collect();

        Self {
            cities,
            failure_policy: FailurePolicy::default(),
            api: ApiConfig::default(),
            database: DatabaseConfig::default(),
            pacing: PacingConfig::default(),
        }
    }
}

impl Config {
    /// Load config from the platform config directory, or defaults if it doesn't exist yet.
    pub fn load() -> Result<Self> {
        let path = Self::config_file_path()?;
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn save(&self) -> Result<PathBuf> {
        let path = Self::config_file_path()?;
        self.save_to(&path)?;
        Ok(path)
    }

    /// Save config to `path`, creating parent directories as needed.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
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

    pub fn config_file_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("dev", "weather-ingest", "weather-ingest")
            .ok_or_else(|| anyhow!("Could not determine platform config directory"))?;

        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Override secrets and connection settings from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Override settings from `lookup`, which maps variable names to values.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup(API_KEY_ENV) {
            self.api.api_key = key;
        }
        if let Some(host) = lookup(DB_HOST_ENV) {
            self.database.host = host;
        }
        if let Some(port) = lookup(DB_PORT_ENV) {
            self.database.port = port
                .parse()
                .with_context(|| format!("{DB_PORT_ENV} is not a valid port: '{port}'"))?;
        }
        if let Some(dbname) = lookup(DB_NAME_ENV) {
            self.database.dbname = dbname;
        }
        if let Some(user) = lookup(DB_USER_ENV) {
            self.database.user = user;
        }
        if let Some(password) = lookup(DB_PASSWORD_ENV) {
            self.database.password = password;
        }
        Ok(())
    }

    /// Check that the configuration can drive a run.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            !self.api.api_key.trim().is_empty(),
            "No weatherstack API key configured.\n\
             Hint: set {API_KEY_ENV} or run `weather-ingest configure`."
        );
        ensure!(!self.cities.is_empty(), "City list is empty; nothing to ingest.");
        ensure!(self.database.port != 0, "Database port must be non-zero.");
        ensure!(!self.database.host.trim().is_empty(), "Database host must not be empty.");
        Ok(())
    }
}
