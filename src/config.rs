//! Configuration loading.
//!
//! Loads from `./armitage.toml` (or `$ARMITAGE_CONFIG_PATH`, or the user
//! config directory). Environment variables override file values; file
//! values override defaults.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Platform gateway settings (`[adapter]`).
    pub adapter: AdapterConfig,
    /// Persistent store settings (`[database]`).
    pub database: DatabaseConfig,
    /// Outbound delivery settings (`[delivery]`).
    pub delivery: DeliveryConfig,
    /// Handler dispatch settings (`[dispatch]`).
    pub dispatch: DispatchConfig,
    /// Process-level settings (`[service]`).
    pub service: ServiceConfig,
}

/// Gateway connection settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    /// Base URL of the gateway bridge.
    pub base_url: String,
    /// Platform API token. Required to start.
    pub token: String,
    /// The bot's own nickname on the platform.
    pub nickname: String,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:3001".to_string(),
            token: String::new(),
            nickname: "armitage".to_string(),
        }
    }
}

/// Persistent store settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite database file location.
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("armitage.db"),
        }
    }
}

/// Outbound delivery settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Global send ceiling across all destinations, in messages per second.
    pub rate_per_sec: f64,
    /// Capacity of each per-destination queue.
    pub queue_capacity: usize,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            rate_per_sec: 1.0,
            queue_capacity: 10,
        }
    }
}

/// Handler dispatch settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Per-handler time budget in seconds.
    pub handler_timeout_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            handler_timeout_secs: 10,
        }
    }
}

/// Process-level settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Hard wall-clock ceiling for graceful shutdown, in seconds.
    pub shutdown_timeout_secs: u64,
    /// Directory for rotated JSON log files. Console-only when unset.
    pub logs_dir: Option<PathBuf>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout_secs: 10,
            logs_dir: None,
        }
    }
}

impl Config {
    /// Load configuration with precedence: env vars > TOML file > defaults.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from_file()?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load from the TOML file only, no env overrides.
    fn load_from_file() -> Result<Self> {
        let path = Self::config_path_with(|key| std::env::var(key).ok());
        match std::fs::read_to_string(&path) {
            Ok(contents) => {
                tracing::info!(path = %path.display(), "loading config from file");
                let config: Config = toml::from_str(&contents)
                    .with_context(|| format!("failed to parse {}", path.display()))?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("no config file found, using defaults");
                Ok(Config::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "failed to read config file {}: {e}",
                path.display()
            )),
        }
    }

    /// Resolve the config file path using a custom env resolver (for
    /// testing).
    fn config_path_with(env: impl Fn(&str) -> Option<String>) -> PathBuf {
        if let Some(p) = env("ARMITAGE_CONFIG_PATH") {
            return PathBuf::from(p);
        }
        let local = PathBuf::from("armitage.toml");
        if local.exists() {
            return local;
        }
        if let Some(dirs) = directories::ProjectDirs::from("", "", "armitage") {
            return dirs.config_dir().join("armitage.toml");
        }
        local
    }

    /// Apply environment variable overrides (env > file > defaults).
    ///
    /// Takes a resolver function for testability.
    fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("ARMITAGE_GATEWAY_URL") {
            self.adapter.base_url = v;
        }
        if let Some(v) = env("ARMITAGE_TOKEN") {
            self.adapter.token = v;
        }
        if let Some(v) = env("ARMITAGE_NICKNAME") {
            self.adapter.nickname = v;
        }
        if let Some(v) = env("ARMITAGE_DB_PATH") {
            self.database.path = PathBuf::from(v);
        }
        if let Some(v) = env("ARMITAGE_RATE_PER_SEC") {
            match v.parse() {
                Ok(n) => self.delivery.rate_per_sec = n,
                Err(_) => tracing::warn!(
                    var = "ARMITAGE_RATE_PER_SEC",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }
        if let Some(v) = env("ARMITAGE_HANDLER_TIMEOUT_SECS") {
            match v.parse() {
                Ok(n) => self.dispatch.handler_timeout_secs = n,
                Err(_) => tracing::warn!(
                    var = "ARMITAGE_HANDLER_TIMEOUT_SECS",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }
        if let Some(v) = env("ARMITAGE_SHUTDOWN_TIMEOUT_SECS") {
            match v.parse() {
                Ok(n) => self.service.shutdown_timeout_secs = n,
                Err(_) => tracing::warn!(
                    var = "ARMITAGE_SHUTDOWN_TIMEOUT_SECS",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }
    }

    /// Validate that the configuration can run a service.
    pub fn validate(&self) -> Result<()> {
        if self.adapter.token.is_empty() {
            anyhow::bail!("adapter token is required (set ARMITAGE_TOKEN or [adapter] token)");
        }
        if self.adapter.base_url.is_empty() {
            anyhow::bail!("adapter base_url must not be empty");
        }
        if self.delivery.rate_per_sec <= 0.0 {
            anyhow::bail!("delivery rate_per_sec must be positive");
        }
        if self.delivery.queue_capacity == 0 {
            anyhow::bail!("delivery queue_capacity must be at least 1");
        }
        Ok(())
    }
}
