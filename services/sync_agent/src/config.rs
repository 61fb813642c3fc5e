//! services/sync_agent/src/config.rs
//!
//! Defines the agent's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub local_db_url: String,
    pub api_base_url: String,
    pub api_token: Option<String>,
    pub user_id: String,
    pub log_level: Level,
    pub sync: SyncSettings,
    pub request_timeout: Duration,
    /// `None` disables the background connectivity probe.
    pub probe_interval: Option<Duration>,
}

/// Knobs of the sync engine itself.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncSettings {
    pub auto_sync_interval: Duration,
    pub max_retries: u32,
    /// How long a finished pass keeps its success/error status before settling to idle.
    pub status_cooldown: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            auto_sync_interval: Duration::from_secs(30),
            max_retries: 3,
            status_cooldown: Duration::from_secs(5),
        }
    }
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // --- Server and Storage Settings ---
        let bind_address = parse_var(&lookup, "BIND_ADDRESS", "127.0.0.1:4010")?;
        let local_db_url = lookup("LOCAL_DB_URL")
            .unwrap_or_else(|| "sqlite://lesson_sync.db".to_string());

        // --- Remote API and Auth Boundary ---
        let api_base_url = lookup("API_BASE_URL")
            .ok_or_else(|| ConfigError::MissingVar("API_BASE_URL".to_string()))?
            .trim_end_matches('/')
            .to_string();
        let api_token = lookup("API_TOKEN").filter(|t| !t.is_empty());
        let user_id = lookup("SYNC_USER_ID")
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingVar("SYNC_USER_ID".to_string()))?;

        let log_level_str = lookup("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- Sync Engine Settings ---
        let auto_sync_secs: u64 = parse_var(&lookup, "AUTO_SYNC_INTERVAL_SECS", "30")?;
        if auto_sync_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "AUTO_SYNC_INTERVAL_SECS".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        let max_retries: u32 = parse_var(&lookup, "MAX_RETRIES", "3")?;
        if max_retries == 0 {
            return Err(ConfigError::InvalidValue(
                "MAX_RETRIES".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        let cooldown_secs: u64 = parse_var(&lookup, "STATUS_COOLDOWN_SECS", "5")?;
        let timeout_secs: u64 = parse_var(&lookup, "REQUEST_TIMEOUT_SECS", "15")?;
        let probe_secs: u64 = parse_var(&lookup, "CONNECTIVITY_PROBE_SECS", "10")?;

        Ok(Self {
            bind_address,
            local_db_url,
            api_base_url,
            api_token,
            user_id,
            log_level,
            sync: SyncSettings {
                auto_sync_interval: Duration::from_secs(auto_sync_secs),
                max_retries,
                status_cooldown: Duration::from_secs(cooldown_secs),
            },
            request_timeout: Duration::from_secs(timeout_secs),
            probe_interval: (probe_secs > 0).then(|| Duration::from_secs(probe_secs)),
        })
    }
}

fn parse_var<F, T>(lookup: &F, key: &str, default: &str) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = lookup(key).unwrap_or_else(|| default.to_string());
    raw.parse::<T>()
        .map_err(|e| ConfigError::InvalidValue(key.to_string(), e.to_string()))
}
