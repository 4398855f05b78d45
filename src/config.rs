use crate::accrual::ClientConfig;
use crate::reconcile::ReconcilerConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;
use thiserror::Error;

/// Overrides `database.url`
pub const DATABASE_URI_ENV: &str = "DATABASE_URI";
/// Overrides `accrual.base_address`
pub const ACCRUAL_ADDRESS_ENV: &str = "ACCRUAL_SYSTEM_ADDRESS";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config yaml: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub database: DatabaseConfig,
    pub accrual: AccrualConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub dir: String,
    pub file: String,
    #[serde(default)]
    pub use_json: bool,
    /// `hourly`, `daily` or `never`
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_rotation() -> String {
    "daily".to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
    /// Upper bound on any single ledger operation, transaction included
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,
}

fn default_max_connections() -> u32 {
    10
}

fn default_acquire_timeout_ms() -> u64 {
    3000
}

fn default_operation_timeout_ms() -> u64 {
    5000
}

impl DatabaseConfig {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

/// External accrual authority and reconciliation loop settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AccrualConfig {
    #[serde(default)]
    pub base_address: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Backoff used when a 429 carries no usable `Retry-After`
    #[serde(default = "default_retry_after_ms")]
    pub default_retry_after_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_max_in_flight() -> usize {
    10
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_after_ms() -> u64 {
    1000
}

fn default_request_timeout_ms() -> u64 {
    5000
}

impl AccrualConfig {
    pub fn reconciler_config(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            max_in_flight: self.max_in_flight,
        }
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            base_address: self.base_address.clone(),
            max_attempts: self.max_attempts,
            default_retry_after: Duration::from_millis(self.default_retry_after_ms),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
        }
    }
}

impl AppConfig {
    /// Load `config/{env}.yaml` and apply environment overrides.
    pub fn load(env: &str) -> Result<Self, ConfigError> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path).map_err(|source| ConfigError::Read {
            path: config_path.clone(),
            source,
        })?;
        let mut config = Self::from_yaml(&content)?;
        config.apply_overrides(
            std::env::var(DATABASE_URI_ENV).ok(),
            std::env::var(ACCRUAL_ADDRESS_ENV).ok(),
        );
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Replace the database URL and authority address when a value is given.
    /// Empty strings are ignored.
    pub fn apply_overrides(&mut self, database_url: Option<String>, accrual_address: Option<String>) {
        if let Some(url) = database_url.filter(|s| !s.is_empty()) {
            self.database.url = url;
        }
        if let Some(address) = accrual_address.filter(|s| !s.is_empty()) {
            self.accrual.base_address = address;
        }
    }

    /// Checks that need the final, overridden values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.url.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "database.url is empty (set it or {})",
                DATABASE_URI_ENV
            )));
        }
        if self.accrual.base_address.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "accrual.base_address is empty (set it or {})",
                ACCRUAL_ADDRESS_ENV
            )));
        }
        if self.accrual.max_in_flight == 0 {
            return Err(ConfigError::Invalid("accrual.max_in_flight must be > 0".into()));
        }
        if self.accrual.max_attempts == 0 {
            return Err(ConfigError::Invalid("accrual.max_attempts must be > 0".into()));
        }
        if self.accrual.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "accrual.poll_interval_ms must be > 0".into(),
            ));
        }
        Ok(())
    }
}
