use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rewind_core::namespace::TRANSACTION_TABLE;
use rewind_core::Namespace;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse rollback config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid rollback config: {0}")]
    Invalid(String),
}

/// Tunables for rollback, loaded from TOML.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RollbackConfig {
    /// Pause after a rollback attempt that must be retried.
    pub retry_delay_secs: u64,
    /// Re-read the sync source's rollback id every this many refetched
    /// documents.
    pub epoch_check_interval: u64,
    /// Namespace of the session transaction table.
    pub transaction_table: String,
}

impl Default for RollbackConfig {
    fn default() -> Self {
        Self {
            retry_delay_secs: 5,
            epoch_check_interval: 100,
            transaction_table: TRANSACTION_TABLE.to_string(),
        }
    }
}

impl RollbackConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads the config at `path`, falling back to defaults when the file
    /// does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "rollback config file not found, using defaults");
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&contents)?;
        tracing::debug!(
            path = %path.display(),
            retry_delay_secs = config.retry_delay_secs,
            epoch_check_interval = config.epoch_check_interval,
            "loaded rollback config"
        );
        Ok(config)
    }

    /// Checks a config built in code; `load` and `from_toml_str` already
    /// call this.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.epoch_check_interval == 0 {
            return Err(ConfigError::Invalid(
                "epoch_check_interval must be positive".to_string(),
            ));
        }
        self.transaction_table_ns()?;
        Ok(())
    }

    pub fn transaction_table_ns(&self) -> Result<Namespace, ConfigError> {
        Namespace::parse(&self.transaction_table)
            .map_err(|e| ConfigError::Invalid(format!("transaction_table: {e}")))
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}
