// ABOUTME: Migration job configuration loaded from TOML or defaults
// ABOUTME: Holds batch size and progress flush interval with validation

use crate::error::MigrationError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::num::NonZeroU64;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_BATCH_SIZE: u64 = 1000;
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 400;

/// Settings for a migration job
///
/// `batchsize` is the fixed page size used for every table. It has no upper
/// bound; zero is rejected when the value is parsed.
///
/// # Examples
///
/// ```
/// # use seren_table_migrator::config::MigrationConfig;
/// let config: MigrationConfig = toml::from_str("batchsize = 250").unwrap();
/// assert_eq!(config.batchsize.get(), 250);
/// assert_eq!(config.flush_interval_ms, 400);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MigrationConfig {
    #[serde(default = "default_batch_size")]
    pub batchsize: NonZeroU64,
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
}

fn default_batch_size() -> NonZeroU64 {
    NonZeroU64::new(DEFAULT_BATCH_SIZE).unwrap_or(NonZeroU64::MIN)
}

fn default_flush_interval_ms() -> u64 {
    DEFAULT_FLUSH_INTERVAL_MS
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            batchsize: default_batch_size(),
            flush_interval_ms: default_flush_interval_ms(),
        }
    }
}

impl MigrationConfig {
    /// Override the batch size, rejecting zero
    pub fn with_batch_size(mut self, batchsize: u64) -> crate::error::Result<Self> {
        self.batchsize = NonZeroU64::new(batchsize).ok_or_else(|| {
            MigrationError::Config("batchsize must be a positive integer".to_string())
        })?;
        Ok(self)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    /// Check constraints serde cannot express
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.flush_interval_ms == 0 {
            return Err(MigrationError::Config(
                "flush_interval_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Parse a configuration document
pub fn parse_config(contents: &str) -> Result<MigrationConfig> {
    let config: MigrationConfig =
        toml::from_str(contents).context("Failed to parse migration config")?;
    config.validate()?;
    Ok(config)
}

/// Load configuration from a TOML file
pub fn load_config_from_file(path: impl AsRef<Path>) -> Result<MigrationConfig> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config = parse_config(&contents)
        .with_context(|| format!("Invalid config file {}", path.display()))?;
    tracing::debug!(
        "Loaded config from {}: batchsize={}, flush_interval_ms={}",
        path.display(),
        config.batchsize,
        config.flush_interval_ms
    );
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = MigrationConfig::default();
        assert_eq!(config.batchsize.get(), 1000);
        assert_eq!(config.flush_interval(), Duration::from_millis(400));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config, MigrationConfig::default());
    }

    #[test]
    fn test_rejects_zero_batch_size() {
        assert!(parse_config("batchsize = 0").is_err());
        assert!(MigrationConfig::default().with_batch_size(0).is_err());
    }

    #[test]
    fn test_rejects_fractional_batch_size() {
        assert!(parse_config("batchsize = 2.5").is_err());
    }

    #[test]
    fn test_large_batch_size_allowed() {
        let config = parse_config("batchsize = 50000000").unwrap();
        assert_eq!(config.batchsize.get(), 50_000_000);
    }

    #[test]
    fn test_rejects_zero_flush_interval() {
        let err = parse_config("flush_interval_ms = 0").unwrap_err();
        assert!(format!("{:#}", err).contains("flush_interval_ms"));
    }

    #[test]
    fn test_rejects_unknown_keys() {
        assert!(parse_config("batch_size = 10").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "batchsize = 64\nflush_interval_ms = 50").unwrap();

        let config = load_config_from_file(file.path()).unwrap();
        assert_eq!(config.batchsize.get(), 64);
        assert_eq!(config.flush_interval_ms, 50);
    }

    #[test]
    fn test_load_missing_file() {
        let result = load_config_from_file("/nonexistent/migrate.toml");
        assert!(result.is_err());
    }
}
