//! Cache configuration
//!
//! Limits for the page image store. Configuration can be loaded from
//! environment variables or created programmatically; the pipeline config in
//! `folio-core` embeds this struct and handles file loading.

use std::io;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const MB: usize = 1024 * 1024;

/// Limits for the page image store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of cached page images
    pub max_entries: usize,
    /// Maximum total cost of cached page images in bytes
    pub max_cost_bytes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 50,
            max_cost_bytes: 200 * MB,
        }
    }
}

impl CacheConfig {
    pub fn new(max_entries: usize, max_cost_mb: usize) -> Self {
        Self { max_entries, max_cost_bytes: max_cost_mb.saturating_mul(MB) }
    }

    /// Sets the maximum number of entries.
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    /// Sets the maximum total cost in megabytes, saturating at `usize::MAX` bytes.
    pub fn with_max_cost_mb(mut self, mb: usize) -> Self {
        self.max_cost_bytes = mb.saturating_mul(MB);
        self
    }

    /// Returns the cost limit in megabytes.
    pub fn max_cost_mb(&self) -> usize {
        self.max_cost_bytes / MB
    }

    /// Loads limits from environment variables on top of the defaults.
    ///
    /// Environment variables:
    /// - `FOLIO_MAX_ENTRIES`: maximum cached images (default: 50)
    /// - `FOLIO_MAX_COST_MB`: maximum total cost in MB (default: 200)
    ///
    /// # Errors
    /// Returns an error if any variable holds something other than a number.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(value) = env_usize("FOLIO_MAX_ENTRIES")? {
            config.max_entries = value;
        }
        if let Some(bytes) = env_cost_mb("FOLIO_MAX_COST_MB")? {
            config.max_cost_bytes = bytes;
        }
        Ok(config)
    }

    /// Rejects limits that would make the store unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_entries == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_entries".to_string(),
                value: "0".to_string(),
            });
        }
        if self.max_cost_bytes == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_cost_bytes".to_string(),
                value: "0".to_string(),
            });
        }
        Ok(())
    }
}

/// Reads a numeric environment variable, `None` if unset.
pub fn env_usize(name: &str) -> Result<Option<usize>, ConfigError> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<usize>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { key: name.to_string(), value }),
        Err(_) => Ok(None),
    }
}

/// Reads a megabyte count from the environment and converts it to bytes,
/// `None` if unset.
pub fn env_cost_mb(name: &str) -> Result<Option<usize>, ConfigError> {
    let Some(mb) = env_usize(name)? else {
        return Ok(None);
    };
    mb.checked_mul(MB)
        .map(Some)
        .ok_or_else(|| ConfigError::InvalidValue { key: name.to_string(), value: mb.to_string() })
}

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Invalid value for a configuration parameter
    #[error("invalid value '{value}' for configuration key {key}")]
    InvalidValue { key: String, value: String },

    /// I/O error reading a configuration file
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Malformed configuration file
    #[error("failed to parse configuration: {0}")]
    Parse(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    #[test]
    fn test_default_config() {
        let config = CacheConfig::default();
        assert_eq!(config.max_entries, 50);
        assert_eq!(config.max_cost_bytes, 200 * 1024 * 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_methods() {
        let config = CacheConfig::default().with_max_entries(8).with_max_cost_mb(16);
        assert_eq!(config.max_entries, 8);
        assert_eq!(config.max_cost_bytes, 16 * 1024 * 1024);
        assert_eq!(config.max_cost_mb(), 16);
        assert_eq!(config, CacheConfig::new(8, 16));
    }

    #[test]
    fn test_validate_rejects_zero() {
        assert!(CacheConfig::new(0, 10).validate().is_err());
        assert!(CacheConfig::new(10, 0).validate().is_err());
    }

    #[test]
    #[serial]
    fn test_from_env() {
        let _guard = EnvGuard::new(&["FOLIO_MAX_ENTRIES", "FOLIO_MAX_COST_MB"]);

        env::set_var("FOLIO_MAX_ENTRIES", "12");
        env::set_var("FOLIO_MAX_COST_MB", "64");

        let config = CacheConfig::from_env().unwrap();
        assert_eq!(config.max_entries, 12);
        assert_eq!(config.max_cost_bytes, 64 * 1024 * 1024);
    }

    #[test]
    #[serial]
    fn test_from_env_partial() {
        let _guard = EnvGuard::new(&["FOLIO_MAX_ENTRIES", "FOLIO_MAX_COST_MB"]);

        env::remove_var("FOLIO_MAX_COST_MB");
        env::set_var("FOLIO_MAX_ENTRIES", "7");

        let config = CacheConfig::from_env().unwrap();
        assert_eq!(config.max_entries, 7);
        assert_eq!(config.max_cost_bytes, 200 * 1024 * 1024);
    }

    #[test]
    #[serial]
    fn test_from_env_invalid() {
        let _guard = EnvGuard::new(&["FOLIO_MAX_ENTRIES"]);

        env::set_var("FOLIO_MAX_ENTRIES", "lots");
        let err = CacheConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("FOLIO_MAX_ENTRIES"));
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_cost_overflow() {
        let _guard = EnvGuard::new(&["FOLIO_MAX_ENTRIES", "FOLIO_MAX_COST_MB"]);

        env::remove_var("FOLIO_MAX_ENTRIES");
        env::set_var("FOLIO_MAX_COST_MB", usize::MAX.to_string());

        match CacheConfig::from_env() {
            Err(ConfigError::InvalidValue { key, value }) => {
                assert_eq!(key, "FOLIO_MAX_COST_MB");
                assert_eq!(value, usize::MAX.to_string());
            }
            other => panic!("expected InvalidValue, got {other:?}"),
        }
    }

    #[test]
    fn test_cost_builder_saturates() {
        let config = CacheConfig::default().with_max_cost_mb(usize::MAX);
        assert_eq!(config.max_cost_bytes, usize::MAX);
        assert_eq!(CacheConfig::new(1, usize::MAX).max_cost_bytes, usize::MAX);
    }

    #[test]
    fn test_serde_defaults_missing_fields() {
        let config: CacheConfig = serde_json::from_str(r#"{ "max_entries": 3 }"#).unwrap();
        assert_eq!(config.max_entries, 3);
        assert_eq!(config.max_cost_bytes, 200 * 1024 * 1024);
    }

    // Saves and restores environment variables around a test
    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new(var_names: &[&str]) -> Self {
            let vars = var_names
                .iter()
                .map(|name| (name.to_string(), env::var(name).ok()))
                .collect();
            Self { vars }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (name, value) in &self.vars {
                match value {
                    Some(v) => env::set_var(name, v),
                    None => env::remove_var(name),
                }
            }
        }
    }
}
