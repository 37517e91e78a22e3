//! Configuration types for picmeta
//!
//! This module defines configuration structures used across components.
//! Every section has a `Default` and every field is optional in a config
//! file.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration for picmeta
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Accelerated cache store configuration
    pub cache: CacheConfig,
    /// Metadata source selection
    pub codec: CodecConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Reject values that would stall or disable the flush worker
    pub fn validate(&self) -> Result<()> {
        self.cache.validate()
    }
}

/// Accelerated cache store configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Use the cache store at all
    pub enabled: bool,
    /// Database file
    pub path: PathBuf,
    /// Pending change count that wakes the flush worker early
    pub flush_threshold: usize,
    /// Maximum time between flushes (milliseconds)
    pub flush_interval_ms: u64,
    /// Entries not accessed for this long are evicted (seconds)
    pub lifespan_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: PathBuf::from("./picmeta-cache.redb"),
            flush_threshold: 100,
            flush_interval_ms: 5_000,
            lifespan_secs: 60 * 60 * 24 * 30, // 30 days
        }
    }
}

impl CacheConfig {
    /// Cache configuration rooted at a database path
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub const fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    #[must_use]
    pub const fn lifespan(&self) -> Duration {
        Duration::from_secs(self.lifespan_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.flush_threshold == 0 {
            return Err(Error::Configuration(
                "cache.flush_threshold must be at least 1".into(),
            ));
        }
        if self.flush_interval_ms == 0 {
            return Err(Error::Configuration(
                "cache.flush_interval_ms must be positive".into(),
            ));
        }
        if self.lifespan_secs == 0 {
            return Err(Error::Configuration(
                "cache.lifespan_secs must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Which metadata sources take part in reads and writes
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    /// Filesystem stat attributes (read-only)
    pub filesystem: bool,
    /// EXIF camera metadata (read-only)
    pub camera: bool,
    /// Binary attribute records in private APP1 segments
    pub custom_records: bool,
    /// Custom attributes mirrored into the XMP packet
    pub xmp: bool,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            filesystem: true,
            camera: true,
            custom_records: true,
            xmp: true,
        }
    }
}

/// Logging configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert!(config.codec.xmp);
        assert_eq!(config.cache.flush_interval(), Duration::from_secs(5));
    }

    #[test]
    fn test_validate_rejects_zero_threshold() {
        let mut config = Config::default();
        config.cache.flush_threshold = 0;
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));

        let mut config = Config::default();
        config.cache.lifespan_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: Config =
            serde_json::from_str(r#"{ "cache": { "flush_threshold": 7 } }"#).unwrap();
        assert_eq!(config.cache.flush_threshold, 7);
        assert_eq!(config.cache.flush_interval_ms, 5_000);
        assert!(config.codec.custom_records);
        assert_eq!(config.logging.level, "info");
    }
}
