//! Cache configuration for tier capacities and sweep policy.
//!
//! Configuration can be loaded from a TOML file, environment variables,
//! or created programmatically.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the image cache tiers and background sweep.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    /// Entry limit of the full-size image tier
    pub main_capacity: usize,
    /// Entry limit of the thumbnail tier
    pub thumbnail_capacity: usize,
    /// Entry limit of the placeholder tier
    pub placeholder_capacity: usize,
    /// Time between periodic sweeps
    pub sweep_interval: Duration,
    /// Total resident entries across tiers above which a sweep trims
    pub sweep_threshold: usize,
    /// Fraction of the largest tier removed by a trimming sweep (0.0 to 1.0]
    pub trim_fraction: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            main_capacity: 15,
            thumbnail_capacity: 50,
            placeholder_capacity: 100,
            sweep_interval: Duration::from_secs(5 * 60),
            sweep_threshold: 100,
            trim_fraction: 0.2,
        }
    }
}

/// On-disk representation; durations are stored in whole seconds.
#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
struct CacheConfigFile {
    main_capacity: usize,
    thumbnail_capacity: usize,
    placeholder_capacity: usize,
    sweep_interval_secs: u64,
    sweep_threshold: usize,
    trim_fraction: f64,
}

impl Default for CacheConfigFile {
    fn default() -> Self {
        CacheConfig::default().to_file_repr()
    }
}

impl CacheConfig {
    /// Sets the main tier capacity.
    pub fn with_main_capacity(mut self, capacity: usize) -> Self {
        self.main_capacity = capacity;
        self
    }

    /// Sets the thumbnail tier capacity.
    pub fn with_thumbnail_capacity(mut self, capacity: usize) -> Self {
        self.thumbnail_capacity = capacity;
        self
    }

    /// Sets the placeholder tier capacity.
    pub fn with_placeholder_capacity(mut self, capacity: usize) -> Self {
        self.placeholder_capacity = capacity;
        self
    }

    /// Sets the time between sweeps.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Sets the aggregate occupancy above which a sweep trims.
    pub fn with_sweep_threshold(mut self, threshold: usize) -> Self {
        self.sweep_threshold = threshold;
        self
    }

    /// Sets the fraction of the largest tier removed per trim.
    pub fn with_trim_fraction(mut self, fraction: f64) -> Self {
        self.trim_fraction = fraction;
        self
    }

    /// Returns the default configuration file location.
    ///
    /// - macOS: ~/Library/Application Support/photomap/cache.toml
    /// - Linux: ~/.config/photomap/cache.toml
    /// - Windows: %APPDATA%\photomap\cache.toml
    pub fn default_config_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("photomap").join("cache.toml")
        } else {
            PathBuf::from("photomap-cache.toml")
        }
    }

    /// Checks that every value is usable.
    ///
    /// # Errors
    /// Returns the name of the first invalid setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |key: &str| Err(ConfigError::InvalidValue(key.to_string()));

        if self.main_capacity == 0 {
            return invalid("main_capacity");
        }
        if self.thumbnail_capacity == 0 {
            return invalid("thumbnail_capacity");
        }
        if self.placeholder_capacity == 0 {
            return invalid("placeholder_capacity");
        }
        if self.sweep_interval.is_zero() {
            return invalid("sweep_interval");
        }
        if !(self.trim_fraction > 0.0 && self.trim_fraction <= 1.0) {
            return invalid("trim_fraction");
        }
        Ok(())
    }

    /// Loads configuration from environment variables.
    ///
    /// Environment variables:
    /// - `PHOTOMAP_MAIN_CACHE_CAPACITY` (default: 15)
    /// - `PHOTOMAP_THUMBNAIL_CACHE_CAPACITY` (default: 50)
    /// - `PHOTOMAP_PLACEHOLDER_CACHE_CAPACITY` (default: 100)
    /// - `PHOTOMAP_SWEEP_INTERVAL_SECS` (default: 300)
    /// - `PHOTOMAP_SWEEP_THRESHOLD` (default: 100)
    /// - `PHOTOMAP_SWEEP_TRIM_FRACTION` (default: 0.2)
    ///
    /// # Errors
    /// Returns an error if any environment variable contains an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(capacity) = env_value("PHOTOMAP_MAIN_CACHE_CAPACITY")? {
            config.main_capacity = capacity;
        }
        if let Some(capacity) = env_value("PHOTOMAP_THUMBNAIL_CACHE_CAPACITY")? {
            config.thumbnail_capacity = capacity;
        }
        if let Some(capacity) = env_value("PHOTOMAP_PLACEHOLDER_CACHE_CAPACITY")? {
            config.placeholder_capacity = capacity;
        }
        if let Some(secs) = env_value::<u64>("PHOTOMAP_SWEEP_INTERVAL_SECS")? {
            config.sweep_interval = Duration::from_secs(secs);
        }
        if let Some(threshold) = env_value("PHOTOMAP_SWEEP_THRESHOLD")? {
            config.sweep_threshold = threshold;
        }
        if let Some(fraction) = env_value("PHOTOMAP_SWEEP_TRIM_FRACTION")? {
            config.trim_fraction = fraction;
        }

        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a TOML file.
    ///
    /// Expected file format (every key optional):
    /// ```toml
    /// main_capacity = 15
    /// thumbnail_capacity = 50
    /// placeholder_capacity = 100
    /// sweep_interval_secs = 300
    /// sweep_threshold = 100
    /// trim_fraction = 0.2
    /// ```
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref())?;
        Self::from_toml(&contents)
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let file: CacheConfigFile = toml::from_str(toml_str)?;
        let config = Self {
            main_capacity: file.main_capacity,
            thumbnail_capacity: file.thumbnail_capacity,
            placeholder_capacity: file.placeholder_capacity,
            sweep_interval: Duration::from_secs(file.sweep_interval_secs),
            sweep_threshold: file.sweep_threshold,
            trim_fraction: file.trim_fraction,
        };
        config.validate()?;
        Ok(config)
    }

    /// Saves configuration to a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let toml = self.to_toml()?;
        fs::write(path.as_ref(), toml)?;
        Ok(())
    }

    /// Converts configuration to TOML format.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string(&self.to_file_repr())?)
    }

    fn to_file_repr(&self) -> CacheConfigFile {
        CacheConfigFile {
            main_capacity: self.main_capacity,
            thumbnail_capacity: self.thumbnail_capacity,
            placeholder_capacity: self.placeholder_capacity,
            sweep_interval_secs: self.sweep_interval.as_secs(),
            sweep_threshold: self.sweep_threshold,
            trim_fraction: self.trim_fraction,
        }
    }

    /// Total entries the tiers can hold together
    pub fn total_capacity(&self) -> usize {
        self.main_capacity + self.thumbnail_capacity + self.placeholder_capacity
    }
}

fn env_value<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(val) => val
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        Err(_) => Ok(None),
    }
}

/// Errors that can occur during configuration operations.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Invalid value for a configuration parameter
    #[error("invalid value for configuration key: {0}")]
    InvalidValue(String),
    /// I/O error reading or writing configuration file
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// Malformed TOML
    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),
    /// Configuration could not be rendered as TOML
    #[error("serialization error: {0}")]
    Serialize(#[from] toml::ser::Error),
}
