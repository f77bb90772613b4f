//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::de::Error;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::{PublisherError, Result};
use crate::sender::RetryPolicy;
use crate::sensor::IioChannel;

/// Environment variable that overrides `endpoint.post_secret`
pub const POST_SECRET_ENV: &str = "POST_SECRET";

/// Upper bound for a single request
const MAX_TIMEOUT_MS: u64 = 9_999;

/// Upper bound for one wait between direct-send retries
const MAX_RETRY_DELAY_MS: u64 = 10_000;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub endpoint: EndpointConfig,
    #[serde(default)]
    pub publisher: PublisherConfig,
    #[serde(default)]
    pub spool: SpoolConfig,
    #[serde(default)]
    pub sensors: SensorsConfig,
    #[serde(default)]
    pub led: LedConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Ingestion endpoint configuration
#[derive(Debug, Deserialize, Clone)]
pub struct EndpointConfig {
    pub url: String,

    #[serde(default)]
    pub post_secret: String,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,

    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
}

/// Publish loop timing and identity
#[derive(Debug, Deserialize, Clone)]
pub struct PublisherConfig {
    #[serde(default = "default_sample_interval_secs")]
    pub sample_interval_secs: u64,

    #[serde(default = "default_warmup_duration_secs")]
    pub warmup_duration_secs: u64,

    #[serde(default)]
    pub device_id: Option<String>,
}

/// Offline queue configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SpoolConfig {
    #[serde(default = "default_spool_db_path")]
    pub db_path: String,

    #[serde(default = "default_spool_max_rows")]
    pub max_rows: usize,

    #[serde(default = "default_spool_flush_batch")]
    pub flush_batch: usize,
}

/// Sensor channels read each tick
#[derive(Debug, Deserialize, Clone, Default)]
pub struct SensorsConfig {
    #[serde(default)]
    pub channels: Vec<IioChannel>,
}

/// Status LED configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LedConfig {
    #[serde(default = "default_led_enabled")]
    pub enabled: bool,

    #[serde(default = "default_led_sysfs_base")]
    pub sysfs_base: String,

    #[serde(default = "default_blink_on_ms")]
    pub blink_on_ms: u64,

    #[serde(default = "default_blink_off_ms")]
    pub blink_off_ms: u64,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub log_dir: Option<String>,
}

// Default value functions
fn default_user_agent() -> String { "sleep-quality-sensors/1.0".to_string() }
fn default_timeout_ms() -> u64 { 5000 }
fn default_retry_max_attempts() -> u32 { 1 }
fn default_retry_base_delay_ms() -> u64 { 500 }
fn default_retry_max_delay_ms() -> u64 { 5000 }

fn default_sample_interval_secs() -> u64 { 10 }
fn default_warmup_duration_secs() -> u64 { 300 }

fn default_spool_db_path() -> String { "./spool.db".to_string() }
fn default_spool_max_rows() -> usize { 10_000 }
fn default_spool_flush_batch() -> usize { 100 }

fn default_led_enabled() -> bool { true }
fn default_led_sysfs_base() -> String { crate::status::led::DEFAULT_LED_BASE.to_string() }
fn default_blink_on_ms() -> u64 { 200 }
fn default_blink_off_ms() -> u64 { 800 }

fn default_log_level() -> String { "info".to_string() }

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            sample_interval_secs: default_sample_interval_secs(),
            warmup_duration_secs: default_warmup_duration_secs(),
            device_id: None,
        }
    }
}

impl Default for SpoolConfig {
    fn default() -> Self {
        Self {
            db_path: default_spool_db_path(),
            max_rows: default_spool_max_rows(),
            flush_batch: default_spool_flush_batch(),
        }
    }
}

impl Default for LedConfig {
    fn default() -> Self {
        Self {
            enabled: default_led_enabled(),
            sysfs_base: default_led_sysfs_base(),
            blink_on_ms: default_blink_on_ms(),
            blink_off_ms: default_blink_off_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            log_dir: None,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// A non-empty `POST_SECRET` environment variable replaces
    /// `endpoint.post_secret`, so the secret can stay out of the file.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use env_publisher::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let secret = env::var(POST_SECRET_ENV).ok();
        Self::from_toml_str(&contents, secret.as_deref())
    }

    /// Parse and validate configuration text, with an optional secret override
    pub fn from_toml_str(contents: &str, secret_override: Option<&str>) -> Result<Self> {
        let mut config: Config = toml::from_str(contents)?;
        if let Some(secret) = secret_override.map(str::trim).filter(|s| !s.is_empty()) {
            config.endpoint.post_secret = secret.to_string();
        }
        config.validate()?;
        Ok(config)
    }

    /// Inter-tick sleep, never shorter than one second
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.publisher.sample_interval_secs.max(1))
    }

    /// One-time startup delay; zero disables it
    pub fn warmup(&self) -> Duration {
        Duration::from_secs(self.publisher.warmup_duration_secs)
    }

    /// Per-request timeout for the sender
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.endpoint.timeout_ms)
    }

    /// Direct-send retry policy
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.endpoint.retry_max_attempts,
            base_delay: Duration::from_millis(self.endpoint.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.endpoint.retry_max_delay_ms),
        }
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is missing or out of range
    fn validate(&self) -> Result<()> {
        let url = self.endpoint.url.trim();
        if url.is_empty() {
            return Err(invalid("endpoint url cannot be empty"));
        }

        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(invalid("endpoint url must start with http:// or https://"));
        }

        if self.endpoint.post_secret.trim().is_empty() {
            return Err(invalid(format!(
                "endpoint post_secret is required (set it in the file or via {})",
                POST_SECRET_ENV
            )));
        }

        if self.endpoint.timeout_ms == 0 || self.endpoint.timeout_ms > MAX_TIMEOUT_MS {
            return Err(invalid(format!(
                "timeout_ms must be between 1 and {}",
                MAX_TIMEOUT_MS
            )));
        }

        if self.endpoint.retry_max_attempts == 0 || self.endpoint.retry_max_attempts > 10 {
            return Err(invalid("retry_max_attempts must be between 1 and 10"));
        }

        if self.endpoint.retry_max_delay_ms > MAX_RETRY_DELAY_MS {
            return Err(invalid(format!(
                "retry_max_delay_ms must not exceed {}",
                MAX_RETRY_DELAY_MS
            )));
        }

        if self.endpoint.retry_base_delay_ms > self.endpoint.retry_max_delay_ms {
            return Err(invalid("retry_base_delay_ms must not exceed retry_max_delay_ms"));
        }

        if self.spool.db_path.trim().is_empty() {
            return Err(invalid("spool db_path cannot be empty"));
        }

        if self.spool.max_rows == 0 {
            return Err(invalid("spool max_rows must be greater than 0"));
        }

        if self.spool.flush_batch == 0 {
            return Err(invalid("spool flush_batch must be greater than 0"));
        }

        if let Some(device_id) = &self.publisher.device_id {
            if device_id.trim().is_empty() {
                return Err(invalid("device_id cannot be empty when set"));
            }
        }

        for channel in &self.sensors.channels {
            if !channel.scale.is_finite() || channel.scale == 0.0 {
                return Err(invalid(format!(
                    "sensor channel {} must have a finite, non-zero scale",
                    channel.field
                )));
            }
        }

        if self.led.enabled && self.led.sysfs_base.is_empty() {
            return Err(invalid("led sysfs_base cannot be empty when enabled"));
        }

        if !["trace", "debug", "info", "warn", "error"]
            .contains(&self.logging.level.to_ascii_lowercase().as_str())
        {
            return Err(invalid("log level must be one of: trace, debug, info, warn, error"));
        }

        Ok(())
    }
}

fn invalid(msg: impl std::fmt::Display) -> PublisherError {
    PublisherError::Config(toml::de::Error::custom(msg))
}
