use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::model::ChannelTarget;
use crate::worker::BackoffPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },
    #[error("failed to parse {name} as integer: {source}")]
    ParseInt {
        name: String,
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("failed to parse {name} as float: {source}")]
    ParseFloat {
        name: String,
        #[source]
        source: std::num::ParseFloatError,
    },
    #[error("failed to parse {name} as boolean: {value}")]
    ParseBool { name: String, value: String },
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Channels
    pub channels: Vec<ChannelTarget>,
    pub poll_interval: Duration,
    pub batch_size: usize,

    // Retry / backoff
    pub retry_max_attempts: u32,
    pub retry_base: Duration,
    pub retry_multiplier: f64,
    pub retry_cap: Duration,

    // Persisted state
    pub data_dir: PathBuf,

    // S3 Storage
    pub s3_bucket: String,
    pub s3_region: String,
    pub s3_endpoint: Option<String>,
    pub storage_prefix: String,

    // Alerts
    pub alert_webhook_url: Option<String>,

    // Browser automation
    pub headless: bool,
    pub chrome_path: Option<String>,
    pub nav_timeout: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            // Channels
            channels: parse_channels(&required_env("CHANNELS")?)?,
            poll_interval: Duration::from_secs(parse_env_u64("POLL_INTERVAL_SECS", 30)?),
            batch_size: parse_env_usize("BATCH_SIZE", 50)?,

            // Retry / backoff
            retry_max_attempts: parse_env_u32("RETRY_MAX_ATTEMPTS", 4)?,
            retry_base: Duration::from_millis(parse_env_u64("RETRY_BASE_MS", 2000)?),
            retry_multiplier: parse_env_f64("RETRY_MULTIPLIER", 2.0)?,
            retry_cap: Duration::from_secs(parse_env_u64("RETRY_CAP_SECS", 60)?),

            // Persisted state
            data_dir: PathBuf::from(env_or_default("DATA_DIR", "./data")),

            // S3 Storage
            s3_bucket: required_env("S3_BUCKET")?,
            s3_region: env_or_default("S3_REGION", "us-east-1"),
            s3_endpoint: optional_env("S3_ENDPOINT"),
            storage_prefix: env_or_default("STORAGE_PREFIX", "channels/"),

            // Alerts
            alert_webhook_url: optional_env("ALERT_WEBHOOK_URL"),

            // Browser automation
            headless: parse_env_bool("HEADLESS", true)?,
            chrome_path: optional_env("CHROME_PATH"),
            nav_timeout: Duration::from_secs(parse_env_u64("NAV_TIMEOUT_SECS", 30)?),
        })
    }

    /// Validate that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channels.is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "CHANNELS".to_string(),
                message: "must list at least one channel URL".to_string(),
            });
        }
        if self.batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                name: "BATCH_SIZE".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.retry_max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                name: "RETRY_MAX_ATTEMPTS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.retry_multiplier < 1.0 {
            return Err(ConfigError::InvalidValue {
                name: "RETRY_MULTIPLIER".to_string(),
                message: "must be >= 1.0".to_string(),
            });
        }
        if self.s3_bucket.is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "S3_BUCKET".to_string(),
                message: "cannot be empty".to_string(),
            });
        }
        Ok(())
    }

    /// The retry policy shared by channel operations and uploads.
    #[must_use]
    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            base: self.retry_base,
            multiplier: self.retry_multiplier,
            cap: self.retry_cap,
            max_attempts: self.retry_max_attempts,
        }
    }

    /// A configuration suitable for tests: one channel, tiny intervals, no
    /// real storage destination.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            channels: vec![
                ChannelTarget::parse("https://chat.example.com/channels/100").unwrap(),
            ],
            poll_interval: Duration::from_millis(20),
            batch_size: 10,
            retry_max_attempts: 3,
            retry_base: Duration::from_millis(1),
            retry_multiplier: 2.0,
            retry_cap: Duration::from_millis(10),
            data_dir: PathBuf::from("./data"),
            s3_bucket: "test-bucket".to_string(),
            s3_region: "us-east-1".to_string(),
            s3_endpoint: None,
            storage_prefix: "channels/".to_string(),
            alert_webhook_url: None,
            headless: true,
            chrome_path: None,
            nav_timeout: Duration::from_secs(5),
        }
    }
}

fn parse_channels(raw: &str) -> Result<Vec<ChannelTarget>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|entry| {
            ChannelTarget::parse(entry).map_err(|message| ConfigError::InvalidValue {
                name: "CHANNELS".to_string(),
                message,
            })
        })
        .collect()
}

fn required_env(name: &str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingEnvVar(name.to_string()))
}

fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_or_default(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_env_u64(name: &str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_u32(name: &str, default: u32) -> Result<u32, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_usize(name: &str, default: usize) -> Result<usize, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_f64(name: &str, default: f64) -> Result<f64, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseFloat {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_bool(name: &str, default: bool) -> Result<bool, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => match val.to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::ParseBool {
                name: name.to_string(),
                value: val,
            }),
        },
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_from_env_applies_values_and_defaults() {
        std::env::set_var("CHANNELS", "https://chat.example.com/channels/1");
        std::env::set_var("S3_BUCKET", "archive");
        std::env::set_var("BATCH_SIZE", "25");

        let config = Config::from_env().unwrap();
        assert_eq!(config.channels.len(), 1);
        assert_eq!(config.s3_bucket, "archive");
        assert_eq!(config.batch_size, 25);
        assert_eq!(config.retry_max_attempts, 4);
        assert_eq!(config.storage_prefix, "channels/");

        std::env::remove_var("CHANNELS");
        std::env::remove_var("S3_BUCKET");
        std::env::remove_var("BATCH_SIZE");
    }

    #[test]
    #[serial]
    fn test_from_env_requires_channels() {
        std::env::remove_var("CHANNELS");
        std::env::set_var("S3_BUCKET", "archive");
        assert!(Config::from_env().is_err());
        std::env::remove_var("S3_BUCKET");
    }

    #[test]
    fn test_parse_channels() {
        let channels = parse_channels(
            "https://chat.example.com/channels/1, https://chat.example.com/channels/2 ,",
        )
        .unwrap();
        assert_eq!(channels.len(), 2);
        assert_eq!(channels[0].channel_id(), "1");
        assert_eq!(channels[1].channel_id(), "2");
    }

    #[test]
    fn test_parse_channels_rejects_invalid_entry() {
        assert!(parse_channels("https://chat.example.com/channels/1,garbage").is_err());
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_env_bool("NONEXISTENT_VAR", true).unwrap());
        assert!(!parse_env_bool("NONEXISTENT_VAR", false).unwrap());
    }

    #[test]
    fn test_validate_rejects_zero_batch_size() {
        let config = Config {
            batch_size: 0,
            ..Config::for_testing()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_shrinking_multiplier() {
        let config = Config {
            retry_multiplier: 0.5,
            ..Config::for_testing()
        };
        assert!(config.validate().is_err());
    }
}
