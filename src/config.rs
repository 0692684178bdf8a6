//! Application configuration
//!
//! Layered, later layers win:
//! 1. built-in defaults
//! 2. `config/{env}.yaml`, when the file exists
//! 3. environment variables (`DATABASE_URI`, `ACCRUAL_SYSTEM_ADDRESS`,
//!    `ORDER_STATUS_UPDATE_INTERVAL`, `LOG_LEVEL`)
//! 4. command-line flags (`-d`, `-r`, `-u`, `-l`)

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const ENV_DATABASE_URI: &str = "DATABASE_URI";
pub const ENV_ACCRUAL_ADDRESS: &str = "ACCRUAL_SYSTEM_ADDRESS";
pub const ENV_POLL_INTERVAL: &str = "ORDER_STATUS_UPDATE_INTERVAL";
pub const ENV_LOG_LEVEL: &str = "LOG_LEVEL";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("Invalid duration for {key}: '{value}'")]
    InvalidDuration { key: String, value: String },

    #[error("Missing value for flag {0}")]
    MissingFlagValue(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    /// `hourly`, `daily` or `never`
    pub rotation: String,
    pub database_url: Option<String>,
    pub accrual_address: Option<String>,
    pub poll_interval_ms: u64,
    pub accrual_timeout_ms: u64,
    pub max_db_connections: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: "./logs".to_string(),
            log_file: "loyalty_ledger.log".to_string(),
            use_json: false,
            rotation: "daily".to_string(),
            database_url: None,
            accrual_address: None,
            poll_interval_ms: 1000,
            accrual_timeout_ms: 5000,
            max_db_connections: 20,
        }
    }
}

impl AppConfig {
    /// Defaults overlaid with `config/{env}.yaml` if it exists
    pub fn load(env: &str) -> Result<Self, ConfigError> {
        let path = PathBuf::from(format!("config/{}.yaml", env));
        if path.exists() {
            Self::from_file(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }

    /// Overlay process environment variables
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Overlay variables from `lookup`; empty values are ignored
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = get(ENV_DATABASE_URI) {
            self.database_url = Some(url);
        }
        if let Some(address) = get(ENV_ACCRUAL_ADDRESS) {
            self.accrual_address = Some(address);
        }
        if let Some(raw) = get(ENV_POLL_INTERVAL) {
            self.poll_interval_ms = duration_ms(ENV_POLL_INTERVAL, &raw)?;
        }
        if let Some(level) = get(ENV_LOG_LEVEL) {
            self.log_level = level;
        }
        Ok(())
    }

    /// Overlay command-line flags
    ///
    /// Accepts `-d value` and `-d=value`. Unknown arguments are left for
    /// other parsers.
    pub fn apply_args(&mut self, args: &[String]) -> Result<(), ConfigError> {
        let mut i = 0;
        while i < args.len() {
            let (flag, inline) = match args[i].split_once('=') {
                Some((flag, value)) => (flag, Some(value.to_string())),
                None => (args[i].as_str(), None),
            };

            if !matches!(flag, "-d" | "-r" | "-u" | "-l") {
                i += 1;
                continue;
            }

            let value = match inline {
                Some(value) => value,
                None => {
                    i += 1;
                    args.get(i)
                        .cloned()
                        .ok_or_else(|| ConfigError::MissingFlagValue(flag.to_string()))?
                }
            };

            match flag {
                "-d" => self.database_url = Some(value),
                "-r" => self.accrual_address = Some(value),
                "-u" => self.poll_interval_ms = duration_ms(flag, &value)?,
                _ => self.log_level = value,
            }
            i += 1;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "poll interval must be greater than zero".to_string(),
            ));
        }
        if self.accrual_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "accrual timeout must be greater than zero".to_string(),
            ));
        }
        if self.max_db_connections == 0 {
            return Err(ConfigError::Invalid(
                "max_db_connections must be greater than zero".to_string(),
            ));
        }
        if self.database_url.as_deref().is_none_or(|u| u.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!(
                "database url is required (-d or {})",
                ENV_DATABASE_URI
            )));
        }
        if self.accrual_address.as_deref().is_none_or(|u| u.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!(
                "accrual address is required (-r or {})",
                ENV_ACCRUAL_ADDRESS
            )));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn accrual_timeout(&self) -> Duration {
        Duration::from_millis(self.accrual_timeout_ms)
    }
}

fn duration_ms(key: &str, raw: &str) -> Result<u64, ConfigError> {
    let duration = parse_duration(raw).ok_or_else(|| ConfigError::InvalidDuration {
        key: key.to_string(),
        value: raw.to_string(),
    })?;
    u64::try_from(duration.as_millis()).map_err(|_| ConfigError::InvalidDuration {
        key: key.to_string(),
        value: raw.to_string(),
    })
}

/// Parse durations like `500ms`, `1s`, `2m`, `1h` or `1m30s`
///
/// # Examples
/// ```
/// use loyalty_ledger::config::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("1m30s"), Some(Duration::from_secs(90)));
/// assert_eq!(parse_duration("10"), None);
/// ```
pub fn parse_duration(raw: &str) -> Option<Duration> {
    let mut rest = raw.trim();
    if rest.is_empty() {
        return None;
    }

    let mut total = Duration::ZERO;
    while !rest.is_empty() {
        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        if digits == 0 {
            return None;
        }
        let value: u64 = rest[..digits].parse().ok()?;
        rest = &rest[digits..];

        let unit_len = rest.bytes().take_while(u8::is_ascii_alphabetic).count();
        let part = match &rest[..unit_len] {
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => Duration::from_secs(value.checked_mul(60)?),
            "h" => Duration::from_secs(value.checked_mul(3600)?),
            _ => return None,
        };
        rest = &rest[unit_len..];
        total = total.checked_add(part)?;
    }
    Some(total)
}
