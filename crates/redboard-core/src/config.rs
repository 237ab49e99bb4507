//! Coordinator configuration
//!
//! Loaded from a TOML file; every section has serde defaults so a minimal
//! file only needs `config_id` and its properties.

use crate::error::CoreError;
use redboard_types::Property;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Refresh cadence, restricted to the supported set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum PollingInterval {
    OneMinute,
    #[default]
    FiveMinutes,
    FifteenMinutes,
    ThirtyMinutes,
    SixtyMinutes,
}

impl PollingInterval {
    pub const ALL: [PollingInterval; 5] = [
        PollingInterval::OneMinute,
        PollingInterval::FiveMinutes,
        PollingInterval::FifteenMinutes,
        PollingInterval::ThirtyMinutes,
        PollingInterval::SixtyMinutes,
    ];

    pub fn from_minutes(minutes: u32) -> Result<Self, CoreError> {
        Self::ALL
            .into_iter()
            .find(|i| i.minutes() == minutes)
            .ok_or_else(|| {
                CoreError::configuration(format!(
                    "polling interval {} min not supported (allowed: 1, 5, 15, 30, 60)",
                    minutes
                ))
            })
    }

    pub fn minutes(&self) -> u32 {
        match self {
            PollingInterval::OneMinute => 1,
            PollingInterval::FiveMinutes => 5,
            PollingInterval::FifteenMinutes => 15,
            PollingInterval::ThirtyMinutes => 30,
            PollingInterval::SixtyMinutes => 60,
        }
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_secs(u64::from(self.minutes()) * 60)
    }
}

impl TryFrom<u32> for PollingInterval {
    type Error = CoreError;

    fn try_from(minutes: u32) -> Result<Self, Self::Error> {
        Self::from_minutes(minutes)
    }
}

impl From<PollingInterval> for u32 {
    fn from(interval: PollingInterval) -> Self {
        interval.minutes()
    }
}

impl fmt::Display for PollingInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} min", self.minutes())
    }
}

/// Bulk fetch tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchSettings {
    /// Per-attempt timeout
    pub timeout_secs: u64,
    /// Delay before each retry; its length is the retry count
    pub retry_backoff_secs: Vec<u64>,
    /// Upper bound of the worker pool
    pub max_workers: usize,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            retry_backoff_secs: vec![1, 3],
            max_workers: 5,
        }
    }
}

/// Upper bound for breaker cooldowns (one week)
pub const MAX_COOLDOWN_SECS: u64 = 7 * 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub base_cooldown_secs: u64,
    pub max_cooldown_secs: u64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            base_cooldown_secs: 30,
            max_cooldown_secs: 30 * 60,
        }
    }
}

/// Provider credentials handed to the authenticator
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Credentials {
    pub username: String,
    pub client_id: String,
    pub secret: String,
}

impl Credentials {
    pub fn new(
        username: impl Into<String>,
        client_id: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            client_id: client_id.into(),
            secret: secret.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("client_id", &self.client_id)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Full configuration of one coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    pub config_id: String,
    #[serde(default)]
    pub properties: Vec<Property>,
    #[serde(default)]
    pub polling_interval: PollingInterval,
    /// Trailing window of retained usage days
    #[serde(default = "default_window_days")]
    pub window_days: u32,
    #[serde(default = "default_error_retention_days")]
    pub error_retention_days: u32,
    #[serde(default = "default_max_error_records")]
    pub max_error_records: usize,
    #[serde(default)]
    pub fetch: FetchSettings,
    #[serde(default)]
    pub breaker: BreakerSettings,
    #[serde(default)]
    pub credentials: Credentials,
}

fn default_window_days() -> u32 {
    30
}

fn default_error_retention_days() -> u32 {
    30
}

fn default_max_error_records() -> usize {
    500
}

impl CoordinatorConfig {
    pub fn new(config_id: impl Into<String>, properties: Vec<Property>) -> Self {
        Self {
            config_id: config_id.into(),
            properties,
            polling_interval: PollingInterval::default(),
            window_days: default_window_days(),
            error_retention_days: default_error_retention_days(),
            max_error_records: default_max_error_records(),
            fetch: FetchSettings::default(),
            breaker: BreakerSettings::default(),
            credentials: Credentials::default(),
        }
    }

    /// Load and validate a TOML configuration file
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        if !path.exists() {
            return Err(CoreError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let content = std::fs::read_to_string(path).map_err(|source| CoreError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|e| CoreError::TomlParse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that can never produce a sane cycle
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.config_id.trim().is_empty() {
            return Err(CoreError::configuration("config_id must not be empty"));
        }
        if self.window_days == 0 {
            return Err(CoreError::configuration("window_days must be at least 1"));
        }
        if self.fetch.max_workers == 0 {
            return Err(CoreError::configuration("fetch.max_workers must be at least 1"));
        }
        if self.fetch.timeout_secs == 0 {
            return Err(CoreError::configuration("fetch.timeout_secs must be at least 1"));
        }
        if self.breaker.failure_threshold == 0 {
            return Err(CoreError::configuration(
                "breaker.failure_threshold must be at least 1",
            ));
        }
        let breaker = &self.breaker;
        if !(1..=MAX_COOLDOWN_SECS).contains(&breaker.base_cooldown_secs) {
            return Err(CoreError::configuration(format!(
                "breaker.base_cooldown_secs must be between 1 and {}",
                MAX_COOLDOWN_SECS
            )));
        }
        if breaker.max_cooldown_secs < breaker.base_cooldown_secs
            || breaker.max_cooldown_secs > MAX_COOLDOWN_SECS
        {
            return Err(CoreError::configuration(format!(
                "breaker.max_cooldown_secs must be between base_cooldown_secs and {}",
                MAX_COOLDOWN_SECS
            )));
        }

        let mut seen = HashSet::new();
        for property in &self.properties {
            if property.id.trim().is_empty() {
                return Err(CoreError::configuration("property id must not be empty"));
            }
            for service in &property.services {
                if !seen.insert((property.id.as_str(), service.consumer_id.as_str())) {
                    return Err(CoreError::configuration(format!(
                        "duplicate service {}/{}",
                        property.id, service.consumer_id
                    )));
                }
            }
        }
        Ok(())
    }
}
