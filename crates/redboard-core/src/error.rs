//! Error types for redboard-core
//!
//! Cycle-level failures surface as `CoreError`; unit-level fetch failures are
//! absorbed into the merge result as `UnitError` so one service never aborts
//! its siblings.

use redboard_types::ErrorKind;
use std::path::PathBuf;
use thiserror::Error;

/// Core error type for redboard operations
#[derive(Error, Debug)]
pub enum CoreError {
    // ===================
    // IO Errors
    // ===================
    #[error("Failed to read file: {path}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Failed to parse TOML in {path}: {message}")]
    TomlParse { path: PathBuf, message: String },

    // ===================
    // Config Errors
    // ===================
    #[error("Invalid configuration: {message}")]
    Configuration { message: String },

    #[error("No coordinator registered for {config_id}")]
    CoordinatorNotFound { config_id: String },

    #[error("Refresh cycle aborted: {message}")]
    CycleAborted { message: String },

    // ===================
    // Provider Errors
    // ===================
    #[error("Authentication failed: {message}")]
    Auth { message: String },

    // ===================
    // State Errors
    // ===================
    #[error("State persistence failed: {message}")]
    Persistence { message: String },

    #[error("State migration v{from} -> v{to} failed: {message}")]
    Migration { from: u32, to: u32, message: String },
}

impl CoreError {
    pub fn configuration(message: impl Into<String>) -> Self {
        CoreError::Configuration {
            message: message.into(),
        }
    }

    /// Error-log category for this error, if it maps to one
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            CoreError::Configuration { .. } | CoreError::TomlParse { .. } => {
                Some(ErrorKind::Configuration)
            }
            CoreError::Auth { .. } => Some(ErrorKind::Auth),
            CoreError::Persistence { .. } | CoreError::Migration { .. } => {
                Some(ErrorKind::Persistence)
            }
            _ => None,
        }
    }

    /// Actionable hint for the user, when one exists
    pub fn suggestion(&self) -> Option<String> {
        match self {
            CoreError::Auth { .. } => {
                Some("Update credentials with: redboard credentials".to_string())
            }
            CoreError::FileNotFound { path } => {
                Some(format!("Check if file exists: ls {}", path.display()))
            }
            CoreError::Configuration { message } if message.contains("interval") => {
                Some("Polling interval must be one of 1, 5, 15, 30, 60 minutes".to_string())
            }
            CoreError::CycleAborted { .. } => {
                Some("Run 'redboard refresh --verbose' to see why the cycle stopped".to_string())
            }
            _ => None,
        }
    }
}

impl From<AuthError> for CoreError {
    fn from(err: AuthError) -> Self {
        CoreError::Auth {
            message: err.to_string(),
        }
    }
}

/// Errors raised by a `Fetcher` for one unit of work
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("credentials rejected: {0}")]
    Auth(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("invalid payload: {0}")]
    Validation(String),
}

/// Errors raised by an `Authenticator`
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Credentials were refused; retrying without new ones is futile
    #[error("credentials rejected: {0}")]
    Rejected(String),

    /// Authentication endpoint unreachable
    #[error("authentication service unavailable: {0}")]
    Unavailable(String),
}

/// Final failure of one (property, service) unit after retries
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UnitError {
    #[error("timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("network error: {0}")]
    Network(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("credentials rejected: {0}")]
    Auth(String),
}

impl UnitError {
    /// Timeouts and network errors are retried locally
    pub fn is_retryable(&self) -> bool {
        matches!(self, UnitError::Timeout { .. } | UnitError::Network(_))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            UnitError::Timeout { .. } | UnitError::Network(_) => ErrorKind::Network,
            UnitError::Validation(_) => ErrorKind::Validation,
            UnitError::Auth(_) => ErrorKind::Auth,
        }
    }
}

impl From<FetchError> for UnitError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Auth(m) => UnitError::Auth(m),
            FetchError::Network(m) => UnitError::Network(m),
            FetchError::Validation(m) => UnitError::Validation(m),
        }
    }
}

/// Overall health of a coordinator next to its published snapshot
#[derive(Debug, Clone, PartialEq, Eq, Default, serde::Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DegradedState {
    /// Latest cycle refreshed every service
    #[default]
    Healthy,
    /// Some services carry stale data
    PartialData { stale: Vec<String>, reason: String },
    /// Latest cycle produced nothing new; last known good data is served
    Stale { reason: String },
}

impl DegradedState {
    pub fn is_healthy(&self) -> bool {
        matches!(self, DegradedState::Healthy)
    }

    pub fn is_degraded(&self) -> bool {
        !self.is_healthy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_error_retryable() {
        assert!(UnitError::Timeout { timeout_secs: 30 }.is_retryable());
        assert!(UnitError::Network("reset".into()).is_retryable());
        assert!(!UnitError::Validation("bad".into()).is_retryable());
        assert!(!UnitError::Auth("nope".into()).is_retryable());
    }

    #[test]
    fn test_fetch_error_conversion() {
        let unit: UnitError = FetchError::Validation("missing halfHours".into()).into();
        assert_eq!(unit.kind(), ErrorKind::Validation);
        assert_eq!(unit.to_string(), "validation failed: missing halfHours");
    }

    #[test]
    fn test_core_error_kind_and_suggestion() {
        let err: CoreError = AuthError::Rejected("bad secret".into()).into();
        assert_eq!(err.kind(), Some(ErrorKind::Auth));
        assert!(err.suggestion().is_some());

        let err = CoreError::configuration("interval 7 not allowed");
        assert_eq!(err.kind(), Some(ErrorKind::Configuration));
        assert!(err.suggestion().is_some());
        assert_eq!(
            err.to_string(),
            "Invalid configuration: interval 7 not allowed"
        );

        let err = CoreError::configuration("breaker.base_cooldown_secs must be between 1 and 604800");
        assert!(err.suggestion().is_none());

        let err = CoreError::Migration {
            from: 1,
            to: 2,
            message: "bad interval".into(),
        };
        assert_eq!(err.kind(), Some(ErrorKind::Persistence));
        assert!(CoreError::CycleAborted {
            message: "panicked".into()
        }
        .kind()
        .is_none());
    }

    #[test]
    fn test_degraded_state() {
        assert!(DegradedState::Healthy.is_healthy());
        let stale = DegradedState::Stale {
            reason: "breaker open".into(),
        };
        assert!(stale.is_degraded());
    }
}
