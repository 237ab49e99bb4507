//! Coordinator status types: breaker state, cycle outcomes, error records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation, fetches allowed
    #[default]
    Closed,
    /// Fetches short-circuited, cached snapshot served
    Open,
    /// One probe fetch allowed
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => f.write_str("closed"),
            CircuitState::Open => f.write_str("open"),
            CircuitState::HalfOpen => f.write_str("half_open"),
        }
    }
}

/// Result of one refresh cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleOutcome {
    /// Every unit updated
    Updated,
    /// Some units updated, others kept stale data
    PartialFailure,
    /// No unit updated
    TotalFailure,
    /// Breaker open, no fetch attempted
    BreakerOpen,
}

impl fmt::Display for CycleOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleOutcome::Updated => f.write_str("updated"),
            CycleOutcome::PartialFailure => f.write_str("partial_failure"),
            CycleOutcome::TotalFailure => f.write_str("total_failure"),
            CycleOutcome::BreakerOpen => f.write_str("breaker_open"),
        }
    }
}

/// Category of a recorded error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Auth,
    Network,
    Validation,
    Configuration,
    BreakerOpen,
    Persistence,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Auth => "auth",
            ErrorKind::Network => "network",
            ErrorKind::Validation => "validation",
            ErrorKind::Configuration => "configuration",
            ErrorKind::BreakerOpen => "breaker_open",
            ErrorKind::Persistence => "persistence",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorSeverity::Low => f.write_str("low"),
            ErrorSeverity::Medium => f.write_str("medium"),
            ErrorSeverity::High => f.write_str("high"),
            ErrorSeverity::Critical => f.write_str("critical"),
        }
    }
}

/// One entry of the bounded error history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub timestamp: DateTime<Utc>,
    pub kind: ErrorKind,
    pub severity: ErrorSeverity,
    pub message: String,
    /// Service the error relates to ("property/consumer"), if any
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub auto_recovered: bool,
}
