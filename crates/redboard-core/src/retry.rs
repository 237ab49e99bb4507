//! Per-unit retry policy for bulk fetches

use crate::config::FetchSettings;
use std::time::Duration;

/// Timeout and backoff schedule applied to each fetch unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Bound on a single fetch attempt
    pub attempt_timeout: Duration,
    /// Delay before retry N (1-based); its length is the retry count
    pub backoff: Vec<Duration>,
}

impl RetryPolicy {
    /// Total attempts including the first one
    pub fn max_attempts(&self) -> usize {
        self.backoff.len() + 1
    }

    /// Delay before `attempt` (0-based); none before the first attempt
    pub fn delay_before(&self, attempt: usize) -> Option<Duration> {
        attempt
            .checked_sub(1)
            .and_then(|idx| self.backoff.get(idx))
            .copied()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempt_timeout: Duration::from_secs(30),
            backoff: vec![Duration::from_secs(1), Duration::from_secs(3)],
        }
    }
}

impl From<&FetchSettings> for RetryPolicy {
    fn from(settings: &FetchSettings) -> Self {
        Self {
            attempt_timeout: Duration::from_secs(settings.timeout_secs),
            backoff: settings
                .retry_backoff_secs
                .iter()
                .map(|&secs| Duration::from_secs(secs))
                .collect(),
        }
    }
}
