//! Circuit breaker gating refresh cycles
//!
//! Pure state machine: the caller passes the current time, so transitions
//! are testable without a clock or any I/O.
//!
//! ```text
//! Closed --(threshold consecutive failures)--> Open
//! Open   --(cooldown elapsed)----------------> HalfOpen
//! HalfOpen --(probe succeeds)----------------> Closed
//! HalfOpen --(probe fails, cooldown doubles)-> Open
//! ```

use crate::config::{BreakerSettings, MAX_COOLDOWN_SECS};
use chrono::{DateTime, Duration, Utc};
use redboard_types::CircuitState;
use serde::{Deserialize, Serialize};

/// Breaker thresholds and cooldown bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerPolicy {
    pub failure_threshold: u32,
    pub base_cooldown: Duration,
    pub max_cooldown: Duration,
}

impl Default for BreakerPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            base_cooldown: Duration::seconds(30),
            max_cooldown: Duration::minutes(30),
        }
    }
}

impl From<&BreakerSettings> for BreakerPolicy {
    fn from(settings: &BreakerSettings) -> Self {
        let base_cooldown = cooldown_from_secs(settings.base_cooldown_secs);
        Self {
            failure_threshold: settings.failure_threshold.max(1),
            base_cooldown,
            max_cooldown: cooldown_from_secs(settings.max_cooldown_secs).max(base_cooldown),
        }
    }
}

/// Seconds clamped to `MAX_COOLDOWN_SECS`
fn cooldown_from_secs(secs: u64) -> Duration {
    let ceiling = Duration::weeks(1);
    i64::try_from(secs.min(MAX_COOLDOWN_SECS))
        .ok()
        .and_then(Duration::try_seconds)
        .map_or(ceiling, |d| d.min(ceiling))
}

/// Persisted breaker fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    #[serde(default)]
    pub opened_at: Option<DateTime<Utc>>,
}

/// Whether a cycle may contact the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Normal cycle
    Allowed,
    /// Single probe after the cooldown
    Probe,
    /// Short-circuited until `retry_at`
    Rejected { retry_at: DateTime<Utc> },
}

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    policy: BreakerPolicy,
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<DateTime<Utc>>,
}

impl CircuitBreaker {
    pub fn new(policy: BreakerPolicy) -> Self {
        Self {
            policy,
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
        }
    }

    /// Rebuild from persisted fields
    ///
    /// An Open snapshot without an opening time cannot compute its cooldown
    /// and is treated as due for a probe.
    pub fn restore(policy: BreakerPolicy, snapshot: BreakerSnapshot) -> Self {
        let state = match (snapshot.state, snapshot.opened_at) {
            (CircuitState::Open, None) => CircuitState::HalfOpen,
            (state, _) => state,
        };
        Self {
            policy,
            state,
            consecutive_failures: snapshot.consecutive_failures,
            opened_at: snapshot.opened_at,
        }
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        BreakerSnapshot {
            state: self.state,
            consecutive_failures: self.consecutive_failures,
            opened_at: self.opened_at,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn policy(&self) -> &BreakerPolicy {
        &self.policy
    }

    /// Current cooldown: base doubled per failure beyond the threshold, capped
    pub fn cooldown(&self) -> Duration {
        let extra = self
            .consecutive_failures
            .saturating_sub(self.policy.failure_threshold)
            .min(20);
        2i32.checked_pow(extra)
            .and_then(|factor| self.policy.base_cooldown.checked_mul(factor))
            .map_or(self.policy.max_cooldown, |d| d.min(self.policy.max_cooldown))
    }

    /// When an Open breaker will admit its probe
    pub fn next_probe_at(&self) -> Option<DateTime<Utc>> {
        match self.state {
            CircuitState::Open => self.opened_at.map(|at| at + self.cooldown()),
            _ => None,
        }
    }

    /// Decide whether a cycle may fetch, moving Open to HalfOpen once due
    pub fn try_acquire(&mut self, now: DateTime<Utc>) -> Admission {
        match self.state {
            CircuitState::Closed => Admission::Allowed,
            CircuitState::HalfOpen => Admission::Probe,
            CircuitState::Open => match self.next_probe_at() {
                Some(retry_at) if now < retry_at => Admission::Rejected { retry_at },
                _ => {
                    self.state = CircuitState::HalfOpen;
                    Admission::Probe
                }
            },
        }
    }

    /// A cycle (or probe) updated at least one service
    pub fn record_success(&mut self) {
        self.state = CircuitState::Closed;
        self.consecutive_failures = 0;
        self.opened_at = None;
    }

    /// A cycle updated nothing
    pub fn record_failure(&mut self, now: DateTime<Utc>) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        match self.state {
            CircuitState::HalfOpen => self.open(now),
            CircuitState::Closed if self.consecutive_failures >= self.policy.failure_threshold => {
                self.open(now)
            }
            _ => {}
        }
    }

    /// Force Closed, e.g. after new credentials were accepted
    pub fn reset(&mut self) {
        self.record_success();
    }

    fn open(&mut self, now: DateTime<Utc>) {
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(BreakerPolicy::default())
    }
}
