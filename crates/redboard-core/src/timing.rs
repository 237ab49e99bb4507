//! Per-operation timing statistics

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::warn;

/// Operations above this duration are logged as slow
pub const SLOW_OPERATION: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// A whole refresh cycle, breaker check to publish
    Cycle,
    /// The bulk fetch of all services
    Fetch,
    /// Writing coordinator state to disk
    Persist,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Cycle => "cycle",
            Operation::Fetch => "fetch",
            Operation::Persist => "persist",
        }
    }
}

/// Durations in milliseconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TimingStats {
    pub count: u64,
    pub last_ms: f64,
    pub avg_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
}

impl TimingStats {
    fn add(&mut self, ms: f64) {
        self.min_ms = if self.count == 0 { ms } else { self.min_ms.min(ms) };
        self.max_ms = self.max_ms.max(ms);
        self.avg_ms = (self.avg_ms * self.count as f64 + ms) / (self.count + 1) as f64;
        self.count += 1;
        self.last_ms = ms;
    }
}

#[derive(Debug, Default)]
pub struct OperationTimings {
    stats: Mutex<BTreeMap<Operation, TimingStats>>,
}

impl OperationTimings {
    pub fn record(&self, operation: Operation, elapsed: Duration) {
        if elapsed > SLOW_OPERATION {
            warn!(
                operation = operation.as_str(),
                secs = elapsed.as_secs_f64(),
                "Slow operation"
            );
        }
        self.stats
            .lock()
            .entry(operation)
            .or_default()
            .add(elapsed.as_secs_f64() * 1000.0);
    }

    pub fn get(&self, operation: Operation) -> Option<TimingStats> {
        self.stats.lock().get(&operation).copied()
    }

    pub fn snapshot(&self) -> BTreeMap<Operation, TimingStats> {
        self.stats.lock().clone()
    }
}
