//! Bounded error history
//!
//! Every failure the coordinator absorbs is recorded here so it can be
//! surfaced as metadata instead of failing `get_snapshot()`. The history is
//! capped by count and pruned by age when state is persisted.

use chrono::{DateTime, Duration, Utc};
use redboard_types::{ErrorKind, ErrorRecord, ErrorSeverity};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};

/// Default severity for each error kind
pub fn classify(kind: ErrorKind) -> ErrorSeverity {
    match kind {
        ErrorKind::Auth => ErrorSeverity::Critical,
        ErrorKind::BreakerOpen | ErrorKind::Persistence => ErrorSeverity::High,
        ErrorKind::Network | ErrorKind::Validation => ErrorSeverity::Medium,
        ErrorKind::Configuration => ErrorSeverity::Low,
    }
}

#[derive(Debug, Clone)]
pub struct ErrorLog {
    records: VecDeque<ErrorRecord>,
    max_records: usize,
}

impl ErrorLog {
    pub fn new(max_records: usize) -> Self {
        Self {
            records: VecDeque::new(),
            max_records: max_records.max(1),
        }
    }

    /// Rebuild from persisted records, oldest first
    pub fn from_records(records: Vec<ErrorRecord>, max_records: usize) -> Self {
        let mut log = Self::new(max_records);
        for record in records {
            log.push(record);
        }
        log
    }

    pub fn push(&mut self, record: ErrorRecord) {
        if self.records.len() == self.max_records {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    /// Record an error with its default severity
    pub fn record(
        &mut self,
        now: DateTime<Utc>,
        kind: ErrorKind,
        message: impl Into<String>,
        context: Option<String>,
        auto_recovered: bool,
    ) {
        self.push(ErrorRecord {
            timestamp: now,
            kind,
            severity: classify(kind),
            message: message.into(),
            context,
            auto_recovered,
        });
    }

    /// Drop records older than the retention window; returns how many
    pub fn prune(&mut self, now: DateTime<Utc>, retention_days: u32) -> usize {
        let cutoff = now - Duration::days(i64::from(retention_days));
        let before = self.records.len();
        self.records.retain(|r| r.timestamp >= cutoff);
        before - self.records.len()
    }

    pub fn records(&self) -> impl Iterator<Item = &ErrorRecord> {
        self.records.iter()
    }

    pub fn to_vec(&self) -> Vec<ErrorRecord> {
        self.records.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn latest(&self) -> Option<&ErrorRecord> {
        self.records.back()
    }

    pub fn stats(&self, now: DateTime<Utc>) -> ErrorStatistics {
        let day_ago = now - Duration::hours(24);
        let mut stats = ErrorStatistics {
            total: self.records.len(),
            ..Default::default()
        };

        for record in &self.records {
            if record.timestamp >= day_ago {
                stats.last_24h += 1;
            }
            *stats.by_kind.entry(record.kind).or_insert(0) += 1;
            *stats.by_severity.entry(record.severity).or_insert(0) += 1;
            if record.auto_recovered {
                stats.auto_recovered += 1;
            }
        }
        stats.unresolved = stats.total - stats.auto_recovered;
        stats.last_error = self.latest().cloned();
        stats
    }
}

impl Default for ErrorLog {
    fn default() -> Self {
        Self::new(500)
    }
}

/// Aggregated view of the error history
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ErrorStatistics {
    pub total: usize,
    pub last_24h: usize,
    pub by_kind: BTreeMap<ErrorKind, usize>,
    pub by_severity: BTreeMap<ErrorSeverity, usize>,
    pub auto_recovered: usize,
    pub unresolved: usize,
    pub last_error: Option<ErrorRecord>,
}
