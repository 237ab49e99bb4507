//! Diagnostics report for support and troubleshooting
//!
//! Safe to share: consumer identifiers are reduced to their length, error
//! messages are left out and no raw usage records are included.

use crate::config::PollingInterval;
use crate::coordinator::{Coordinator, CoordinatorStatus, CyclePhase};
use crate::error::DegradedState;
use crate::error_log::ErrorStatistics;
use crate::timing::{Operation, TimingStats};
use chrono::{DateTime, NaiveDate, Utc};
use redboard_types::{
    CircuitState, CycleOutcome, ErrorKind, ErrorRecord, ErrorSeverity, ServiceKind, Snapshot,
    UsageSeries, VariationClass,
};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticsReport {
    pub generated_at: DateTime<Utc>,
    pub coordinator: StatusDiagnostics,
    pub errors: ErrorDiagnostics,
    pub services: Vec<ServiceDiagnostics>,
    /// (hits, misses) of the metrics memo cache
    pub metrics_cache: (u64, u64),
    pub timings: BTreeMap<Operation, TimingStats>,
}

/// A service named by its property and the length of its consumer id
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceRef {
    pub property_id: String,
    pub consumer_id_length: usize,
}

impl ServiceRef {
    /// Parse a `property/consumer` key as written into status and error context
    fn from_key(key: &str) -> Option<Self> {
        let (property_id, consumer_id) = key.split_once('/')?;
        Some(Self {
            property_id: property_id.to_string(),
            consumer_id_length: consumer_id.chars().count(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusDiagnostics {
    pub config_id: String,
    pub phase: CyclePhase,
    pub polling_interval: PollingInterval,
    pub circuit_state: CircuitState,
    pub consecutive_failures: u32,
    pub next_probe_at: Option<DateTime<Utc>>,
    pub last_outcome: Option<CycleOutcome>,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub last_successful_fetch: Option<DateTime<Utc>>,
    pub credentials_stale: bool,
    /// healthy, partial_data or stale
    pub health: &'static str,
    pub stale_services: Vec<ServiceRef>,
}

impl From<CoordinatorStatus> for StatusDiagnostics {
    fn from(status: CoordinatorStatus) -> Self {
        let (health, stale_services) = match &status.health {
            DegradedState::Healthy => ("healthy", Vec::new()),
            DegradedState::PartialData { stale, .. } => (
                "partial_data",
                stale.iter().filter_map(|k| ServiceRef::from_key(k)).collect(),
            ),
            DegradedState::Stale { .. } => ("stale", Vec::new()),
        };
        Self {
            config_id: status.config_id,
            phase: status.phase,
            polling_interval: status.polling_interval,
            circuit_state: status.circuit_state,
            consecutive_failures: status.consecutive_failures,
            next_probe_at: status.next_probe_at,
            last_outcome: status.last_outcome,
            last_cycle_at: status.last_cycle_at,
            last_successful_fetch: status.last_successful_fetch,
            credentials_stale: status.credentials_stale,
            health,
            stale_services,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ErrorDiagnostics {
    pub total: usize,
    pub last_24h: usize,
    pub by_kind: BTreeMap<ErrorKind, usize>,
    pub by_severity: BTreeMap<ErrorSeverity, usize>,
    pub auto_recovered: usize,
    pub unresolved: usize,
    pub last_error: Option<ErrorSummary>,
}

/// An error record without its message
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorSummary {
    pub timestamp: DateTime<Utc>,
    pub kind: ErrorKind,
    pub severity: ErrorSeverity,
    pub auto_recovered: bool,
    pub service: Option<ServiceRef>,
}

impl From<&ErrorRecord> for ErrorSummary {
    fn from(record: &ErrorRecord) -> Self {
        Self {
            timestamp: record.timestamp,
            kind: record.kind,
            severity: record.severity,
            auto_recovered: record.auto_recovered,
            service: record.context.as_deref().and_then(ServiceRef::from_key),
        }
    }
}

impl From<ErrorStatistics> for ErrorDiagnostics {
    fn from(stats: ErrorStatistics) -> Self {
        Self {
            total: stats.total,
            last_24h: stats.last_24h,
            by_kind: stats.by_kind,
            by_severity: stats.by_severity,
            auto_recovered: stats.auto_recovered,
            unresolved: stats.unresolved,
            last_error: stats.last_error.as_ref().map(ErrorSummary::from),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceDiagnostics {
    pub property_id: String,
    pub kind: ServiceKind,
    pub consumer_id_length: usize,
    pub entries: usize,
    pub first_date: Option<NaiveDate>,
    pub last_date: Option<NaiveDate>,
    pub usage: Option<RangeStats>,
    pub cost: Option<RangeStats>,
    pub degraded: bool,
    pub metrics_computed: bool,
    pub variation: Option<VariationClass>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RangeStats {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
}

impl RangeStats {
    fn of(values: impl Iterator<Item = f64>) -> Option<Self> {
        let mut count = 0usize;
        let mut sum = 0.0;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for v in values {
            count += 1;
            sum += v;
            min = min.min(v);
            max = max.max(v);
        }
        (count > 0).then(|| RangeStats {
            min,
            max,
            avg: sum / count as f64,
        })
    }
}

impl DiagnosticsReport {
    pub fn collect(coordinator: &Coordinator) -> Self {
        Self {
            generated_at: Utc::now(),
            coordinator: coordinator.status().into(),
            errors: coordinator.error_statistics().into(),
            services: service_diagnostics(&coordinator.get_snapshot()),
            metrics_cache: coordinator.metrics_cache().stats(),
            timings: coordinator.timings().snapshot(),
        }
    }
}

/// Sanitized per-service summary of a snapshot
pub fn service_diagnostics(snapshot: &Snapshot) -> Vec<ServiceDiagnostics> {
    snapshot
        .services()
        .map(|(key, service)| {
            let series: &UsageSeries = &service.series;
            ServiceDiagnostics {
                property_id: key.property_id,
                kind: service.kind,
                consumer_id_length: service.consumer_id.chars().count(),
                entries: series.len(),
                first_date: series.first().map(|r| r.date),
                last_date: series.last().map(|r| r.date),
                usage: RangeStats::of(series.iter().map(|r| r.usage)),
                cost: RangeStats::of(series.iter().map(|r| r.cost)),
                degraded: service.degraded,
                metrics_computed: service.metrics.is_computed(),
                variation: service.metrics.values().map(|v| v.variation_class),
            }
        })
        .collect()
}
