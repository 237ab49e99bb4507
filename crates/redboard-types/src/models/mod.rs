//! Data models shared by the redboard engine and its consumers

pub mod metrics;
pub mod property;
pub mod snapshot;
pub mod status;
pub mod usage;

pub use metrics::{
    DerivedMetrics, MetricKind, MetricReading, MetricValues, Peak, UsageSummary, VariationClass,
};
pub use property::{Property, Service, ServiceKey, ServiceKind};
pub use snapshot::{PropertySnapshot, ServiceSnapshot, Snapshot};
pub use status::{CircuitState, CycleOutcome, ErrorKind, ErrorRecord, ErrorSeverity};
pub use usage::{UsageRecord, UsageSeries};
