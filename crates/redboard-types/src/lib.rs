//! redboard-types - Shared data types for redboard
//!
//! This crate contains pure data structures without heavy dependencies.
//! No tokio, no async runtime - just serde-serializable types.
//!
//! Used by:
//! - redboard-core (coordination and analytics engine)
//! - redboard (CLI)

pub mod models;

pub use models::{
    CircuitState, CycleOutcome, DerivedMetrics, ErrorKind, ErrorRecord, ErrorSeverity,
    MetricKind, MetricReading, MetricValues, Peak, Property, PropertySnapshot, Service,
    ServiceKey, ServiceKind, ServiceSnapshot, Snapshot, UsageRecord, UsageSeries, UsageSummary,
    VariationClass,
};
