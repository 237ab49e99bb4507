//! redboard-core - Usage coordination and analytics engine
//!
//! Polls per-service energy usage through injected collaborators, derives
//! metrics, and serves a restart-safe snapshot that survives partial
//! outages.

pub mod analytics;
pub mod breaker;
pub mod config;
pub mod coordinator;
pub mod diagnostics;
pub mod error;
pub mod error_log;
pub mod event;
pub mod export;
pub mod fetch;
pub mod registry;
pub mod retry;
pub mod state;
pub mod store;
pub mod timing;

pub use analytics::{compute_metrics, summarize, MetricsCache};
pub use breaker::{BreakerPolicy, CircuitBreaker};
pub use config::{CoordinatorConfig, Credentials, PollingInterval};
pub use coordinator::{
    Coordinator, CoordinatorStatus, CycleFailure, CyclePhase, CycleReport, SchedulerHandle,
};
pub use diagnostics::DiagnosticsReport;
pub use error::{AuthError, CoreError, DegradedState, FetchError, UnitError};
pub use error_log::{ErrorLog, ErrorStatistics};
pub use event::CoordinatorEvent;
pub use export::{export_snapshot, write_export, ExportFormat};
pub use fetch::{Authenticator, BulkFetchProcessor, Fetcher, FixtureFetcher, StaticAuthenticator};
pub use registry::CoordinatorRegistry;
pub use state::{CoordinatorState, StateManager};
pub use store::UsageStore;
pub use timing::{Operation, OperationTimings, TimingStats};
