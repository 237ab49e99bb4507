//! Refresh coordinator
//!
//! Owns the usage store, circuit breaker, error log and published snapshot
//! of one configuration and drives refresh cycles through them:
//!
//! ```text
//! Idle -> Fetching -> {Updated, PartialFailure, TotalFailure} -> Idle
//!      \-> BreakerOpen (no fetch) ---------------------------/
//! ```
//!
//! At most one cycle runs at a time. A cycle runs in its own task and holds
//! the cycle lock for its whole duration, so every mutation of coordinator
//! state happens on that single writer. Readers only see the published
//! `Arc<Snapshot>`, which is replaced in one swap after a cycle completes.

mod scheduler;

pub use scheduler::SchedulerHandle;

use crate::analytics::{summarize, MetricsCache};
use crate::breaker::{Admission, BreakerPolicy, BreakerSnapshot, CircuitBreaker};
use crate::config::{CoordinatorConfig, Credentials, PollingInterval};
use crate::diagnostics::DiagnosticsReport;
use crate::error::{AuthError, CoreError, DegradedState};
use crate::error_log::{ErrorLog, ErrorStatistics};
use crate::event::{CoordinatorEvent, EventBus};
use crate::export::{export_snapshot, ExportFormat};
use crate::fetch::{Authenticator, BulkFetchProcessor, FetchUnit, Fetcher, MergeResult};
use crate::retry::RetryPolicy;
use crate::state::{CoordinatorState, RestoreSource, RetentionPolicy, StateManager};
use crate::store::UsageStore;
use crate::timing::{Operation, OperationTimings};
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, RwLock};
use redboard_types::{
    CircuitState, CycleOutcome, ErrorKind, PropertySnapshot, ServiceKey, ServiceSnapshot,
    Snapshot,
};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

/// Where the coordinator is in its cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CyclePhase {
    Idle,
    Fetching,
}

/// What a finished cycle did
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    pub outcome: CycleOutcome,
    pub updated: Vec<ServiceKey>,
    /// Services that kept their previous data
    pub stale: Vec<ServiceKey>,
    /// Units that succeeded after at least one retry
    pub recovered: usize,
    pub circuit_state: CircuitState,
    /// Set when the breaker short-circuited the cycle
    pub retry_at: Option<DateTime<Utc>>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Cycle-level failure shared with every coalesced caller
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CycleFailure {
    #[error("credentials rejected: {0}")]
    Auth(String),

    #[error("refresh task aborted: {0}")]
    Aborted(String),
}

impl From<CycleFailure> for CoreError {
    fn from(failure: CycleFailure) -> Self {
        match failure {
            CycleFailure::Auth(message) => CoreError::Auth { message },
            CycleFailure::Aborted(message) => CoreError::CycleAborted { message },
        }
    }
}

type CycleResult = Result<CycleReport, CycleFailure>;
type InFlight = Shared<BoxFuture<'static, CycleResult>>;

/// Point-in-time view of the coordinator, readable without waiting on a cycle
#[derive(Debug, Clone, Serialize)]
pub struct CoordinatorStatus {
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
    pub health: DegradedState,
}

/// Mutable state, touched only while holding the cycle lock
struct CycleState {
    store: UsageStore,
    breaker: CircuitBreaker,
    errors: ErrorLog,
    last_successful_fetch: Option<DateTime<Utc>>,
    last_outcome: Option<CycleOutcome>,
    last_cycle_at: Option<DateTime<Utc>>,
}

/// Copy of the cycle state published for readers
#[derive(Debug, Clone)]
struct StatusView {
    breaker: BreakerSnapshot,
    next_probe_at: Option<DateTime<Utc>>,
    last_outcome: Option<CycleOutcome>,
    last_cycle_at: Option<DateTime<Utc>>,
    last_successful_fetch: Option<DateTime<Utc>>,
    health: DegradedState,
    errors: ErrorLog,
}

pub struct Coordinator {
    config: CoordinatorConfig,
    interval: RwLock<PollingInterval>,
    processor: BulkFetchProcessor,
    auth: Arc<dyn Authenticator>,
    state_manager: Arc<StateManager>,
    retention: RetentionPolicy,
    metrics: MetricsCache,
    timings: OperationTimings,
    events: EventBus,

    published: RwLock<Arc<Snapshot>>,
    status: RwLock<StatusView>,
    phase: RwLock<CyclePhase>,
    credentials_stale: AtomicBool,

    cycle: tokio::sync::Mutex<CycleState>,
    in_flight: Mutex<Option<InFlight>>,
    last_cycle_started: Mutex<Option<tokio::time::Instant>>,
    reschedule: Notify,
}

impl Coordinator {
    /// Build a coordinator and restore its persisted state
    ///
    /// No fetch happens here; the snapshot served until the first cycle is
    /// the restored one.
    pub fn new(
        config: CoordinatorConfig,
        fetcher: Arc<dyn Fetcher>,
        auth: Arc<dyn Authenticator>,
        state_manager: Arc<StateManager>,
    ) -> Result<Arc<Self>, CoreError> {
        config.validate()?;

        let restored = state_manager.restore(&config.config_id);
        let state = restored.state;
        let interval = match restored.source {
            RestoreSource::Current | RestoreSource::Migrated { .. } => state.polling_interval,
            RestoreSource::Absent | RestoreSource::Discarded => config.polling_interval,
        };

        let policy = BreakerPolicy::from(&config.breaker);
        let breaker = CircuitBreaker::restore(policy, state.breaker);
        let errors = ErrorLog::from_records(state.errors, config.max_error_records);

        let configured: HashSet<ServiceKey> = config
            .properties
            .iter()
            .flat_map(|p| p.active_service_keys().map(|(key, _)| key))
            .collect();
        let mut store = UsageStore::from_snapshot(&state.snapshot);
        let dropped = store.retain_services(&configured);
        if dropped > 0 {
            debug!(config_id = %config.config_id, dropped, "Dropped unconfigured services");
        }
        let restored_store = store.clone();

        let processor = BulkFetchProcessor::new(
            fetcher,
            RetryPolicy::from(&config.fetch),
            config.fetch.max_workers,
        );

        let coordinator = Self {
            retention: RetentionPolicy::from(&config),
            interval: RwLock::new(interval),
            processor,
            auth,
            state_manager,
            metrics: MetricsCache::default(),
            timings: OperationTimings::default(),
            events: EventBus::default(),
            published: RwLock::new(Arc::new(Snapshot::empty())),
            status: RwLock::new(StatusView {
                breaker: breaker.snapshot(),
                next_probe_at: breaker.next_probe_at(),
                last_outcome: None,
                last_cycle_at: None,
                last_successful_fetch: state.last_successful_fetch,
                health: DegradedState::Healthy,
                errors: errors.clone(),
            }),
            phase: RwLock::new(CyclePhase::Idle),
            credentials_stale: AtomicBool::new(true),
            cycle: tokio::sync::Mutex::new(CycleState {
                store,
                breaker,
                errors,
                last_successful_fetch: state.last_successful_fetch,
                last_outcome: None,
                last_cycle_at: None,
            }),
            in_flight: Mutex::new(None),
            last_cycle_started: Mutex::new(None),
            reschedule: Notify::new(),
            config,
        };

        let snapshot = coordinator.build_snapshot(
            &state.snapshot,
            &restored_store,
            &HashSet::new(),
            &HashSet::new(),
            state.last_successful_fetch,
        );
        let health = if snapshot.is_degraded() {
            DegradedState::PartialData {
                stale: keys_to_strings(&snapshot.degraded_services()),
                reason: "restored with stale services".to_string(),
            }
        } else {
            DegradedState::Healthy
        };
        coordinator.status.write().health = health;
        *coordinator.published.write() = Arc::new(snapshot);

        info!(
            config_id = %coordinator.config.config_id,
            source = ?restored.source,
            interval = %interval,
            circuit = %coordinator.status.read().breaker.state,
            "Coordinator restored"
        );
        Ok(Arc::new(coordinator))
    }

    pub fn config_id(&self) -> &str {
        &self.config.config_id
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn polling_interval(&self) -> PollingInterval {
        *self.interval.read()
    }

    pub fn phase(&self) -> CyclePhase {
        *self.phase.read()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.events.subscribe()
    }

    pub fn metrics_cache(&self) -> &MetricsCache {
        &self.metrics
    }

    pub fn timings(&self) -> &OperationTimings {
        &self.timings
    }

    /// Most recent published snapshot; never waits on a cycle
    pub fn get_snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.published.read())
    }

    pub fn health(&self) -> DegradedState {
        self.status.read().health.clone()
    }

    pub fn status(&self) -> CoordinatorStatus {
        let view = self.status.read();
        CoordinatorStatus {
            config_id: self.config.config_id.clone(),
            phase: self.phase(),
            polling_interval: self.polling_interval(),
            circuit_state: view.breaker.state,
            consecutive_failures: view.breaker.consecutive_failures,
            next_probe_at: view.next_probe_at,
            last_outcome: view.last_outcome,
            last_cycle_at: view.last_cycle_at,
            last_successful_fetch: view.last_successful_fetch,
            credentials_stale: self.credentials_stale.load(Ordering::SeqCst),
            health: view.health.clone(),
        }
    }

    pub fn error_statistics(&self) -> ErrorStatistics {
        self.status.read().errors.stats(Utc::now())
    }

    pub fn diagnostics(&self) -> DiagnosticsReport {
        DiagnosticsReport::collect(self)
    }

    /// Serialize the trailing `days` of the current snapshot
    pub fn export(&self, format: ExportFormat, days: u32) -> Result<String, CoreError> {
        export_snapshot(&self.get_snapshot(), format, days, Utc::now())
    }

    /// Change the polling cadence
    ///
    /// Applies from the next tick; a cycle in progress is not interrupted.
    pub async fn configure(&self, minutes: u32) -> Result<PollingInterval, CoreError> {
        let interval = PollingInterval::from_minutes(minutes)?;
        let previous = std::mem::replace(&mut *self.interval.write(), interval);
        if previous == interval {
            return Ok(interval);
        }

        info!(config_id = %self.config.config_id, from = %previous, to = %interval, "Polling interval changed");
        self.events.publish(CoordinatorEvent::IntervalChanged {
            config_id: self.config.config_id.clone(),
            interval,
        });
        self.reschedule.notify_one();

        // A running cycle persists the new interval when it finishes
        if let Ok(mut cycle) = self.cycle.try_lock() {
            self.persist(&mut cycle).await;
        }
        Ok(interval)
    }

    /// Hand new credentials to the authenticator and reset the breaker
    pub async fn update_credentials(&self, credentials: Credentials) -> Result<(), CoreError> {
        let result = self.auth.update_credentials(credentials).await;
        let mut cycle = self.cycle.lock().await;

        if let Err(e) = result {
            warn!(config_id = %self.config.config_id, error = %e, "Credentials rejected");
            cycle
                .errors
                .record(Utc::now(), ErrorKind::Auth, e.to_string(), None, false);
            self.publish_status(&cycle, None);
            return Err(e.into());
        }

        let before = cycle.breaker.state();
        cycle.breaker.reset();
        self.credentials_stale.store(true, Ordering::SeqCst);
        self.breaker_transition(before, cycle.breaker.state());
        info!(config_id = %self.config.config_id, "Credentials updated");
        self.events.publish(CoordinatorEvent::CredentialsUpdated {
            config_id: self.config.config_id.clone(),
        });

        self.publish_status(&cycle, None);
        self.persist(&mut cycle).await;
        Ok(())
    }

    /// Run a refresh cycle, or join the one already running
    pub async fn run_cycle(self: &Arc<Self>) -> Result<CycleReport, CoreError> {
        self.start_cycle().await.map_err(CoreError::from)
    }

    /// Explicit refresh: runs a cycle and pushes back the next scheduled tick
    pub async fn trigger_refresh(self: &Arc<Self>) -> Result<CycleOutcome, CoreError> {
        let cycle = self.start_cycle();
        self.reschedule.notify_one();
        cycle
            .await
            .map(|report| report.outcome)
            .map_err(CoreError::from)
    }

    pub fn spawn_scheduler(self: &Arc<Self>) -> SchedulerHandle {
        scheduler::spawn(Arc::clone(self))
    }

    fn start_cycle(self: &Arc<Self>) -> InFlight {
        let mut in_flight = self.in_flight.lock();
        if let Some(existing) = in_flight.as_ref() {
            debug!(config_id = %self.config.config_id, "Joining in-flight cycle");
            return existing.clone();
        }

        *self.last_cycle_started.lock() = Some(tokio::time::Instant::now());

        let this = Arc::clone(self);
        let task = tokio::spawn(async move {
            let _guard = InFlightGuard(Arc::clone(&this));
            let started = tokio::time::Instant::now();
            let result = this.execute_cycle().await;
            this.timings.record(Operation::Cycle, started.elapsed());
            result
        });
        let shared = async move {
            match task.await {
                Ok(result) => result,
                Err(e) => Err(CycleFailure::Aborted(e.to_string())),
            }
        }
        .boxed()
        .shared();

        *in_flight = Some(shared.clone());
        shared
    }

    async fn execute_cycle(&self) -> CycleResult {
        let config_id = self.config.config_id.as_str();
        let mut cycle = self.cycle.lock().await;
        let started_at = Utc::now();

        let before = cycle.breaker.state();
        match cycle.breaker.try_acquire(started_at) {
            Admission::Rejected { retry_at } => {
                warn!(config_id, %retry_at, "Circuit breaker open, serving cached snapshot");
                cycle.errors.record(
                    started_at,
                    ErrorKind::BreakerOpen,
                    format!("fetch skipped, breaker open until {}", retry_at),
                    None,
                    false,
                );
                let health = DegradedState::Stale {
                    reason: format!("circuit breaker open until {}", retry_at),
                };
                let report = self.report(
                    &cycle,
                    CycleOutcome::BreakerOpen,
                    Vec::new(),
                    Vec::new(),
                    0,
                    Some(retry_at),
                    started_at,
                );
                return Ok(self.finish(&mut cycle, report, Some(health)).await);
            }
            Admission::Probe => {
                info!(config_id, "Circuit breaker half-open, probing provider");
                self.breaker_transition(before, cycle.breaker.state());
            }
            Admission::Allowed => {}
        }

        self.set_phase(CyclePhase::Fetching);
        self.events.publish(CoordinatorEvent::CycleStarted {
            config_id: config_id.to_string(),
        });

        if self.credentials_stale.load(Ordering::SeqCst) {
            match self.auth.ensure_valid().await {
                Ok(session) => {
                    debug!(config_id, subject = %session.subject, "Session valid");
                    self.credentials_stale.store(false, Ordering::SeqCst);
                }
                Err(AuthError::Rejected(message)) => {
                    return self.halt_on_auth(&mut cycle, message).await;
                }
                Err(AuthError::Unavailable(message)) => {
                    warn!(config_id, error = %message, "Authentication service unavailable");
                    return Ok(self
                        .total_failure(&mut cycle, &MergeResult::default(), message, started_at)
                        .await);
                }
            }
        }

        let units = self.fetch_units();
        let today = started_at.date_naive();
        let fetch_started = tokio::time::Instant::now();
        let merge = self.processor.run(units, today).await;
        self.timings.record(Operation::Fetch, fetch_started.elapsed());

        if let Some(failure) = merge.auth_failure() {
            let message = failure.error.to_string();
            return self.halt_on_auth(&mut cycle, message).await;
        }

        let finished_at = Utc::now();
        for failure in merge.failures() {
            cycle.errors.record(
                finished_at,
                failure.error.kind(),
                failure.error.to_string(),
                Some(failure.key.to_string()),
                false,
            );
        }
        for recovered in &merge.recovered {
            cycle.errors.record(
                finished_at,
                ErrorKind::Network,
                format!(
                    "recovered after {} attempts: {}",
                    recovered.attempts, recovered.error
                ),
                Some(recovered.key.to_string()),
                true,
            );
        }

        match merge.outcome() {
            CycleOutcome::TotalFailure => {
                let reason = merge
                    .failures()
                    .next()
                    .map(|f| f.error.to_string())
                    .unwrap_or_else(|| "no service updated".to_string());
                Ok(self
                    .total_failure(&mut cycle, &merge, reason, started_at)
                    .await)
            }
            outcome => Ok(self
                .apply_success(&mut cycle, merge, outcome, started_at, finished_at)
                .await),
        }
    }

    /// Merge fetched series and publish a new snapshot
    async fn apply_success(
        &self,
        cycle: &mut CycleState,
        merge: MergeResult,
        outcome: CycleOutcome,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) -> CycleReport {
        let updated: HashSet<ServiceKey> = merge.updated.iter().map(|(k, _)| k.clone()).collect();
        let stale: HashSet<ServiceKey> = merge.stale_keys().cloned().collect();

        let mut store = cycle.store.clone();
        for (key, series) in &merge.updated {
            store.merge(key.clone(), series);
        }
        let pruned = store.retain_window(finished_at.date_naive(), self.config.window_days);
        if pruned > 0 {
            debug!(config_id = %self.config.config_id, pruned, "Pruned records outside window");
        }

        let previous = self.get_snapshot();
        let snapshot =
            self.build_snapshot(&previous, &store, &updated, &stale, Some(finished_at));
        *self.published.write() = Arc::new(snapshot);
        cycle.store = store;
        cycle.last_successful_fetch = Some(finished_at);

        let before = cycle.breaker.state();
        cycle.breaker.record_success();
        self.breaker_transition(before, cycle.breaker.state());

        let mut stale_keys: Vec<ServiceKey> = stale.into_iter().collect();
        stale_keys.sort();
        let health = if stale_keys.is_empty() {
            DegradedState::Healthy
        } else {
            DegradedState::PartialData {
                stale: keys_to_strings(&stale_keys),
                reason: merge
                    .failures()
                    .next()
                    .map(|f| f.error.to_string())
                    .unwrap_or_default(),
            }
        };

        let mut updated_keys: Vec<ServiceKey> = updated.into_iter().collect();
        updated_keys.sort();
        let report = self.report(
            cycle,
            outcome,
            updated_keys,
            stale_keys,
            merge.recovered.len(),
            None,
            started_at,
        );
        self.finish(cycle, report, Some(health)).await
    }

    /// Nothing updated: keep the published snapshot, count a breaker failure
    async fn total_failure(
        &self,
        cycle: &mut CycleState,
        merge: &MergeResult,
        reason: String,
        started_at: DateTime<Utc>,
    ) -> CycleReport {
        let now = Utc::now();
        if merge.attempted() == 0 {
            cycle
                .errors
                .record(now, ErrorKind::Network, reason.clone(), None, false);
        }

        let before = cycle.breaker.state();
        cycle.breaker.record_failure(now);
        let after = cycle.breaker.state();
        self.breaker_transition(before, after);
        warn!(
            config_id = %self.config.config_id,
            failures = cycle.breaker.consecutive_failures(),
            state = %after,
            "Refresh cycle failed for every service"
        );

        let mut stale: Vec<ServiceKey> = merge.stale_keys().cloned().collect();
        stale.sort();
        let report = self.report(
            cycle,
            CycleOutcome::TotalFailure,
            Vec::new(),
            stale,
            merge.recovered.len(),
            None,
            started_at,
        );
        self.finish(cycle, report, Some(DegradedState::Stale { reason }))
            .await
    }

    /// Credentials were rejected: stop, invalidate the session, leave the breaker alone
    async fn halt_on_auth(&self, cycle: &mut CycleState, message: String) -> CycleResult {
        error!(config_id = %self.config.config_id, error = %message, "Credentials rejected, cycle halted");
        self.auth.invalidate().await;
        self.credentials_stale.store(true, Ordering::SeqCst);

        let now = Utc::now();
        cycle
            .errors
            .record(now, ErrorKind::Auth, message.clone(), None, false);
        cycle.last_cycle_at = Some(now);
        self.events.publish(CoordinatorEvent::AuthFailed {
            config_id: self.config.config_id.clone(),
            message: message.clone(),
        });

        self.publish_status(
            cycle,
            Some(DegradedState::Stale {
                reason: format!("credentials rejected: {}", message),
            }),
        );
        self.set_phase(CyclePhase::Idle);
        self.persist(cycle).await;
        Err(CycleFailure::Auth(message))
    }

    async fn finish(
        &self,
        cycle: &mut CycleState,
        report: CycleReport,
        health: Option<DegradedState>,
    ) -> CycleReport {
        cycle.last_outcome = Some(report.outcome);
        cycle.last_cycle_at = Some(report.finished_at);
        self.publish_status(cycle, health);
        self.set_phase(CyclePhase::Idle);

        info!(
            config_id = %self.config.config_id,
            outcome = %report.outcome,
            updated = report.updated.len(),
            stale = report.stale.len(),
            state = %report.circuit_state,
            "Refresh cycle finished"
        );
        self.events.publish(CoordinatorEvent::SnapshotPublished {
            config_id: self.config.config_id.clone(),
            outcome: report.outcome,
        });

        self.persist(cycle).await;
        report
    }

    #[allow(clippy::too_many_arguments)]
    fn report(
        &self,
        cycle: &CycleState,
        outcome: CycleOutcome,
        updated: Vec<ServiceKey>,
        stale: Vec<ServiceKey>,
        recovered: usize,
        retry_at: Option<DateTime<Utc>>,
        started_at: DateTime<Utc>,
    ) -> CycleReport {
        CycleReport {
            outcome,
            updated,
            stale,
            recovered,
            circuit_state: cycle.breaker.state(),
            retry_at,
            started_at,
            finished_at: Utc::now(),
        }
    }

    fn publish_status(&self, cycle: &CycleState, health: Option<DegradedState>) {
        let mut view = self.status.write();
        view.breaker = cycle.breaker.snapshot();
        view.next_probe_at = cycle.breaker.next_probe_at();
        view.last_outcome = cycle.last_outcome;
        view.last_cycle_at = cycle.last_cycle_at;
        view.last_successful_fetch = cycle.last_successful_fetch;
        view.errors = cycle.errors.clone();
        if let Some(health) = health {
            view.health = health;
        }
    }

    /// Write the current state; failures are logged, never propagated
    async fn persist(&self, cycle: &mut CycleState) {
        let now = Utc::now();
        cycle.errors.prune(now, self.retention.error_retention_days);

        let state = CoordinatorState {
            config_id: self.config.config_id.clone(),
            polling_interval: self.polling_interval(),
            breaker: cycle.breaker.snapshot(),
            last_successful_fetch: cycle.last_successful_fetch,
            snapshot: self.get_snapshot().as_ref().clone(),
            errors: cycle.errors.to_vec(),
        };
        let manager = Arc::clone(&self.state_manager);
        let policy = self.retention;

        let started = tokio::time::Instant::now();
        let result = tokio::task::spawn_blocking(move || manager.persist(&state, policy, now)).await;
        self.timings.record(Operation::Persist, started.elapsed());

        let message = match result {
            Ok(Ok(_)) => return,
            Ok(Err(e)) => format!("{:#}", e),
            Err(e) => e.to_string(),
        };

        warn!(config_id = %self.config.config_id, error = %message, "Failed to persist state");
        cycle
            .errors
            .record(now, ErrorKind::Persistence, message, None, false);
        self.status.write().errors = cycle.errors.clone();
    }

    fn fetch_units(&self) -> Vec<FetchUnit> {
        self.config
            .properties
            .iter()
            .flat_map(|p| p.active_service_keys())
            .map(|(key, kind)| FetchUnit { key, kind })
            .collect()
    }

    /// Property -> service tree for every configured active service
    ///
    /// Updated services take their merged series and fresh metrics. The
    /// rest keep their previous entry, flagged degraded when `stale`.
    fn build_snapshot(
        &self,
        previous: &Snapshot,
        store: &UsageStore,
        updated: &HashSet<ServiceKey>,
        stale: &HashSet<ServiceKey>,
        last_successful_fetch: Option<DateTime<Utc>>,
    ) -> Snapshot {
        let now = Utc::now();
        let mut properties = BTreeMap::new();

        for property in &self.config.properties {
            let mut services = BTreeMap::new();
            for (key, kind) in property.active_service_keys() {
                let series = store.get(&key).cloned().unwrap_or_default();
                let mut service = previous
                    .service(&key)
                    .filter(|s| s.kind == kind)
                    .cloned()
                    .unwrap_or_else(|| ServiceSnapshot::empty(kind, &key.consumer_id));

                if updated.contains(&key) {
                    service.degraded = false;
                    service.last_updated = Some(now);
                } else if stale.contains(&key) {
                    service.degraded = true;
                }

                if updated.contains(&key) || service.series != series {
                    service.metrics = self.metrics.get_or_compute(&key, &series);
                    service.summary = summarize(&series);
                    service.series = series;
                }
                services.insert(key.consumer_id.clone(), service);
            }

            properties.insert(
                property.id.clone(),
                PropertySnapshot {
                    id: property.id.clone(),
                    name: property.name.clone(),
                    address: property.address.clone(),
                    services,
                },
            );
        }

        Snapshot {
            properties,
            last_successful_fetch,
        }
    }

    fn set_phase(&self, phase: CyclePhase) {
        *self.phase.write() = phase;
    }

    fn breaker_transition(&self, before: CircuitState, after: CircuitState) {
        if before == after {
            return;
        }
        info!(config_id = %self.config.config_id, from = %before, to = %after, "Circuit breaker state changed");
        self.events.publish(CoordinatorEvent::BreakerStateChanged {
            config_id: self.config.config_id.clone(),
            state: after,
        });
    }
}

/// Clears the in-flight slot when the cycle task ends, even on panic
struct InFlightGuard(Arc<Coordinator>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        *self.0.in_flight.lock() = None;
    }
}

fn keys_to_strings(keys: &[ServiceKey]) -> Vec<String> {
    keys.iter().map(ToString::to_string).collect()
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("config_id", &self.config.config_id)
            .field("interval", &self.polling_interval())
            .field("phase", &self.phase())
            .finish()
    }
}
