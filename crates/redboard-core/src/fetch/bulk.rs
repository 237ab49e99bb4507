//! Bulk fetch processor
//!
//! Fetches every configured (property, service) pair with a bounded worker
//! pool. Each unit runs in its own task with its own timeout and retry
//! schedule and returns a typed result; the caller merges them. A failing
//! unit never aborts its siblings.

use super::validation::validate_series;
use super::Fetcher;
use crate::error::UnitError;
use crate::retry::RetryPolicy;
use chrono::NaiveDate;
use redboard_types::{CycleOutcome, ServiceKey, ServiceKind, UsageSeries};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Default upper bound of concurrent fetches
pub const DEFAULT_MAX_WORKERS: usize = 5;

/// One unit of work
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchUnit {
    pub key: ServiceKey,
    pub kind: ServiceKind,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnitFailure {
    pub key: ServiceKey,
    pub error: UnitError,
    /// Attempts made before giving up (or before succeeding, for recoveries)
    pub attempts: usize,
}

/// Outcome of one unit after its retry schedule
#[derive(Debug)]
enum UnitResult {
    Updated {
        key: ServiceKey,
        series: UsageSeries,
        attempts: usize,
        recovered_from: Option<UnitError>,
    },
    Failed(UnitFailure),
}

/// Merged results of a batch
#[derive(Debug, Clone, Default)]
pub struct MergeResult {
    pub updated: Vec<(ServiceKey, UsageSeries)>,
    /// Timeouts, exhausted network retries, rejected credentials
    pub failed: Vec<UnitFailure>,
    /// Malformed or out-of-range payloads
    pub validation_errors: Vec<UnitFailure>,
    /// Units that failed at least once and then succeeded
    pub recovered: Vec<UnitFailure>,
}

impl MergeResult {
    pub fn attempted(&self) -> usize {
        self.updated.len() + self.failed.len() + self.validation_errors.len()
    }

    /// Updated iff every unit succeeded; TotalFailure iff none did
    ///
    /// An empty batch has nothing to fail and counts as Updated.
    pub fn outcome(&self) -> CycleOutcome {
        if self.attempted() == 0 {
            CycleOutcome::Updated
        } else if self.updated.is_empty() {
            CycleOutcome::TotalFailure
        } else if self.failed.is_empty() && self.validation_errors.is_empty() {
            CycleOutcome::Updated
        } else {
            CycleOutcome::PartialFailure
        }
    }

    /// First unit whose credentials were rejected
    pub fn auth_failure(&self) -> Option<&UnitFailure> {
        self.failed
            .iter()
            .find(|f| matches!(f.error, UnitError::Auth(_)))
    }

    /// Units whose data stays stale this cycle
    pub fn stale_keys(&self) -> impl Iterator<Item = &ServiceKey> {
        self.failed
            .iter()
            .chain(self.validation_errors.iter())
            .map(|f| &f.key)
    }

    pub fn failures(&self) -> impl Iterator<Item = &UnitFailure> {
        self.failed.iter().chain(self.validation_errors.iter())
    }

    fn record(&mut self, result: UnitResult) {
        match result {
            UnitResult::Updated {
                key,
                series,
                attempts,
                recovered_from,
            } => {
                if let Some(error) = recovered_from {
                    self.recovered.push(UnitFailure {
                        key: key.clone(),
                        error,
                        attempts,
                    });
                }
                self.updated.push((key, series));
            }
            UnitResult::Failed(failure) => match failure.error {
                UnitError::Validation(_) => self.validation_errors.push(failure),
                _ => self.failed.push(failure),
            },
        }
    }
}

pub struct BulkFetchProcessor {
    fetcher: Arc<dyn Fetcher>,
    retry: RetryPolicy,
    max_workers: usize,
}

impl BulkFetchProcessor {
    pub fn new(fetcher: Arc<dyn Fetcher>, retry: RetryPolicy, max_workers: usize) -> Self {
        Self {
            fetcher,
            retry,
            max_workers: max_workers.max(1),
        }
    }

    pub fn with_defaults(fetcher: Arc<dyn Fetcher>) -> Self {
        Self::new(fetcher, RetryPolicy::default(), DEFAULT_MAX_WORKERS)
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Pool size for a batch: min(units, max_workers)
    pub fn pool_size(&self, units: usize) -> usize {
        units.min(self.max_workers).max(1)
    }

    /// Fetch and validate every unit; `today` bounds acceptable record dates
    pub async fn run(&self, units: Vec<FetchUnit>, today: NaiveDate) -> MergeResult {
        let mut merge = MergeResult::default();
        if units.is_empty() {
            return merge;
        }

        // Use semaphore for bounded concurrency
        let semaphore = Arc::new(Semaphore::new(self.pool_size(units.len())));
        let mut handles = Vec::with_capacity(units.len());

        for unit in units {
            let sem = Arc::clone(&semaphore);
            let fetcher = Arc::clone(&self.fetcher);
            let retry = self.retry.clone();
            let key = unit.key.clone();

            let handle = tokio::spawn(async move {
                let _permit = match sem.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return UnitResult::Failed(UnitFailure {
                            key: unit.key,
                            error: UnitError::Network("worker pool closed".to_string()),
                            attempts: 0,
                        })
                    }
                };
                fetch_unit(fetcher.as_ref(), &unit, &retry, today).await
            });

            handles.push((key, handle));
        }

        for (key, handle) in handles {
            match handle.await {
                Ok(result) => merge.record(result),
                Err(e) => {
                    warn!(service = %key, error = %e, "Fetch task panicked");
                    merge.record(UnitResult::Failed(UnitFailure {
                        key,
                        error: UnitError::Network(format!("fetch task panic: {}", e)),
                        attempts: 0,
                    }));
                }
            }
        }

        debug!(
            updated = merge.updated.len(),
            failed = merge.failed.len(),
            invalid = merge.validation_errors.len(),
            "Bulk fetch complete"
        );

        merge
    }
}

/// Run one unit through its timeout and retry schedule
async fn fetch_unit(
    fetcher: &dyn Fetcher,
    unit: &FetchUnit,
    retry: &RetryPolicy,
    today: NaiveDate,
) -> UnitResult {
    let mut last_error: Option<UnitError> = None;
    let mut attempts = 0;

    for attempt in 0..retry.max_attempts() {
        if let Some(delay) = retry.delay_before(attempt) {
            tokio::time::sleep(delay).await;
        }
        attempts = attempt + 1;

        let fetched = tokio::time::timeout(
            retry.attempt_timeout,
            fetcher.fetch(&unit.key.property_id, &unit.key.consumer_id),
        )
        .await;

        let error = match fetched {
            Ok(Ok(series)) => {
                return match validate_series(&series, today) {
                    Ok(()) => UnitResult::Updated {
                        key: unit.key.clone(),
                        series,
                        attempts,
                        recovered_from: last_error,
                    },
                    Err(e) => UnitResult::Failed(UnitFailure {
                        key: unit.key.clone(),
                        error: e.into(),
                        attempts,
                    }),
                };
            }
            Ok(Err(e)) => UnitError::from(e),
            // Elapsed: the in-flight fetch is dropped and counted as a failure
            Err(_) => UnitError::Timeout {
                timeout_secs: retry.attempt_timeout.as_secs(),
            },
        };

        debug!(service = %unit.key, attempt = attempts, error = %error, "Fetch attempt failed");

        if !error.is_retryable() {
            return UnitResult::Failed(UnitFailure {
                key: unit.key.clone(),
                error,
                attempts,
            });
        }
        last_error = Some(error);
    }

    let error = last_error.unwrap_or_else(|| UnitError::Network("no fetch attempted".to_string()));
    warn!(service = %unit.key, attempts, error = %error, "Fetch retries exhausted");
    UnitResult::Failed(UnitFailure {
        key: unit.key.clone(),
        error,
        attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use redboard_types::UsageRecord;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Clone)]
    enum Behavior {
        Ok,
        Hang,
        Network,
        /// Fail with a network error this many times, then succeed
        FlakyThenOk(usize),
        Invalid,
        FutureDated,
        Auth,
    }

    struct ScriptedFetcher {
        behaviors: HashMap<String, Behavior>,
        calls: Mutex<HashMap<String, usize>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        latency: Duration,
    }

    impl ScriptedFetcher {
        fn new(behaviors: &[(&str, Behavior)]) -> Self {
            Self {
                behaviors: behaviors
                    .iter()
                    .map(|(k, b)| (k.to_string(), b.clone()))
                    .collect(),
                calls: Mutex::new(HashMap::new()),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                latency: Duration::from_millis(100),
            }
        }

        fn calls(&self, consumer: &str) -> usize {
            self.calls.lock().get(consumer).copied().unwrap_or(0)
        }
    }

    fn week() -> UsageSeries {
        (1..=7)
            .map(|d| {
                UsageRecord::new(
                    NaiveDate::from_ymd_opt(2024, 4, d).unwrap(),
                    10.0 + d as f64,
                    3.0,
                )
            })
            .collect()
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 4, 8).unwrap()
    }

    #[async_trait]
    impl Fetcher for ScriptedFetcher {
        async fn fetch(
            &self,
            _property_id: &str,
            consumer_id: &str,
        ) -> Result<UsageSeries, FetchError> {
            let call = {
                let mut calls = self.calls.lock();
                let entry = calls.entry(consumer_id.to_string()).or_insert(0);
                *entry += 1;
                *entry
            };

            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.latency).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            match self.behaviors.get(consumer_id).cloned().unwrap_or(Behavior::Ok) {
                Behavior::Ok => Ok(week()),
                Behavior::Hang => std::future::pending().await,
                Behavior::Network => Err(FetchError::Network("connection reset".into())),
                Behavior::FlakyThenOk(n) if call <= n => {
                    Err(FetchError::Network("connection reset".into()))
                }
                Behavior::FlakyThenOk(_) => Ok(week()),
                Behavior::Invalid => Err(FetchError::Validation("halfHours missing".into())),
                Behavior::FutureDated => Ok(UsageSeries::from_records(vec![UsageRecord::new(
                    NaiveDate::from_ymd_opt(2030, 1, 1).unwrap(),
                    1.0,
                    1.0,
                )])),
                Behavior::Auth => Err(FetchError::Auth("token expired".into())),
            }
        }
    }

    fn units(consumers: &[&str]) -> Vec<FetchUnit> {
        consumers
            .iter()
            .map(|c| FetchUnit {
                key: ServiceKey::new("p1", *c),
                kind: ServiceKind::Electricity,
            })
            .collect()
    }

    fn processor(fetcher: Arc<ScriptedFetcher>) -> BulkFetchProcessor {
        BulkFetchProcessor::with_defaults(fetcher)
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_units_updated() {
        let fetcher = Arc::new(ScriptedFetcher::new(&[]));
        let merge = processor(fetcher.clone())
            .run(units(&["a", "b", "c"]), today())
            .await;

        assert_eq!(merge.updated.len(), 3);
        assert_eq!(merge.outcome(), CycleOutcome::Updated);
        assert!(merge.recovered.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_exhausts_retries_and_isolates_unit() {
        let fetcher = Arc::new(ScriptedFetcher::new(&[("e", Behavior::Hang)]));
        let merge = processor(fetcher.clone())
            .run(units(&["a", "b", "c", "d", "e"]), today())
            .await;

        assert_eq!(merge.updated.len(), 4);
        assert_eq!(merge.failed.len(), 1);
        assert_eq!(merge.failed[0].key, ServiceKey::new("p1", "e"));
        assert_eq!(
            merge.failed[0].error,
            UnitError::Timeout { timeout_secs: 30 }
        );
        assert_eq!(merge.failed[0].attempts, 3);
        assert_eq!(fetcher.calls("e"), 3);
        assert_eq!(merge.outcome(), CycleOutcome::PartialFailure);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_schedule_is_one_then_three_seconds() {
        let fetcher = Arc::new(ScriptedFetcher::new(&[("a", Behavior::Network)]));
        let started = tokio::time::Instant::now();

        let merge = processor(fetcher.clone()).run(units(&["a"]), today()).await;

        // Three attempts of 100ms latency plus 1s and 3s of backoff
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(4300), "{:?}", elapsed);
        assert!(elapsed < Duration::from_secs(5), "{:?}", elapsed);
        assert_eq!(merge.outcome(), CycleOutcome::TotalFailure);
        assert_eq!(fetcher.calls("a"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flaky_unit_recovers() {
        let fetcher = Arc::new(ScriptedFetcher::new(&[("a", Behavior::FlakyThenOk(2))]));
        let merge = processor(fetcher.clone()).run(units(&["a"]), today()).await;

        assert_eq!(merge.outcome(), CycleOutcome::Updated);
        assert_eq!(merge.recovered.len(), 1);
        assert_eq!(merge.recovered[0].attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_validation_error_not_retried() {
        let fetcher = Arc::new(ScriptedFetcher::new(&[
            ("a", Behavior::Invalid),
            ("b", Behavior::FutureDated),
        ]));
        let merge = processor(fetcher.clone())
            .run(units(&["a", "b", "c"]), today())
            .await;

        assert_eq!(fetcher.calls("a"), 1);
        assert_eq!(fetcher.calls("b"), 1);
        assert_eq!(merge.validation_errors.len(), 2);
        assert!(merge.failed.is_empty());
        assert_eq!(merge.outcome(), CycleOutcome::PartialFailure);
        assert_eq!(merge.stale_keys().count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_error_not_retried() {
        let fetcher = Arc::new(ScriptedFetcher::new(&[("a", Behavior::Auth)]));
        let merge = processor(fetcher.clone()).run(units(&["a", "b"]), today()).await;

        assert_eq!(fetcher.calls("a"), 1);
        let failure = merge.auth_failure().unwrap();
        assert_eq!(failure.key, ServiceKey::new("p1", "a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_units_failing_is_total_failure() {
        let fetcher = Arc::new(ScriptedFetcher::new(&[
            ("a", Behavior::Network),
            ("b", Behavior::Invalid),
        ]));
        let merge = processor(fetcher).run(units(&["a", "b"]), today()).await;
        assert_eq!(merge.outcome(), CycleOutcome::TotalFailure);
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_pool_bounded() {
        let fetcher = Arc::new(ScriptedFetcher::new(&[]));
        let names: Vec<String> = (0..12).map(|i| format!("s{}", i)).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();

        let merge = processor(fetcher.clone()).run(units(&refs), today()).await;

        assert_eq!(merge.updated.len(), 12);
        assert_eq!(fetcher.max_in_flight.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let fetcher = Arc::new(ScriptedFetcher::new(&[]));
        let merge = processor(fetcher).run(Vec::new(), today()).await;
        assert_eq!(merge.attempted(), 0);
        assert_eq!(merge.outcome(), CycleOutcome::Updated);
    }

    #[test]
    fn test_pool_size() {
        let fetcher = Arc::new(ScriptedFetcher::new(&[]));
        let processor = processor(fetcher);
        assert_eq!(processor.pool_size(2), 2);
        assert_eq!(processor.pool_size(9), 5);
        assert_eq!(processor.pool_size(0), 1);
    }
}
