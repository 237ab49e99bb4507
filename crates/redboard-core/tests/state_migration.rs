//! Restoring coordinators from older and unreadable persisted layouts

use chrono::{Duration, Utc};
use redboard_core::fetch::{FixtureFetcher, StaticAuthenticator};
use redboard_core::analytics::{compute_metrics, summarize};
use redboard_core::state::{CoordinatorState, RetentionPolicy, SCHEMA_VERSION};
use redboard_core::{Coordinator, CoordinatorConfig, Credentials, StateManager};
use redboard_types::{
    CircuitState, Property, PropertySnapshot, Service, ServiceKey, ServiceKind, ServiceSnapshot,
    Snapshot, UsageRecord, UsageSeries,
};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tempfile::TempDir;

fn config() -> CoordinatorConfig {
    let mut config = CoordinatorConfig::new(
        "home",
        vec![Property {
            id: "p1".to_string(),
            name: "Home".to_string(),
            address: "1 Main St".to_string(),
            services: vec![
                Service::new(ServiceKind::Electricity, "E-1"),
                Service::new(ServiceKind::Gas, "G-1"),
            ],
        }],
    );
    config.polling_interval = redboard_core::PollingInterval::SixtyMinutes;
    config
}

fn coordinator(dir: &TempDir, state: Arc<StateManager>) -> Arc<Coordinator> {
    Coordinator::new(
        config(),
        Arc::new(FixtureFetcher::new(dir.path().join("fixtures"))),
        Arc::new(StaticAuthenticator::new(Credentials::new(
            "me@example.com",
            "client-123",
            "s3cret",
        ))),
        state,
    )
    .unwrap()
}

fn v1_payload() -> String {
    let today = Utc::now().date_naive();
    let records: Vec<_> = (0..10)
        .map(|i| {
            json!({
                "date": (today - Duration::days(i)).format("%Y-%m-%d").to_string(),
                "usage": 20.0 + i as f64,
                "cost": 5.0,
            })
        })
        .collect();

    json!({
        "polling_interval_secs": 900,
        "circuit_state": "closed",
        "failure_count": 2,
        "last_success": Utc::now().to_rfc3339(),
        "services": [
            {
                "property_id": "p1",
                "property_name": "Old name",
                "consumer_id": "E-1",
                "kind": "electricity",
                "records": records,
            },
            {
                "property_id": "p9",
                "consumer_id": "E-9",
                "kind": "electricity",
                "records": [],
            }
        ],
        "errors": []
    })
    .to_string()
}

#[tokio::test]
async fn test_v1_state_restores_through_coordinator() {
    let dir = TempDir::new().unwrap();
    let state = Arc::new(StateManager::open(dir.path()).unwrap());
    state
        .write_raw("home", 1, &v1_payload(), Utc::now())
        .unwrap();

    let coordinator = coordinator(&dir, state);
    let snapshot = coordinator.get_snapshot();

    // Persisted interval wins over the configured one
    assert_eq!(coordinator.polling_interval().minutes(), 15);
    assert_eq!(coordinator.status().consecutive_failures, 2);
    assert_eq!(coordinator.status().circuit_state, CircuitState::Closed);

    let electricity = snapshot.service(&ServiceKey::new("p1", "E-1")).unwrap();
    assert_eq!(electricity.series.len(), 10);
    let metrics = electricity.metrics.values().unwrap();
    assert!((metrics.daily_average - 24.5).abs() < 1e-9);

    // Configured gas service appears as an empty placeholder
    let gas = snapshot.service(&ServiceKey::new("p1", "G-1")).unwrap();
    assert!(gas.series.is_empty());
    assert!(!gas.metrics.is_computed());

    // Services no longer configured are dropped, names come from config
    assert!(snapshot.service(&ServiceKey::new("p9", "E-9")).is_none());
    assert_eq!(snapshot.properties["p1"].name, "Home");
}

#[tokio::test]
async fn test_migrated_state_is_rewritten_at_current_version() {
    let dir = TempDir::new().unwrap();
    let state = Arc::new(StateManager::open(dir.path()).unwrap());
    state
        .write_raw("home", 1, &v1_payload(), Utc::now())
        .unwrap();

    let coordinator = coordinator(&dir, Arc::clone(&state));
    coordinator.configure(30).await.unwrap();

    let restored = state.restore("home");
    assert_eq!(
        restored.source,
        redboard_core::state::RestoreSource::Current
    );
    assert_eq!(restored.state.polling_interval.minutes(), 30);
    assert_eq!(
        restored.state.snapshot.service(&ServiceKey::new("p1", "E-1")).unwrap().series.len(),
        10
    );
}

#[tokio::test]
async fn test_unreadable_states_fall_back_to_config() {
    let cases = [
        (SCHEMA_VERSION + 1, "{}".to_string()),
        (SCHEMA_VERSION, "not json".to_string()),
        (1, json!({"polling_interval_secs": 45}).to_string()),
    ];

    for (version, payload) in cases {
        let dir = TempDir::new().unwrap();
        let state = Arc::new(StateManager::open(dir.path()).unwrap());
        state.write_raw("home", version, &payload, Utc::now()).unwrap();

        let coordinator = coordinator(&dir, state);

        assert_eq!(
            coordinator.polling_interval().minutes(),
            60,
            "version {} payload {}",
            version,
            payload
        );
        assert_eq!(coordinator.status().consecutive_failures, 0);
        assert!(coordinator.get_snapshot().properties["p1"]
            .services
            .values()
            .all(|s| s.series.is_empty()));
    }
}

#[tokio::test]
async fn test_restored_peak_lies_inside_persisted_window() {
    let dir = TempDir::new().unwrap();
    let state = Arc::new(StateManager::open(dir.path()).unwrap());
    let today = Utc::now().date_naive();
    let series = UsageSeries::from_records(
        (0..10)
            .map(|i| {
                let usage = if i == 9 { 99.0 } else { 10.0 };
                UsageRecord::new(today - Duration::days(i), usage, 3.0)
            })
            .collect(),
    );
    let mut service = ServiceSnapshot::empty(ServiceKind::Electricity, "E-1");
    service.metrics = compute_metrics(&series);
    service.summary = summarize(&series);
    service.series = series;

    let mut persisted = CoordinatorState::empty("home");
    persisted.snapshot = Snapshot {
        properties: BTreeMap::from([(
            "p1".to_string(),
            PropertySnapshot {
                id: "p1".to_string(),
                name: "Home".to_string(),
                address: "1 Main St".to_string(),
                services: BTreeMap::from([("E-1".to_string(), service)]),
            },
        )]),
        last_successful_fetch: Some(Utc::now()),
    };
    let policy = RetentionPolicy {
        window_days: 7,
        ..Default::default()
    };
    state.persist(&persisted, policy, Utc::now()).unwrap();

    let coordinator = coordinator(&dir, state);
    let snapshot = coordinator.get_snapshot();
    let electricity = snapshot.service(&ServiceKey::new("p1", "E-1")).unwrap();

    assert_eq!(electricity.series.len(), 7);
    let metrics = electricity.metrics.values().unwrap();
    assert!(electricity.series.contains_date(metrics.peak.date));
    assert_eq!(metrics.peak.value, 10.0);
    assert_eq!(metrics.daily_average, 10.0);
    assert_eq!(electricity.summary, summarize(&electricity.series));
}
