//! Published last-known-good snapshot

use super::metrics::{DerivedMetrics, UsageSummary};
use super::property::{ServiceKey, ServiceKind};
use super::usage::UsageSeries;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Data and metrics for one service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSnapshot {
    pub kind: ServiceKind,
    pub consumer_id: String,
    pub series: UsageSeries,
    #[serde(default)]
    pub metrics: DerivedMetrics,
    #[serde(default)]
    pub summary: UsageSummary,
    /// Data is stale because the latest fetch for this service failed
    #[serde(default)]
    pub degraded: bool,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

impl ServiceSnapshot {
    /// Placeholder for a configured service that has never been fetched
    pub fn empty(kind: ServiceKind, consumer_id: impl Into<String>) -> Self {
        Self {
            kind,
            consumer_id: consumer_id.into(),
            series: UsageSeries::new(),
            metrics: DerivedMetrics::default(),
            summary: UsageSummary::default(),
            degraded: false,
            last_updated: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertySnapshot {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub address: String,
    /// Keyed by consumer id
    #[serde(default)]
    pub services: BTreeMap<String, ServiceSnapshot>,
}

/// Property → Service → (series, metrics, degraded)
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub properties: BTreeMap<String, PropertySnapshot>,
    #[serde(default)]
    pub last_successful_fetch: Option<DateTime<Utc>>,
}

impl Snapshot {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.values().all(|p| p.services.is_empty())
    }

    pub fn service(&self, key: &ServiceKey) -> Option<&ServiceSnapshot> {
        self.properties
            .get(&key.property_id)
            .and_then(|p| p.services.get(&key.consumer_id))
    }

    pub fn service_mut(&mut self, key: &ServiceKey) -> Option<&mut ServiceSnapshot> {
        self.properties
            .get_mut(&key.property_id)
            .and_then(|p| p.services.get_mut(&key.consumer_id))
    }

    /// All services in property/consumer order
    pub fn services(&self) -> impl Iterator<Item = (ServiceKey, &ServiceSnapshot)> {
        self.properties.values().flat_map(|p| {
            p.services
                .iter()
                .map(move |(consumer, s)| (ServiceKey::new(&p.id, consumer), s))
        })
    }

    pub fn service_count(&self) -> usize {
        self.properties.values().map(|p| p.services.len()).sum()
    }

    pub fn degraded_services(&self) -> Vec<ServiceKey> {
        self.services()
            .filter(|(_, s)| s.degraded)
            .map(|(key, _)| key)
            .collect()
    }

    /// At least one service carries stale data
    pub fn is_degraded(&self) -> bool {
        self.services().any(|(_, s)| s.degraded)
    }
}
