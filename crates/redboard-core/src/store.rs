//! Usage store: raw daily series per (property, service)
//!
//! A plain data structure. The coordinator owns one, clones it as the
//! working copy of a cycle, and swaps the merged copy in only when the
//! cycle succeeds.

use chrono::NaiveDate;
use redboard_types::{ServiceKey, Snapshot, UsageSeries};
use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UsageStore {
    series: BTreeMap<ServiceKey, UsageSeries>,
}

impl UsageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the store from a published snapshot
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        Self {
            series: snapshot
                .services()
                .map(|(key, service)| (key, service.series.clone()))
                .collect(),
        }
    }

    pub fn get(&self, key: &ServiceKey) -> Option<&UsageSeries> {
        self.series.get(key)
    }

    pub fn contains(&self, key: &ServiceKey) -> bool {
        self.series.contains_key(key)
    }

    /// Merge freshly fetched records over the stored series
    pub fn merge(&mut self, key: ServiceKey, fetched: &UsageSeries) {
        self.series.entry(key).or_default().merge(fetched);
    }

    pub fn keys(&self) -> impl Iterator<Item = &ServiceKey> {
        self.series.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ServiceKey, &UsageSeries)> {
        self.series.iter()
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// Trim every series to the rolling window ending at `end`
    ///
    /// Returns the number of records pruned.
    pub fn retain_window(&mut self, end: NaiveDate, days: u32) -> usize {
        self.series
            .values_mut()
            .map(|s| s.retain_window(end, days))
            .sum()
    }

    /// Forget services that are no longer configured
    pub fn retain_services(&mut self, configured: &HashSet<ServiceKey>) -> usize {
        let before = self.series.len();
        self.series.retain(|key, _| configured.contains(key));
        before - self.series.len()
    }
}
