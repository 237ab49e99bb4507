//! Daily usage records and the ordered series built from them

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

/// Usage and cost for one calendar day
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub date: NaiveDate,
    /// Quantity consumed, unit given by the service kind
    pub usage: f64,
    /// Cost including tax, in dollars
    pub cost: f64,
}

impl UsageRecord {
    pub fn new(date: NaiveDate, usage: f64, cost: f64) -> Self {
        Self { date, usage, cost }
    }
}

/// Trailing window of daily records for one service
///
/// Always sorted by date with no duplicate dates. When two records share a
/// date the one supplied last wins, so merging newer data over older data
/// replaces the overlapping days.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<UsageRecord>", into = "Vec<UsageRecord>")]
pub struct UsageSeries {
    records: Vec<UsageRecord>,
}

impl UsageSeries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a series from records in any order
    pub fn from_records(mut records: Vec<UsageRecord>) -> Self {
        // Stable sort keeps input order among equal dates
        records.sort_by_key(|r| r.date);

        let mut deduped: Vec<UsageRecord> = Vec::with_capacity(records.len());
        for record in records {
            match deduped.last_mut() {
                Some(last) if last.date == record.date => *last = record,
                _ => deduped.push(record),
            }
        }

        Self { records: deduped }
    }

    pub fn records(&self) -> &[UsageRecord] {
        &self.records
    }

    pub fn iter(&self) -> impl Iterator<Item = &UsageRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn first(&self) -> Option<&UsageRecord> {
        self.records.first()
    }

    pub fn last(&self) -> Option<&UsageRecord> {
        self.records.last()
    }

    pub fn contains_date(&self, date: NaiveDate) -> bool {
        self.records
            .binary_search_by_key(&date, |r| r.date)
            .is_ok()
    }

    pub fn get(&self, date: NaiveDate) -> Option<&UsageRecord> {
        self.records
            .binary_search_by_key(&date, |r| r.date)
            .ok()
            .map(|idx| &self.records[idx])
    }

    /// Merge newer records over this series (newer wins on shared dates)
    pub fn merge(&mut self, newer: &UsageSeries) {
        if newer.is_empty() {
            return;
        }
        let mut combined = std::mem::take(&mut self.records);
        combined.extend_from_slice(&newer.records);
        *self = Self::from_records(combined);
    }

    /// Drop records outside the `days`-long window ending at `end` (inclusive)
    ///
    /// Returns the number of records removed.
    pub fn retain_window(&mut self, end: NaiveDate, days: u32) -> usize {
        let before = self.records.len();
        let start = window_start(end, days);
        self.records.retain(|r| r.date >= start && r.date <= end);
        before - self.records.len()
    }

    /// Copy of the records inside the `days`-long window ending at `end`
    pub fn trailing(&self, end: NaiveDate, days: u32) -> UsageSeries {
        let start = window_start(end, days);
        Self {
            records: self
                .records
                .iter()
                .filter(|r| r.date >= start && r.date <= end)
                .copied()
                .collect(),
        }
    }

    pub fn total_usage(&self) -> f64 {
        self.records.iter().map(|r| r.usage).sum()
    }

    pub fn total_cost(&self) -> f64 {
        self.records.iter().map(|r| r.cost).sum()
    }
}

fn window_start(end: NaiveDate, days: u32) -> NaiveDate {
    end - Duration::days(i64::from(days.max(1)) - 1)
}

impl From<Vec<UsageRecord>> for UsageSeries {
    fn from(records: Vec<UsageRecord>) -> Self {
        Self::from_records(records)
    }
}

impl From<UsageSeries> for Vec<UsageRecord> {
    fn from(series: UsageSeries) -> Self {
        series.records
    }
}

impl FromIterator<UsageRecord> for UsageSeries {
    fn from_iter<I: IntoIterator<Item = UsageRecord>>(iter: I) -> Self {
        Self::from_records(iter.into_iter().collect())
    }
}
