//! Totals for a usage series, available regardless of record count

use redboard_types::{UsageSeries, UsageSummary};

pub fn summarize(series: &UsageSeries) -> UsageSummary {
    UsageSummary {
        total_usage: series.total_usage(),
        total_cost: series.total_cost(),
        latest: series.last().copied(),
        from: series.first().map(|r| r.date),
        to: series.last().map(|r| r.date),
        days: series.len(),
    }
}
