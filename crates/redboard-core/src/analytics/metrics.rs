//! Derived metrics for one usage series
//!
//! Pure and deterministic: identical series always produce bit-identical
//! metrics, which lets restored snapshots be compared with the live ones.

use super::statistics::SeriesStatistics;
use redboard_types::{DerivedMetrics, MetricValues, Peak, UsageRecord, UsageSeries, VariationClass};

/// Minimum records before statistics are considered meaningful
pub const MIN_RECORDS: usize = 7;

/// Average days per month used for the monthly projection
pub const DAYS_PER_MONTH: f64 = 30.44;

/// CV below this is Low variation
pub const LOW_VARIATION_CV: f64 = 0.15;

/// CV below this (and at least LOW_VARIATION_CV) is Medium variation
pub const MEDIUM_VARIATION_CV: f64 = 0.30;

/// Compute derived metrics, or mark the series as insufficient
pub fn compute_metrics(series: &UsageSeries) -> DerivedMetrics {
    if series.len() < MIN_RECORDS {
        return DerivedMetrics::InsufficientData {
            records: series.len(),
        };
    }

    let usage: Vec<f64> = series.iter().map(|r| r.usage).collect();
    let (stats, peak) = match (
        SeriesStatistics::compute(&usage),
        find_peak(series.records()),
    ) {
        (Some(stats), Some(peak)) => (stats, peak),
        _ => {
            return DerivedMetrics::InsufficientData {
                records: series.len(),
            }
        }
    };

    let cv = stats.coefficient_of_variation();
    let daily_average = stats.mean;

    DerivedMetrics::Computed(MetricValues {
        daily_average,
        monthly_average: daily_average * DAYS_PER_MONTH,
        peak,
        efficiency_rating: efficiency_from_cv(cv),
        variation_class: classify_variation(cv),
        coefficient_of_variation: cv,
    })
}

/// Record with maximum usage; ties go to the most recent date
pub fn find_peak(records: &[UsageRecord]) -> Option<Peak> {
    let mut best: Option<&UsageRecord> = None;
    for record in records {
        match best {
            // Records are date-ascending, so >= keeps the latest tie
            Some(current) if record.usage < current.usage => {}
            _ => best = Some(record),
        }
    }
    best.map(Peak::from)
}

/// Map CV onto a 0-100 consistency score, rounded to one decimal
pub fn efficiency_from_cv(cv: f64) -> f64 {
    if !cv.is_finite() {
        return 0.0;
    }
    let score = (100.0 * (1.0 - cv)).clamp(0.0, 100.0);
    (score * 10.0).round() / 10.0
}

pub fn classify_variation(cv: f64) -> VariationClass {
    if cv < LOW_VARIATION_CV {
        VariationClass::Low
    } else if cv < MEDIUM_VARIATION_CV {
        VariationClass::Medium
    } else {
        VariationClass::High
    }
}
