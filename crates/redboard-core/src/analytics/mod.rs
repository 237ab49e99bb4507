//! Analytics engine for daily usage series
//!
//! Derives averages, peak detection, and a consistency-based efficiency
//! score from a service's usage series. Everything here is synchronous and
//! free of I/O.

pub mod cache;
pub mod metrics;
pub mod statistics;
pub mod summary;

#[cfg(test)]
mod tests;

pub use cache::{fingerprint, MetricsCache};
pub use metrics::{
    classify_variation, compute_metrics, efficiency_from_cv, find_peak, DAYS_PER_MONTH,
    LOW_VARIATION_CV, MEDIUM_VARIATION_CV, MIN_RECORDS,
};
pub use statistics::SeriesStatistics;
pub use summary::summarize;
