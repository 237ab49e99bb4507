//! Unit tests for analytics module

use super::*;
use chrono::NaiveDate;
use redboard_types::{
    DerivedMetrics, MetricValues, ServiceKey, UsageRecord, UsageSeries, VariationClass,
};

fn day(offset: u32) -> NaiveDate {
    // 2024-01-01 is a Monday
    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Duration::days(offset as i64)
}

fn series_from(usage: &[f64]) -> UsageSeries {
    usage
        .iter()
        .enumerate()
        .map(|(i, &u)| UsageRecord::new(day(i as u32), u, u * 0.28))
        .collect()
}

/// Deterministic pseudo-random usage values (LCG), 0..scale
fn pseudo_random_usage(seed: u64, len: usize, scale: f64) -> Vec<f64> {
    let mut state = seed;
    (0..len)
        .map(|_| {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            ((state >> 33) as f64 / (1u64 << 31) as f64) * scale
        })
        .collect()
}

fn computed(metrics: DerivedMetrics) -> MetricValues {
    match metrics {
        DerivedMetrics::Computed(values) => values,
        other => panic!("Expected computed metrics, got {:?}", other),
    }
}

// ============================================================================
// Statistics Tests
// ============================================================================

#[test]
fn test_statistics_empty() {
    assert!(SeriesStatistics::compute(&[]).is_none());
}

#[test]
fn test_statistics_population_variance() {
    let stats = SeriesStatistics::compute(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();
    assert_eq!(stats.mean, 5.0);
    assert_eq!(stats.std_dev, 2.0);
    assert_eq!(stats.min, 2.0);
    assert_eq!(stats.max, 9.0);
}

#[test]
fn test_cv_zero_mean_is_uniform() {
    let stats = SeriesStatistics::compute(&[0.0; 7]).unwrap();
    assert_eq!(stats.coefficient_of_variation(), 0.0);
}

// ============================================================================
// Weekly Scenario
// ============================================================================

#[test]
fn test_weekly_scenario() {
    let series = UsageSeries::from_records(vec![
        UsageRecord::new(day(0), 20.0, 5.60),
        UsageRecord::new(day(1), 25.0, 7.00),
        UsageRecord::new(day(2), 22.0, 6.16),
        UsageRecord::new(day(3), 30.0, 8.40),
        UsageRecord::new(day(4), 28.0, 7.84),
        UsageRecord::new(day(5), 24.0, 6.72),
        UsageRecord::new(day(6), 26.0, 7.28),
    ]);

    let values = computed(compute_metrics(&series));

    assert_eq!(values.daily_average, 25.0);
    assert!((values.monthly_average - 761.0).abs() < 1e-9);
    assert_eq!(values.peak.value, 30.0);
    assert_eq!(values.peak.date, day(3), "Peak should be Thursday");
    assert_eq!(values.peak.cost, 8.40);
    // Population CV = sqrt(10) / 25
    assert!((values.coefficient_of_variation - 0.1265).abs() < 1e-3);
    assert!((values.efficiency_rating - 87.4).abs() < 1e-9);
    assert_eq!(values.variation_class, VariationClass::Low);
}

// ============================================================================
// Minimum Data Policy
// ============================================================================

#[test]
fn test_insufficient_data_below_seven_records() {
    for len in 0..MIN_RECORDS {
        let series = series_from(&vec![10.0; len]);
        assert_eq!(
            compute_metrics(&series),
            DerivedMetrics::InsufficientData { records: len },
            "len {} should be insufficient",
            len
        );
    }
}

#[test]
fn test_exactly_seven_records_computes() {
    let series = series_from(&[10.0; 7]);
    assert!(compute_metrics(&series).is_computed());
}

// ============================================================================
// Peak Detection
// ============================================================================

#[test]
fn test_peak_tie_prefers_most_recent() {
    let series = series_from(&[5.0, 9.0, 3.0, 9.0, 4.0, 9.0, 1.0]);
    let values = computed(compute_metrics(&series));
    assert_eq!(values.peak.value, 9.0);
    assert_eq!(values.peak.date, day(5));
}

#[test]
fn test_find_peak_empty() {
    assert!(find_peak(&[]).is_none());
}

// ============================================================================
// Efficiency & Variation
// ============================================================================

#[test]
fn test_uniform_usage_scores_100() {
    let values = computed(compute_metrics(&series_from(&[12.5; 10])));
    assert_eq!(values.efficiency_rating, 100.0);
    assert_eq!(values.variation_class, VariationClass::Low);
}

#[test]
fn test_all_zero_usage_scores_100() {
    let values = computed(compute_metrics(&series_from(&[0.0; 8])));
    assert_eq!(values.efficiency_rating, 100.0);
    assert_eq!(values.daily_average, 0.0);
}

#[test]
fn test_efficiency_clamped_at_zero() {
    assert_eq!(efficiency_from_cv(1.0), 0.0);
    assert_eq!(efficiency_from_cv(2.5), 0.0);
    assert_eq!(efficiency_from_cv(f64::NAN), 0.0);
}

#[test]
fn test_variation_band_boundaries() {
    assert_eq!(classify_variation(0.0), VariationClass::Low);
    assert_eq!(classify_variation(0.1499), VariationClass::Low);
    assert_eq!(classify_variation(0.15), VariationClass::Medium);
    assert_eq!(classify_variation(0.2999), VariationClass::Medium);
    assert_eq!(classify_variation(0.30), VariationClass::High);
}

#[test]
fn test_spiky_usage_is_high_variation() {
    let values = computed(compute_metrics(&series_from(&[
        1.0, 1.0, 1.0, 40.0, 1.0, 1.0, 1.0,
    ])));
    assert_eq!(values.variation_class, VariationClass::High);
    assert_eq!(values.efficiency_rating, 0.0);
}

// ============================================================================
// Invariants Over Many Series
// ============================================================================

#[test]
fn test_invariants_hold_for_generated_series() {
    for seed in 1..200u64 {
        let len = 7 + (seed as usize % 40);
        let usage = pseudo_random_usage(seed, len, 50.0);
        let series = series_from(&usage);
        let values = computed(compute_metrics(&series));

        assert!(
            (0.0..=100.0).contains(&values.efficiency_rating),
            "seed {}: efficiency {}",
            seed,
            values.efficiency_rating
        );
        assert_eq!(
            values.variation_class,
            classify_variation(values.coefficient_of_variation)
        );
        assert_eq!(values.monthly_average, values.daily_average * DAYS_PER_MONTH);

        let max = usage.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        assert_eq!(values.peak.value, max);
        assert!(series.contains_date(values.peak.date));
        let latest_max = series.iter().filter(|r| r.usage == max).last().unwrap();
        assert_eq!(values.peak.date, latest_max.date);
    }
}

#[test]
fn test_compute_is_deterministic() {
    let series = series_from(&pseudo_random_usage(42, 30, 20.0));
    assert_eq!(compute_metrics(&series), compute_metrics(&series));
}

// ============================================================================
// Summary & Cache
// ============================================================================

#[test]
fn test_summary_of_short_series() {
    let series = series_from(&[2.0, 3.0]);
    let summary = summarize(&series);
    assert_eq!(summary.total_usage, 5.0);
    assert_eq!(summary.days, 2);
    assert_eq!(summary.from, Some(day(0)));
    assert_eq!(summary.to, Some(day(1)));
    assert_eq!(summary.latest.unwrap().usage, 3.0);
}

#[test]
fn test_metrics_cache_hits_on_identical_series() {
    let cache = MetricsCache::default();
    let key = ServiceKey::new("p1", "E-1");
    let series = series_from(&[10.0, 11.0, 12.0, 13.0, 14.0, 15.0, 16.0]);

    let first = cache.get_or_compute(&key, &series);
    let second = cache.get_or_compute(&key, &series.clone());

    assert_eq!(first, second);
    assert_eq!(cache.stats(), (1, 1));
}

#[test]
fn test_metrics_cache_misses_on_changed_series() {
    let cache = MetricsCache::default();
    let key = ServiceKey::new("p1", "E-1");
    let mut series = series_from(&[10.0; 7]);
    cache.get_or_compute(&key, &series);

    series.merge(&UsageSeries::from_records(vec![UsageRecord::new(
        day(7),
        30.0,
        8.0,
    )]));
    let metrics = cache.get_or_compute(&key, &series);

    assert_eq!(cache.stats(), (0, 2));
    assert!(metrics.values().unwrap().coefficient_of_variation > 0.0);
}
