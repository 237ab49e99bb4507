//! Provider payload validation
//!
//! The provider reports usage as a list of days, each with its half-hour
//! intervals. Intervals are summed into one record per day.

use crate::error::FetchError;
use chrono::{Duration, NaiveDate};
use redboard_types::{UsageRecord, UsageSeries};
use serde_json::Value;
use tracing::warn;

/// Convert a raw provider usage payload into a series
pub fn parse_provider_usage(payload: &Value) -> Result<UsageSeries, FetchError> {
    let entries = payload.as_array().ok_or_else(|| {
        FetchError::Validation("usage payload must be a list of days".to_string())
    })?;

    let mut records = Vec::with_capacity(entries.len());
    for entry in entries {
        let Some(date) = entry
            .get("usageDate")
            .and_then(Value::as_str)
            .and_then(parse_usage_date)
        else {
            warn!(entry = %entry, "Skipping usage entry without a valid usageDate");
            continue;
        };

        let mut usage = 0.0;
        let mut cost = 0.0;
        if let Some(intervals) = entry.get("halfHours").and_then(Value::as_array) {
            for interval in intervals {
                usage += numeric_field(interval, "consumptionKwh");
                cost += numeric_field(interval, "consumptionDollarIncGst");
            }
        }

        if usage < 0.0 || cost < 0.0 {
            warn!(%date, usage, cost, "Negative daily total, clamping to 0");
        }

        records.push(UsageRecord::new(
            date,
            round_to(usage.max(0.0), 3),
            round_to(cost.max(0.0), 2),
        ));
    }

    if records.is_empty() && !entries.is_empty() {
        return Err(FetchError::Validation(
            "usage payload contains no usable entries".to_string(),
        ));
    }

    Ok(UsageSeries::from_records(records))
}

/// Reject series a fetcher should never have produced
pub fn validate_series(series: &UsageSeries, today: NaiveDate) -> Result<(), FetchError> {
    let latest_allowed = today + Duration::days(1);
    for record in series.iter() {
        if !record.usage.is_finite() || record.usage < 0.0 {
            return Err(FetchError::Validation(format!(
                "usage {} on {} out of range",
                record.usage, record.date
            )));
        }
        if !record.cost.is_finite() || record.cost < 0.0 {
            return Err(FetchError::Validation(format!(
                "cost {} on {} out of range",
                record.cost, record.date
            )));
        }
        if record.date > latest_allowed {
            return Err(FetchError::Validation(format!(
                "record dated {} is in the future",
                record.date
            )));
        }
    }
    Ok(())
}

/// Accepts "YYYY-MM-DD" with an optional time suffix
fn parse_usage_date(raw: &str) -> Option<NaiveDate> {
    let date_part = raw.get(..10)?;
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}

/// Numbers may arrive as JSON numbers or numeric strings; anything else is 0
fn numeric_field(value: &Value, field: &str) -> f64 {
    match value.get(field) {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_sums_half_hours_per_day() {
        let payload = json!([
            {
                "usageDate": "2024-02-01",
                "halfHours": [
                    {"consumptionKwh": 0.5, "consumptionDollarIncGst": 0.15},
                    {"consumptionKwh": 0.25, "consumptionDollarIncGst": 0.05},
                    {"consumptionKwh": "0.1234", "consumptionDollarIncGst": "0.04"}
                ]
            },
            {"usageDate": "2024-01-31T00:00:00", "halfHours": []}
        ]);

        let series = parse_provider_usage(&payload).unwrap();

        assert_eq!(series.len(), 2);
        assert_eq!(series.first().unwrap().date, date("2024-01-31"));
        let feb = series.get(date("2024-02-01")).unwrap();
        assert_eq!(feb.usage, 0.873);
        assert_eq!(feb.cost, 0.24);
    }

    #[test]
    fn test_rejects_non_list_payload() {
        let err = parse_provider_usage(&json!({"usage": []})).unwrap_err();
        assert!(matches!(err, FetchError::Validation(_)));
    }

    #[test]
    fn test_skips_entries_without_date() {
        let payload = json!([
            {"halfHours": [{"consumptionKwh": 1.0}]},
            {"usageDate": "not-a-date"},
            {"usageDate": "2024-03-01", "halfHours": [{"consumptionKwh": 2.0}]}
        ]);
        let series = parse_provider_usage(&payload).unwrap();
        assert_eq!(series.len(), 1);
    }

    #[test]
    fn test_all_entries_invalid_is_error() {
        let payload = json!([{"usageDate": ""}, {"foo": 1}]);
        assert!(parse_provider_usage(&payload).is_err());
    }

    #[test]
    fn test_empty_list_is_empty_series() {
        let series = parse_provider_usage(&json!([])).unwrap();
        assert!(series.is_empty());
    }

    #[test]
    fn test_negative_totals_clamped() {
        let payload = json!([
            {"usageDate": "2024-03-01", "halfHours": [
                {"consumptionKwh": -1.5, "consumptionDollarIncGst": -0.4}
            ]}
        ]);
        let series = parse_provider_usage(&payload).unwrap();
        let record = series.first().unwrap();
        assert_eq!(record.usage, 0.0);
        assert_eq!(record.cost, 0.0);
    }

    #[test]
    fn test_validate_series_bounds() {
        let today = date("2024-03-10");
        let ok = UsageSeries::from_records(vec![UsageRecord::new(date("2024-03-11"), 1.0, 0.2)]);
        assert!(validate_series(&ok, today).is_ok());

        let future =
            UsageSeries::from_records(vec![UsageRecord::new(date("2024-03-12"), 1.0, 0.2)]);
        assert!(validate_series(&future, today).is_err());

        let negative =
            UsageSeries::from_records(vec![UsageRecord::new(date("2024-03-01"), -1.0, 0.2)]);
        assert!(validate_series(&negative, today).is_err());

        let nan =
            UsageSeries::from_records(vec![UsageRecord::new(date("2024-03-01"), 1.0, f64::NAN)]);
        assert!(validate_series(&nan, today).is_err());
    }
}
