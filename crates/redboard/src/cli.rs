//! Terminal rendering for CLI commands
//!
//! Tables are built with comfy-table; every formatter also has a JSON path
//! so output can be piped into other tools.

use chrono::{DateTime, Utc};
use comfy_table::{Cell, Color, Table};
use redboard_core::error_log::ErrorStatistics;
use redboard_core::{CoordinatorStatus, CycleReport, DegradedState};
use redboard_types::{MetricKind, Snapshot};

// ============================================================================
// Snapshot
// ============================================================================

/// One row per service with its metric table
pub fn format_snapshot(snapshot: &Snapshot, json: bool) -> String {
    if json {
        return serde_json::to_string_pretty(snapshot).unwrap_or_else(|_| "{}".to_string());
    }

    if snapshot.service_count() == 0 {
        return "No services configured".to_string();
    }

    let mut table = Table::new();
    let mut header = vec![
        Cell::new("Property").fg(Color::Cyan),
        Cell::new("Service").fg(Color::Cyan),
        Cell::new("Consumer").fg(Color::Cyan),
        Cell::new("Days").fg(Color::Cyan),
        Cell::new("Latest").fg(Color::Cyan),
    ];
    header.extend(
        MetricKind::ALL
            .iter()
            .map(|kind| Cell::new(kind.label()).fg(Color::Cyan)),
    );
    table.set_header(header);

    for property in snapshot.properties.values() {
        for service in property.services.values() {
            let latest = service
                .series
                .last()
                .map(|r| r.date.to_string())
                .unwrap_or_else(|| "-".to_string());

            let mut row = vec![
                Cell::new(&property.name),
                Cell::new(service.kind.as_str()),
                if service.degraded {
                    Cell::new(format!("{} (stale)", service.consumer_id)).fg(Color::Yellow)
                } else {
                    Cell::new(&service.consumer_id)
                },
                Cell::new(service.series.len()),
                Cell::new(latest),
            ];
            row.extend(MetricKind::ALL.iter().map(|kind| {
                let text = match service.metrics.reading(*kind) {
                    Some(reading) => match kind.unit(service.kind) {
                        Some(unit) => format!("{} {}", reading, unit),
                        None => reading.to_string(),
                    },
                    None => "-".to_string(),
                };
                Cell::new(text)
            }));
            table.add_row(row);
        }
    }

    let mut out = table.to_string();
    if let Some(at) = snapshot.last_successful_fetch {
        out.push_str(&format!("\nLast successful fetch: {}", format_time(&at)));
    }
    out
}

// ============================================================================
// Status
// ============================================================================

pub fn format_status(status: &CoordinatorStatus) -> String {
    let mut table = Table::new();
    table.set_header(vec![
        Cell::new("Field").fg(Color::Cyan),
        Cell::new("Value").fg(Color::Cyan),
    ]);

    let optional = |value: Option<&DateTime<Utc>>| value.map_or_else(|| "-".to_string(), format_time);

    table.add_row(vec![Cell::new("Config"), Cell::new(&status.config_id)]);
    table.add_row(vec![
        Cell::new("Interval"),
        Cell::new(status.polling_interval.to_string()),
    ]);
    table.add_row(vec![
        Cell::new("Circuit"),
        Cell::new(status.circuit_state.to_string()),
    ]);
    table.add_row(vec![
        Cell::new("Failures"),
        Cell::new(status.consecutive_failures),
    ]);
    table.add_row(vec![
        Cell::new("Next probe"),
        Cell::new(optional(status.next_probe_at.as_ref())),
    ]);
    table.add_row(vec![
        Cell::new("Last outcome"),
        Cell::new(
            status
                .last_outcome
                .map_or_else(|| "-".to_string(), |o| o.to_string()),
        ),
    ]);
    table.add_row(vec![
        Cell::new("Last success"),
        Cell::new(optional(status.last_successful_fetch.as_ref())),
    ]);
    table.add_row(vec![Cell::new("Health"), health_cell(&status.health)]);

    table.to_string()
}

fn health_cell(health: &DegradedState) -> Cell {
    match health {
        DegradedState::Healthy => Cell::new("healthy").fg(Color::Green),
        DegradedState::PartialData { stale, .. } => {
            Cell::new(format!("partial ({} stale)", stale.len())).fg(Color::Yellow)
        }
        DegradedState::Stale { reason } => Cell::new(format!("stale: {}", reason)).fg(Color::Red),
    }
}

/// One-line summary of a finished cycle
pub fn format_report(report: &CycleReport) -> String {
    let mut line = format!(
        "{}: {} updated, {} stale, circuit {}",
        report.outcome,
        report.updated.len(),
        report.stale.len(),
        report.circuit_state
    );
    if let Some(retry_at) = report.retry_at {
        line.push_str(&format!(", retry after {}", format_time(&retry_at)));
    }
    line
}

pub fn format_error_stats(stats: &ErrorStatistics) -> String {
    if stats.total == 0 {
        return "No errors recorded".to_string();
    }

    let mut table = Table::new();
    table.set_header(vec![
        Cell::new("Kind").fg(Color::Cyan),
        Cell::new("Count").fg(Color::Cyan),
    ]);
    for (kind, count) in &stats.by_kind {
        table.add_row(vec![Cell::new(kind.as_str()), Cell::new(count)]);
    }

    format!(
        "{}\n{} errors, {} in the last 24h, {} auto-recovered",
        table, stats.total, stats.last_24h, stats.auto_recovered
    )
}

fn format_time(at: &DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};
    use redboard_core::analytics::compute_metrics;
    use redboard_types::{
        PropertySnapshot, ServiceKind, ServiceSnapshot, UsageRecord, UsageSeries,
    };
    use std::collections::BTreeMap;

    fn snapshot(degraded: bool) -> Snapshot {
        let series = UsageSeries::from_records(
            (1..=7)
                .map(|d| {
                    UsageRecord::new(NaiveDate::from_ymd_opt(2024, 1, d).unwrap(), 25.0, 7.0)
                })
                .collect(),
        );
        let mut service = ServiceSnapshot::empty(ServiceKind::Electricity, "E-1");
        service.metrics = compute_metrics(&series);
        service.series = series;
        service.degraded = degraded;

        let mut services = BTreeMap::new();
        services.insert("E-1".to_string(), service);
        let mut properties = BTreeMap::new();
        properties.insert(
            "p1".to_string(),
            PropertySnapshot {
                id: "p1".to_string(),
                name: "Home".to_string(),
                address: String::new(),
                services,
            },
        );
        Snapshot {
            properties,
            last_successful_fetch: Some(Utc.with_ymd_and_hms(2024, 1, 7, 12, 0, 0).unwrap()),
        }
    }

    #[test]
    fn test_empty_snapshot() {
        assert_eq!(
            format_snapshot(&Snapshot::empty(), false),
            "No services configured"
        );
    }

    #[test]
    fn test_snapshot_table_has_metric_columns() {
        let out = format_snapshot(&snapshot(false), false);
        assert!(out.contains("Home"));
        assert!(out.contains("Daily Average"));
        assert!(out.contains("25.00 kWh"));
        assert!(out.contains("2024-01-07"));
        assert!(out.contains("Last successful fetch: 2024-01-07 12:00:00 UTC"));
        assert!(!out.contains("(stale)"));
    }

    #[test]
    fn test_snapshot_table_marks_degraded() {
        let out = format_snapshot(&snapshot(true), false);
        assert!(out.contains("E-1 (stale)"));
    }

    #[test]
    fn test_snapshot_json() {
        let out = format_snapshot(&snapshot(false), true);
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["properties"]["p1"]["name"], "Home");
    }

    #[test]
    fn test_error_stats_empty() {
        assert_eq!(
            format_error_stats(&ErrorStatistics::default()),
            "No errors recorded"
        );
    }
}
