//! Export of the published snapshot
//!
//! Reports cover a trailing window of whole days ending today. Summary and
//! metrics in the JSON report are computed over that window only.

use crate::analytics::{compute_metrics, summarize};
use crate::error::CoreError;
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use redboard_types::{DerivedMetrics, ServiceKind, Snapshot, UsageRecord, UsageSummary};
use serde::Serialize;
use std::fmt::Write as _;
use std::path::Path;
use std::str::FromStr;

pub const MIN_EXPORT_DAYS: u32 = 1;
pub const MAX_EXPORT_DAYS: u32 = 365;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            other => Err(CoreError::configuration(format!(
                "unknown export format '{}' (expected json or csv)",
                other
            ))),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ExportReport {
    pub generated_at: DateTime<Utc>,
    pub days: u32,
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub properties: Vec<PropertyExport>,
}

#[derive(Debug, Serialize)]
pub struct PropertyExport {
    pub id: String,
    pub name: String,
    pub address: String,
    pub services: Vec<ServiceExport>,
}

#[derive(Debug, Serialize)]
pub struct ServiceExport {
    pub kind: ServiceKind,
    pub consumer_id: String,
    pub usage_unit: &'static str,
    pub degraded: bool,
    pub last_updated: Option<DateTime<Utc>>,
    pub summary: UsageSummary,
    pub metrics: DerivedMetrics,
    pub records: Vec<UsageRecord>,
}

/// Build the report data for the trailing `days` ending at `now`
pub fn build_report(snapshot: &Snapshot, days: u32, now: DateTime<Utc>) -> Result<ExportReport, CoreError> {
    check_days(days)?;
    let to = now.date_naive();
    let from = to - Duration::days(i64::from(days) - 1);

    let properties = snapshot
        .properties
        .values()
        .map(|property| PropertyExport {
            id: property.id.clone(),
            name: property.name.clone(),
            address: property.address.clone(),
            services: property
                .services
                .values()
                .map(|service| {
                    let window = service.series.trailing(to, days);
                    ServiceExport {
                        kind: service.kind,
                        consumer_id: service.consumer_id.clone(),
                        usage_unit: service.kind.usage_unit(),
                        degraded: service.degraded,
                        last_updated: service.last_updated,
                        summary: summarize(&window),
                        metrics: compute_metrics(&window),
                        records: window.records().to_vec(),
                    }
                })
                .collect(),
        })
        .collect();

    Ok(ExportReport {
        generated_at: now,
        days,
        from,
        to,
        properties,
    })
}

/// Serialize the snapshot as a JSON report or CSV rows
pub fn export_snapshot(
    snapshot: &Snapshot,
    format: ExportFormat,
    days: u32,
    now: DateTime<Utc>,
) -> Result<String, CoreError> {
    let report = build_report(snapshot, days, now)?;
    match format {
        ExportFormat::Json => {
            serde_json::to_string_pretty(&report).map_err(|e| CoreError::Persistence {
                message: format!("failed to serialize export: {}", e),
            })
        }
        ExportFormat::Csv => Ok(to_csv(&report)),
    }
}

fn check_days(days: u32) -> Result<(), CoreError> {
    if (MIN_EXPORT_DAYS..=MAX_EXPORT_DAYS).contains(&days) {
        Ok(())
    } else {
        Err(CoreError::configuration(format!(
            "export window of {} days out of range ({}-{})",
            days, MIN_EXPORT_DAYS, MAX_EXPORT_DAYS
        )))
    }
}

const CSV_HEADER: &str =
    "property_id,property_name,service,consumer_id,date,usage,usage_unit,cost,degraded";

fn to_csv(report: &ExportReport) -> String {
    let mut out = String::new();
    out.push_str(CSV_HEADER);
    out.push('\n');

    for property in &report.properties {
        for service in &property.services {
            for record in &service.records {
                // Writing to a String cannot fail
                let _ = writeln!(
                    out,
                    "{},{},{},{},{},{},{},{:.2},{}",
                    csv_field(&property.id),
                    csv_field(&property.name),
                    service.kind,
                    csv_field(&service.consumer_id),
                    record.date.format("%Y-%m-%d"),
                    record.usage,
                    service.usage_unit,
                    record.cost,
                    service.degraded
                );
            }
        }
    }
    out
}

/// Quote a free-text field, doubling embedded quotes
fn csv_field(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

/// Write an export to `path`, creating parent directories
pub fn write_export(content: &str, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    std::fs::write(path, content)
        .with_context(|| format!("Failed to write export file: {}", path.display()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use redboard_types::{PropertySnapshot, ServiceSnapshot, UsageSeries};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, 9, 0, 0).unwrap()
    }

    fn snapshot() -> Snapshot {
        let series = UsageSeries::from_records(
            (1..=10)
                .map(|d| {
                    UsageRecord::new(NaiveDate::from_ymd_opt(2024, 3, d).unwrap(), 20.0, 5.6)
                })
                .collect(),
        );
        let mut service = ServiceSnapshot::empty(ServiceKind::Gas, "G-1");
        service.series = series;
        service.degraded = true;

        let mut services = BTreeMap::new();
        services.insert("G-1".to_string(), service);
        let mut properties = BTreeMap::new();
        properties.insert(
            "p1".to_string(),
            PropertySnapshot {
                id: "p1".to_string(),
                name: "The \"Shed\"".to_string(),
                address: String::new(),
                services,
            },
        );
        Snapshot {
            properties,
            last_successful_fetch: None,
        }
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("JSON".parse::<ExportFormat>().unwrap(), ExportFormat::Json);
        assert_eq!(" csv ".parse::<ExportFormat>().unwrap(), ExportFormat::Csv);
        assert!(matches!(
            "xml".parse::<ExportFormat>(),
            Err(CoreError::Configuration { .. })
        ));
    }

    #[test]
    fn test_days_bounds() {
        for days in [0, 366] {
            assert!(matches!(
                export_snapshot(&snapshot(), ExportFormat::Json, days, now()),
                Err(CoreError::Configuration { .. })
            ));
        }
        assert!(export_snapshot(&snapshot(), ExportFormat::Json, 365, now()).is_ok());
    }

    #[test]
    fn test_csv_rows_cover_window() {
        let csv = export_snapshot(&snapshot(), ExportFormat::Csv, 3, now()).unwrap();
        let lines: Vec<&str> = csv.lines().collect();

        assert_eq!(lines[0], CSV_HEADER);
        assert_eq!(lines.len(), 4);
        assert_eq!(
            lines[1],
            "\"p1\",\"The \"\"Shed\"\"\",gas,\"G-1\",2024-03-08,20,MJ,5.60,true"
        );
        assert!(lines[3].contains("2024-03-10"));
    }

    #[test]
    fn test_json_report_windowed_metrics() {
        let json = export_snapshot(&snapshot(), ExportFormat::Json, 7, now()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["from"], "2024-03-04");
        assert_eq!(value["to"], "2024-03-10");
        let service = &value["properties"][0]["services"][0];
        assert_eq!(service["records"].as_array().unwrap().len(), 7);
        assert_eq!(service["usage_unit"], "MJ");
        assert_eq!(service["metrics"]["status"], "computed");
        assert_eq!(service["metrics"]["daily_average"], 20.0);
        assert_eq!(service["summary"]["days"], 7);
    }

    #[test]
    fn test_short_window_reports_insufficient_data() {
        let json = export_snapshot(&snapshot(), ExportFormat::Json, 3, now()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        let metrics = &value["properties"][0]["services"][0]["metrics"];
        assert_eq!(metrics["status"], "insufficient_data");
        assert_eq!(metrics["records"], 3);
    }

    #[test]
    fn test_write_export_creates_parent_directory() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("exports/nested/usage.csv");

        write_export("a,b\n", &path).unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "a,b\n");
    }
}
