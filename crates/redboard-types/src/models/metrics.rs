//! Derived metrics types and the fixed metric table

use super::property::ServiceKind;
use super::usage::UsageRecord;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Discrete band of day-to-day usage variation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariationClass {
    Low,
    Medium,
    High,
}

impl fmt::Display for VariationClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VariationClass::Low => f.write_str("low"),
            VariationClass::Medium => f.write_str("medium"),
            VariationClass::High => f.write_str("high"),
        }
    }
}

/// Highest-usage day of a series
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Peak {
    pub value: f64,
    pub date: NaiveDate,
    pub cost: f64,
}

impl From<&UsageRecord> for Peak {
    fn from(record: &UsageRecord) -> Self {
        Self {
            value: record.usage,
            date: record.date,
            cost: record.cost,
        }
    }
}

/// Computed statistics for one service
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricValues {
    pub daily_average: f64,
    pub monthly_average: f64,
    pub peak: Peak,
    /// 0 to 100, higher means more consistent usage
    pub efficiency_rating: f64,
    pub variation_class: VariationClass,
    pub coefficient_of_variation: f64,
}

impl MetricValues {
    /// Look up one entry of the metric table
    pub fn reading(&self, kind: MetricKind) -> MetricReading {
        match kind {
            MetricKind::DailyAverage => MetricReading::Quantity(self.daily_average),
            MetricKind::MonthlyAverage => MetricReading::Quantity(self.monthly_average),
            MetricKind::PeakUsage => MetricReading::Peak(self.peak),
            MetricKind::EfficiencyRating => MetricReading::Score(self.efficiency_rating),
            MetricKind::UsageVariation => MetricReading::Band(self.variation_class),
        }
    }
}

/// Derived metrics, or the reason they were not computed
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DerivedMetrics {
    /// Series too short to produce meaningful statistics
    InsufficientData { records: usize },
    Computed(MetricValues),
}

impl Default for DerivedMetrics {
    fn default() -> Self {
        DerivedMetrics::InsufficientData { records: 0 }
    }
}

impl DerivedMetrics {
    pub fn values(&self) -> Option<&MetricValues> {
        match self {
            DerivedMetrics::Computed(values) => Some(values),
            DerivedMetrics::InsufficientData { .. } => None,
        }
    }

    pub fn is_computed(&self) -> bool {
        matches!(self, DerivedMetrics::Computed(_))
    }

    pub fn reading(&self, kind: MetricKind) -> Option<MetricReading> {
        self.values().map(|v| v.reading(kind))
    }
}

/// Closed set of metrics derived per service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    DailyAverage,
    MonthlyAverage,
    PeakUsage,
    EfficiencyRating,
    UsageVariation,
}

impl MetricKind {
    pub const ALL: [MetricKind; 5] = [
        MetricKind::DailyAverage,
        MetricKind::MonthlyAverage,
        MetricKind::PeakUsage,
        MetricKind::EfficiencyRating,
        MetricKind::UsageVariation,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            MetricKind::DailyAverage => "Daily Average",
            MetricKind::MonthlyAverage => "Monthly Average",
            MetricKind::PeakUsage => "Peak Usage",
            MetricKind::EfficiencyRating => "Efficiency",
            MetricKind::UsageVariation => "Usage Variation",
        }
    }

    /// Unit of the reading for a service of the given kind
    pub fn unit(&self, service: ServiceKind) -> Option<&'static str> {
        match self {
            MetricKind::DailyAverage | MetricKind::MonthlyAverage | MetricKind::PeakUsage => {
                Some(service.usage_unit())
            }
            MetricKind::EfficiencyRating => Some("%"),
            MetricKind::UsageVariation => None,
        }
    }
}

/// Typed value of one metric table entry
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricReading {
    Quantity(f64),
    Peak(Peak),
    Score(f64),
    Band(VariationClass),
}

impl fmt::Display for MetricReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricReading::Quantity(v) => write!(f, "{:.2}", v),
            MetricReading::Peak(p) => write!(f, "{:.2} on {} (${:.2})", p.value, p.date, p.cost),
            MetricReading::Score(v) => write!(f, "{:.1}", v),
            MetricReading::Band(class) => write!(f, "{}", class),
        }
    }
}

/// Totals available for any non-empty series
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct UsageSummary {
    pub total_usage: f64,
    pub total_cost: f64,
    pub latest: Option<UsageRecord>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub days: usize,
}
