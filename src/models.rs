//! Domain value objects for the analytics engine.
//!
//! Everything here is derived per request and owned by the request that
//! computed it; nothing is cached or mutated across requests.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use utoipa::ToSchema;

/// One day of recorded sales for a single drug. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SalesRecord {
    pub date: NaiveDate,
    pub drug_name: String,
    pub category: String,
    pub units_sold: u64,
    pub unit_price: Decimal,
    /// Always `units_sold * unit_price`, exact.
    pub revenue: Decimal,
}

impl SalesRecord {
    pub fn new(
        date: NaiveDate,
        drug_name: impl Into<String>,
        category: impl Into<String>,
        units_sold: u64,
        unit_price: Decimal,
    ) -> Self {
        Self {
            date,
            drug_name: drug_name.into(),
            category: category.into(),
            units_sold,
            unit_price,
            revenue: Decimal::from(units_sold) * unit_price,
        }
    }
}

/// Catalog entry used to populate dashboard selection filters.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DrugInfo {
    pub name: String,
    pub category: String,
    pub base_price: Decimal,
}

/// Per-drug totals within a metrics window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DrugTotals {
    pub name: String,
    pub units: u64,
    pub revenue: Decimal,
}

/// Per-category totals within a metrics window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CategoryTotals {
    pub name: String,
    pub units: u64,
    pub revenue: Decimal,
}

/// Aggregated sales summary for a trailing window. Recomputed per request.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MetricsSnapshot {
    /// Window label, e.g. "Last 30 days".
    pub period: String,
    pub total_revenue: Decimal,
    pub total_units: u64,
    /// `total_units / period_days`, rounded half-up to a whole unit.
    pub avg_daily_demand: u64,
    /// Top drugs by revenue, at most five entries.
    pub top_drugs: Vec<DrugTotals>,
    /// Category rollup, sorted by descending revenue.
    pub categories: Vec<CategoryTotals>,
}

impl MetricsSnapshot {
    pub fn period_label(period_days: u32) -> String {
        format!("Last {} days", period_days)
    }

    /// Neutral snapshot for a window with no records.
    pub fn empty(period_days: u32) -> Self {
        Self {
            period: Self::period_label(period_days),
            total_revenue: Decimal::ZERO,
            total_units: 0,
            avg_daily_demand: 0,
            top_drugs: Vec::new(),
            categories: Vec::new(),
        }
    }
}

/// Dense daily series for charting. All sequences are date-aligned and
/// gap-free; days without sales carry zeros.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct TrendSeries {
    pub dates: Vec<NaiveDate>,
    pub units: Vec<u64>,
    pub revenue: Vec<Decimal>,
}

/// Which model produced a forecast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, ToSchema)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ForecastStatus {
    /// Built by the internal synthetic model (or external delegation failed).
    Mock,
    /// Delegated to the configured external ML endpoint.
    Live,
}

/// Upper and lower forecast bounds, index-aligned with `predicted`.
/// Kept unrounded so the band-width growth is exact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ConfidenceBand {
    pub upper: Vec<f64>,
    pub lower: Vec<f64>,
}

/// A demand projection with history and a widening confidence band.
///
/// Invariants: all date-aligned sequences have matching lengths and
/// `forecast_dates` starts the day after the last historical date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ForecastResult {
    pub drug: String,
    /// Model label, "Mock SARIMA" for the internal source.
    pub model: String,
    pub status: ForecastStatus,
    pub historical_dates: Vec<NaiveDate>,
    pub historical_values: Vec<u64>,
    pub forecast_dates: Vec<NaiveDate>,
    pub predicted: Vec<u64>,
    pub confidence_interval: ConfidenceBand,
}

impl ForecastResult {
    /// Neutral result for a drug with no usable history.
    pub fn empty(drug: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            drug: drug.into(),
            model: model.into(),
            status: ForecastStatus::Mock,
            historical_dates: Vec::new(),
            historical_values: Vec::new(),
            forecast_dates: Vec::new(),
            predicted: Vec::new(),
            confidence_interval: ConfidenceBand {
                upper: Vec::new(),
                lower: Vec::new(),
            },
        }
    }
}

/// Business area an insight belongs to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, ToSchema,
)]
#[strum(ascii_case_insensitive)]
pub enum InsightCategory {
    Inventory,
    Sales,
    Growth,
    Pricing,
    Operations,
    Marketing,
}

/// Insight urgency tier, most severe first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, ToSchema,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum InsightPriority {
    Critical,
    High,
    Medium,
    Low,
}

impl InsightPriority {
    /// Sort rank, lower is more severe.
    pub fn rank(self) -> u8 {
        match self {
            Self::Critical => 0,
            Self::High => 1,
            Self::Medium => 2,
            Self::Low => 3,
        }
    }
}

/// A generated, prioritized recommendation. The `id` is deterministic from
/// (rule, drug, period) so identical inputs yield identical insights.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Insight {
    pub id: String,
    pub title: String,
    pub description: String,
    pub category: InsightCategory,
    pub priority: InsightPriority,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drug_name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::str::FromStr;

    #[test]
    fn sales_record_revenue_is_exact() {
        let rec = SalesRecord::new(
            NaiveDate::from_ymd_opt(2025, 8, 1).unwrap(),
            "Paracetamol",
            "Pain Relief",
            117,
            dec!(5.99),
        );
        assert_eq!(rec.revenue, dec!(700.83));
    }

    #[test]
    fn priority_parsing_is_case_insensitive() {
        assert_eq!(
            InsightPriority::from_str("CRITICAL").unwrap(),
            InsightPriority::Critical
        );
        assert_eq!(
            InsightCategory::from_str("inventory").unwrap(),
            InsightCategory::Inventory
        );
        assert!(InsightPriority::from_str("urgent").is_err());
    }

    #[test]
    fn priority_rank_orders_severity() {
        assert!(InsightPriority::Critical.rank() < InsightPriority::High.rank());
        assert!(InsightPriority::High.rank() < InsightPriority::Medium.rank());
        assert!(InsightPriority::Medium.rank() < InsightPriority::Low.rank());
    }
}
