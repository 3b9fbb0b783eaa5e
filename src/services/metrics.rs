//! Metrics aggregation over raw sales records.

use chrono::{Duration, NaiveDate};
use rust_decimal::{Decimal, RoundingStrategy};
use std::collections::{BTreeMap, HashMap};
use tracing::instrument;

use crate::errors::ServiceError;
use crate::models::{CategoryTotals, DrugTotals, MetricsSnapshot, SalesRecord, TrendSeries};

const TOP_DRUGS_LIMIT: usize = 5;

/// Stateless aggregation service; every call reduces the records it is
/// handed, nothing is cached between requests.
#[derive(Clone, Default)]
pub struct MetricsService;

impl MetricsService {
    pub fn new() -> Self {
        Self
    }

    /// Reduce `records` to a summary over the trailing `period_days` window
    /// ending at the latest recorded date.
    #[instrument(skip(self, records), fields(records = records.len()))]
    pub fn compute_metrics(
        &self,
        records: &[SalesRecord],
        period_days: u32,
    ) -> Result<MetricsSnapshot, ServiceError> {
        let (start, _latest) = window_bounds(records, period_days)?;
        let in_window: Vec<&SalesRecord> =
            records.iter().filter(|r| r.date >= start).collect();

        let total_revenue: Decimal = in_window.iter().map(|r| r.revenue).sum();
        let total_units: u64 = in_window.iter().map(|r| r.units_sold).sum();
        let avg_daily_demand = round_half_up_div(total_units, period_days);

        let mut by_drug: HashMap<&str, (u64, Decimal)> = HashMap::new();
        let mut by_category: HashMap<&str, (u64, Decimal)> = HashMap::new();
        for r in &in_window {
            let drug = by_drug.entry(r.drug_name.as_str()).or_default();
            drug.0 += r.units_sold;
            drug.1 += r.revenue;
            let cat = by_category.entry(r.category.as_str()).or_default();
            cat.0 += r.units_sold;
            cat.1 += r.revenue;
        }

        let mut top_drugs: Vec<DrugTotals> = by_drug
            .into_iter()
            .map(|(name, (units, revenue))| DrugTotals {
                name: name.to_string(),
                units,
                revenue,
            })
            .collect();
        // Descending by revenue, ties broken by name ascending.
        top_drugs.sort_by(|a, b| b.revenue.cmp(&a.revenue).then(a.name.cmp(&b.name)));
        top_drugs.truncate(TOP_DRUGS_LIMIT);

        let mut categories: Vec<CategoryTotals> = by_category
            .into_iter()
            .map(|(name, (units, revenue))| CategoryTotals {
                name: name.to_string(),
                units,
                revenue,
            })
            .collect();
        categories.sort_by(|a, b| b.revenue.cmp(&a.revenue).then(a.name.cmp(&b.name)));

        Ok(MetricsSnapshot {
            period: MetricsSnapshot::period_label(period_days),
            total_revenue,
            total_units,
            avg_daily_demand,
            top_drugs,
            categories,
        })
    }

    /// Dense daily series for charting: exactly `period_days` points, one per
    /// calendar day, zero-filled where no records exist.
    #[instrument(skip(self, records), fields(records = records.len()))]
    pub fn compute_trends(
        &self,
        records: &[SalesRecord],
        period_days: u32,
    ) -> Result<TrendSeries, ServiceError> {
        let (start, latest) = window_bounds(records, period_days)?;

        let mut per_day: BTreeMap<NaiveDate, (u64, Decimal)> = BTreeMap::new();
        for r in records.iter().filter(|r| r.date >= start) {
            let entry = per_day.entry(r.date).or_insert((0, Decimal::ZERO));
            entry.0 += r.units_sold;
            entry.1 += r.revenue;
        }

        let capacity = period_days as usize;
        let mut series = TrendSeries {
            dates: Vec::with_capacity(capacity),
            units: Vec::with_capacity(capacity),
            revenue: Vec::with_capacity(capacity),
        };
        let mut date = start;
        while date <= latest {
            let (units, revenue) = per_day.get(&date).copied().unwrap_or((0, Decimal::ZERO));
            series.dates.push(date);
            series.units.push(units);
            series.revenue.push(revenue);
            date += Duration::days(1);
        }
        Ok(series)
    }
}

/// Start and end of the trailing window ending at the latest recorded date.
fn window_bounds(
    records: &[SalesRecord],
    period_days: u32,
) -> Result<(NaiveDate, NaiveDate), ServiceError> {
    if period_days == 0 {
        return Err(ServiceError::ValidationError(
            "period_days must be positive".into(),
        ));
    }
    let latest = records
        .iter()
        .map(|r| r.date)
        .max()
        .ok_or_else(|| ServiceError::InsufficientData("no sales records for period".into()))?;
    Ok((latest - Duration::days(i64::from(period_days) - 1), latest))
}

/// Integer division rounding half away from zero.
fn round_half_up_div(total: u64, divisor: u32) -> u64 {
    use rust_decimal::prelude::ToPrimitive;
    (Decimal::from(total) / Decimal::from(divisor))
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_u64()
        .unwrap_or(0)
}
