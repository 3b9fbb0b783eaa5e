//! Rule-driven insight generation.
//!
//! Insights are produced by a fixed, ordered registry of rules. Each rule
//! inspects the same read-only context (metrics, per-drug forecasts and
//! series) and emits zero or more recommendations. Rules never fail the
//! request; a rule that cannot evaluate simply emits nothing.
//!
//! Insight ids are content-addressed from (rule, drug, period), so the
//! same data always yields the same ids and downstream consumers can
//! deduplicate across refreshes.

use rust_decimal::prelude::ToPrimitive;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tracing::instrument;

use crate::models::{ForecastResult, Insight, InsightCategory, InsightPriority, MetricsSnapshot};
use crate::services::forecasting::DrugSeries;

/// Projected demand at or above this multiple of recent demand is critical.
const RESTOCK_CRITICAL_RATIO: f64 = 1.5;
/// Projected demand at or above this multiple of recent demand is high.
const RESTOCK_HIGH_RATIO: f64 = 1.25;
/// Daily slope below this fraction of the recent average flags a decline.
const DECLINE_SLOPE_FRACTION: f64 = -0.01;
/// Daily slope above this fraction of the recent average flags growth.
const GROWTH_SLOPE_FRACTION: f64 = 0.01;
/// Growth above this fraction per day is reported at medium priority.
const STRONG_GROWTH_SLOPE_FRACTION: f64 = 0.03;
/// Revenue share a single drug needs before pricing is worth reviewing.
const PRICING_REVENUE_SHARE: f64 = 0.25;
/// Units slope within this band counts as flat demand.
const FLAT_SLOPE_FRACTION: f64 = 0.005;
/// Weekend average below this multiple of the weekday average is a slowdown.
const WEEKEND_SLOWDOWN_RATIO: f64 = 0.85;
/// Revenue share at which a category dominates the mix.
const CATEGORY_CONCENTRATION_SHARE: f64 = 0.40;
/// Window used for "recent demand" comparisons, in days.
const RECENT_WINDOW_DAYS: usize = 7;

/// Everything a rule may look at. All references, nothing owned; the
/// context lives only for the duration of one `generate` call.
pub struct RuleContext<'a> {
    pub metrics: &'a MetricsSnapshot,
    pub forecasts: &'a HashMap<String, ForecastResult>,
    pub series: &'a HashMap<String, DrugSeries>,
    pub period_days: u32,
}

impl RuleContext<'_> {
    /// Drug names with both a series and a forecast, in stable order.
    fn drug_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.series.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    fn total_revenue_f64(&self) -> f64 {
        self.metrics.total_revenue.to_f64().unwrap_or(0.0)
    }
}

/// One registered rule: a stable name (feeds the insight id) and a pure
/// evaluation function.
pub struct InsightRule {
    pub name: &'static str,
    pub eval: fn(&RuleContext<'_>) -> Vec<Insight>,
}

/// The fixed rule registry, in evaluation order.
pub fn registry() -> &'static [InsightRule] {
    &[
        InsightRule { name: "restock_risk", eval: restock_risk },
        InsightRule { name: "declining_sales", eval: declining_sales },
        InsightRule { name: "sustained_growth", eval: sustained_growth },
        InsightRule { name: "pricing_opportunity", eval: pricing_opportunity },
        InsightRule { name: "weekend_slowdown", eval: weekend_slowdown },
        InsightRule { name: "category_concentration", eval: category_concentration },
    ]
}

/// Deterministic 12-hex-char id from (rule, drug, period).
fn insight_id(rule: &str, drug: Option<&str>, period_days: u32) -> String {
    let key = format!("{}|{}|{}", rule, drug.unwrap_or(""), period_days);
    hex::encode(&Sha256::digest(key.as_bytes())[..6])
}

fn build(
    rule: &'static str,
    ctx: &RuleContext<'_>,
    title: String,
    description: String,
    category: InsightCategory,
    priority: InsightPriority,
    drug_name: Option<String>,
) -> Insight {
    Insight {
        id: insight_id(rule, drug_name.as_deref(), ctx.period_days),
        title,
        description,
        category,
        priority,
        drug_name,
    }
}

/// Projected demand outruns recent demand: restock before it bites.
fn restock_risk(ctx: &RuleContext<'_>) -> Vec<Insight> {
    let mut out = Vec::new();
    for name in ctx.drug_names() {
        let (Some(series), Some(forecast)) = (ctx.series.get(name), ctx.forecasts.get(name))
        else {
            continue;
        };
        if forecast.predicted.is_empty() {
            continue;
        }
        let recent = series.recent_average(RECENT_WINDOW_DAYS);
        if recent <= 0.0 {
            continue;
        }
        let projected =
            forecast.predicted.iter().sum::<u64>() as f64 / forecast.predicted.len() as f64;
        let ratio = projected / recent;

        let priority = if ratio >= RESTOCK_CRITICAL_RATIO {
            InsightPriority::Critical
        } else if ratio >= RESTOCK_HIGH_RATIO {
            InsightPriority::High
        } else {
            continue;
        };

        out.push(build(
            "restock_risk",
            ctx,
            format!("Restock risk: {}", name),
            format!(
                "Projected daily demand for {} is {:.0}% of its recent average. \
                 Review stock levels before the projection window begins.",
                name,
                ratio * 100.0
            ),
            InsightCategory::Inventory,
            priority,
            Some(name.to_string()),
        ));
    }
    out
}

/// Sustained negative unit trend over the recent window.
fn declining_sales(ctx: &RuleContext<'_>) -> Vec<Insight> {
    let mut out = Vec::new();
    for name in ctx.drug_names() {
        let Some(series) = ctx.series.get(name) else { continue };
        let recent = series.recent_average(series.len());
        if recent <= 0.0 {
            continue;
        }
        let slope = series.recent_slope(series.len());
        if slope / recent <= DECLINE_SLOPE_FRACTION {
            out.push(build(
                "declining_sales",
                ctx,
                format!("Declining sales: {}", name),
                format!(
                    "Units of {} are trending down by about {:.1} per day. \
                     Consider promotions or substitution analysis.",
                    name,
                    slope.abs()
                ),
                InsightCategory::Sales,
                InsightPriority::Medium,
                Some(name.to_string()),
            ));
        }
    }
    out
}

/// Sustained positive unit trend; strong growth gets a higher tier.
fn sustained_growth(ctx: &RuleContext<'_>) -> Vec<Insight> {
    let mut out = Vec::new();
    for name in ctx.drug_names() {
        let Some(series) = ctx.series.get(name) else { continue };
        let recent = series.recent_average(series.len());
        if recent <= 0.0 {
            continue;
        }
        let slope_fraction = series.recent_slope(series.len()) / recent;
        if slope_fraction >= GROWTH_SLOPE_FRACTION {
            let priority = if slope_fraction >= STRONG_GROWTH_SLOPE_FRACTION {
                InsightPriority::Medium
            } else {
                InsightPriority::Low
            };
            out.push(build(
                "sustained_growth",
                ctx,
                format!("Growing demand: {}", name),
                format!(
                    "Units of {} are growing by about {:.1}% per day. \
                     Ensure supply keeps pace with the trend.",
                    name,
                    slope_fraction * 100.0
                ),
                InsightCategory::Growth,
                priority,
                Some(name.to_string()),
            ));
        }
    }
    out
}

/// A top earner with flat demand tolerates a price review.
fn pricing_opportunity(ctx: &RuleContext<'_>) -> Vec<Insight> {
    let total = ctx.total_revenue_f64();
    if total <= 0.0 {
        return Vec::new();
    }
    let mut out = Vec::new();
    for drug in &ctx.metrics.top_drugs {
        let share = drug.revenue.to_f64().unwrap_or(0.0) / total;
        if share < PRICING_REVENUE_SHARE {
            continue;
        }
        let Some(series) = ctx.series.get(&drug.name) else { continue };
        let recent = series.recent_average(series.len());
        if recent <= 0.0 {
            continue;
        }
        let slope_fraction = series.recent_slope(series.len()) / recent;
        if slope_fraction.abs() <= FLAT_SLOPE_FRACTION {
            out.push(build(
                "pricing_opportunity",
                ctx,
                format!("Pricing opportunity: {}", drug.name),
                format!(
                    "{} drives {:.0}% of revenue with stable demand. \
                     A measured price adjustment is unlikely to move volume.",
                    drug.name,
                    share * 100.0
                ),
                InsightCategory::Pricing,
                InsightPriority::Medium,
                Some(drug.name.clone()),
            ));
        }
    }
    out
}

/// Aggregate weekend volume notably below weekday volume.
fn weekend_slowdown(ctx: &RuleContext<'_>) -> Vec<Insight> {
    use chrono::Datelike;

    let mut weekend = (0u64, 0u32);
    let mut weekday = (0u64, 0u32);
    for series in ctx.series.values() {
        for (date, &units) in series.dates.iter().zip(series.values.iter()) {
            let bucket = if matches!(date.weekday(), chrono::Weekday::Sat | chrono::Weekday::Sun) {
                &mut weekend
            } else {
                &mut weekday
            };
            bucket.0 += units;
            bucket.1 += 1;
        }
    }
    if weekend.1 == 0 || weekday.1 == 0 {
        return Vec::new();
    }

    let weekend_avg = weekend.0 as f64 / weekend.1 as f64;
    let weekday_avg = weekday.0 as f64 / weekday.1 as f64;
    if weekday_avg <= 0.0 || weekend_avg / weekday_avg >= WEEKEND_SLOWDOWN_RATIO {
        return Vec::new();
    }

    vec![build(
        "weekend_slowdown",
        ctx,
        "Weekend slowdown".to_string(),
        format!(
            "Weekend volume runs at {:.0}% of weekday volume. \
             Consider adjusted weekend staffing or targeted weekend offers.",
            weekend_avg / weekday_avg * 100.0
        ),
        InsightCategory::Operations,
        InsightPriority::Low,
        None,
    )]
}

/// One category dominating the revenue mix.
fn category_concentration(ctx: &RuleContext<'_>) -> Vec<Insight> {
    let total = ctx.total_revenue_f64();
    if total <= 0.0 {
        return Vec::new();
    }
    let Some(top) = ctx.metrics.categories.first() else {
        return Vec::new();
    };
    let share = top.revenue.to_f64().unwrap_or(0.0) / total;
    if share < CATEGORY_CONCENTRATION_SHARE {
        return Vec::new();
    }

    vec![build(
        "category_concentration",
        ctx,
        format!("Revenue concentrated in {}", top.name),
        format!(
            "{} accounts for {:.0}% of revenue. Broadening the mix \
             would reduce exposure to a single-category downturn.",
            top.name,
            share * 100.0
        ),
        InsightCategory::Marketing,
        InsightPriority::Medium,
        None,
    )]
}

/// Insight generation service. Stateless; the registry is process-wide.
#[derive(Clone, Default)]
pub struct InsightService;

impl InsightService {
    pub fn new() -> Self {
        Self
    }

    /// Run every registered rule and return the results ordered by
    /// severity. The sort is stable, so rules earlier in the registry
    /// come first within a priority tier.
    #[instrument(skip(self, ctx), fields(period_days = ctx.period_days))]
    pub fn generate(&self, ctx: &RuleContext<'_>) -> Vec<Insight> {
        let mut insights: Vec<Insight> = registry()
            .iter()
            .flat_map(|rule| (rule.eval)(ctx))
            .collect();
        insights.sort_by_key(|i| i.priority.rank());
        insights
    }

    /// Narrow a generated batch by optional category and priority filters.
    pub fn filter(
        insights: Vec<Insight>,
        category: Option<InsightCategory>,
        priority: Option<InsightPriority>,
    ) -> Vec<Insight> {
        insights
            .into_iter()
            .filter(|i| category.map_or(true, |c| i.category == c))
            .filter(|i| priority.map_or(true, |p| i.priority == p))
            .collect()
    }
}
