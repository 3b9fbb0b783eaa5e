use axum::{
    extract::{Query, State},
    response::Json,
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use utoipa::{IntoParams, ToSchema};

use crate::{
    errors::ServiceError,
    handlers::validate_window,
    models::{Insight, InsightCategory, InsightPriority, MetricsSnapshot},
    services::forecasting::DrugSeries,
    services::insights::{InsightService, RuleContext},
    ApiResponse, AppState,
};

/// Horizon used for the restock-risk projection, in days.
const INSIGHT_FORECAST_DAYS: u32 = 7;

/// Build the insights Router scoped under `/api`.
pub fn insight_routes() -> Router<AppState> {
    Router::new().route("/insights", get(get_insights))
}

/// Query parameters for insight generation
#[derive(Debug, Deserialize, IntoParams)]
pub struct InsightsQuery {
    /// Trailing window in days (default: 30)
    #[param(minimum = 1, maximum = 365)]
    pub days: Option<u32>,
    /// Only return insights in this business area
    pub category: Option<String>,
    /// Only return insights at this urgency tier
    pub priority: Option<String>,
}

/// Filtered insights plus the count shown on the dashboard badge.
#[derive(Debug, Serialize, ToSchema)]
pub struct InsightList {
    pub insights: Vec<Insight>,
    pub total: usize,
}

/// Prioritized recommendations derived from the current sales picture
#[utoipa::path(
    get,
    path = "/api/insights",
    params(InsightsQuery),
    responses(
        (status = 200, description = "Insights generated successfully", body = ApiResponse<InsightList>),
        (status = 400, description = "Invalid filter or window", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Insights"
)]
pub async fn get_insights(
    State(state): State<AppState>,
    Query(params): Query<InsightsQuery>,
) -> Result<Json<ApiResponse<InsightList>>, ServiceError> {
    let days = validate_window(params.days.unwrap_or(state.config.metrics_window_days))?;

    let category = params
        .category
        .as_deref()
        .map(|raw| {
            InsightCategory::from_str(raw)
                .map_err(|_| ServiceError::InvalidFilter(format!("Unknown category: {}", raw)))
        })
        .transpose()?;
    let priority = params
        .priority
        .as_deref()
        .map(|raw| {
            InsightPriority::from_str(raw)
                .map_err(|_| ServiceError::InvalidFilter(format!("Unknown priority: {}", raw)))
        })
        .transpose()?;

    let records = state.store.fetch_series(None, days).await?;
    let metrics = match state.metrics.compute_metrics(&records, days) {
        Ok(snapshot) => snapshot,
        Err(ServiceError::InsufficientData(_)) => MetricsSnapshot::empty(days),
        Err(e) => return Err(e),
    };

    // Per-drug series feed the trend rules and the restock projection.
    let mut series: HashMap<String, DrugSeries> = HashMap::new();
    for drug in state.store.catalog().to_vec() {
        let totals = state.store.fetch_daily_totals(Some(&drug.name), days).await?;
        series.insert(
            drug.name.clone(),
            DrugSeries::from_daily_totals(drug.name.clone(), &totals),
        );
    }
    let forecasts = state
        .forecasting
        .forecast_all(&series, INSIGHT_FORECAST_DAYS)
        .await;

    let ctx = RuleContext {
        metrics: &metrics,
        forecasts: &forecasts,
        series: &series,
        period_days: days,
    };
    let insights = InsightService::filter(state.insights.generate(&ctx), category, priority);
    let total = insights.len();
    Ok(Json(ApiResponse::success(InsightList { insights, total })))
}
