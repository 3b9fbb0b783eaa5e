use axum::{
    extract::{Query, State},
    response::Json,
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::{
    errors::ServiceError,
    handlers::validate_window,
    models::{MetricsSnapshot, SalesRecord, TrendSeries},
    ApiResponse, AppState,
};

/// Build the sales Router scoped under `/api`.
pub fn sales_routes() -> Router<AppState> {
    Router::new()
        .route("/sales", get(list_sales))
        .route("/sales/metrics", get(get_sales_metrics))
        .route("/sales/trends", get(get_sales_trends))
}

/// Query parameters shared by the sales endpoints
#[derive(Debug, Deserialize, IntoParams)]
pub struct SalesQuery {
    /// Restrict to a single catalog drug (case-insensitive)
    pub drug: Option<String>,
    /// Trailing window in days (default: 30)
    #[param(minimum = 1, maximum = 365)]
    pub days: Option<u32>,
}

impl SalesQuery {
    fn window(&self, default_days: u32) -> Result<u32, ServiceError> {
        validate_window(self.days.unwrap_or(default_days))
    }
}

/// Raw records plus the count shown alongside the dashboard table.
#[derive(Debug, Serialize, ToSchema)]
pub struct SalesList {
    pub sales: Vec<SalesRecord>,
    pub total: usize,
}

/// List raw daily sales records for the requested window
#[utoipa::path(
    get,
    path = "/api/sales",
    params(SalesQuery),
    responses(
        (status = 200, description = "Sales records retrieved successfully", body = ApiResponse<SalesList>),
        (status = 400, description = "Unknown drug or invalid window", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Sales"
)]
pub async fn list_sales(
    State(state): State<AppState>,
    Query(params): Query<SalesQuery>,
) -> Result<Json<ApiResponse<SalesList>>, ServiceError> {
    let days = params.window(state.config.metrics_window_days)?;
    let sales = state.store.fetch_series(params.drug.as_deref(), days).await?;
    let total = sales.len();
    Ok(Json(ApiResponse::success(SalesList { sales, total })))
}

/// Aggregated sales metrics for the requested window
#[utoipa::path(
    get,
    path = "/api/sales/metrics",
    params(SalesQuery),
    responses(
        (status = 200, description = "Sales metrics retrieved successfully", body = ApiResponse<MetricsSnapshot>),
        (status = 400, description = "Unknown drug or invalid window", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Sales"
)]
pub async fn get_sales_metrics(
    State(state): State<AppState>,
    Query(params): Query<SalesQuery>,
) -> Result<Json<ApiResponse<MetricsSnapshot>>, ServiceError> {
    let days = params.window(state.config.metrics_window_days)?;
    let records = state.store.fetch_series(params.drug.as_deref(), days).await?;

    let snapshot = match state.metrics.compute_metrics(&records, days) {
        Ok(snapshot) => snapshot,
        // An empty window is a valid dashboard state, not a failure.
        Err(ServiceError::InsufficientData(_)) => MetricsSnapshot::empty(days),
        Err(e) => return Err(e),
    };
    Ok(Json(ApiResponse::success(snapshot)))
}

/// Dense daily units/revenue series for charting
#[utoipa::path(
    get,
    path = "/api/sales/trends",
    params(SalesQuery),
    responses(
        (status = 200, description = "Sales trends retrieved successfully", body = ApiResponse<TrendSeries>),
        (status = 400, description = "Unknown drug or invalid window", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Sales"
)]
pub async fn get_sales_trends(
    State(state): State<AppState>,
    Query(params): Query<SalesQuery>,
) -> Result<Json<ApiResponse<TrendSeries>>, ServiceError> {
    let days = params.window(state.config.trend_window_days)?;
    let records = state.store.fetch_series(params.drug.as_deref(), days).await?;

    let trends = match state.metrics.compute_trends(&records, days) {
        Ok(trends) => trends,
        Err(ServiceError::InsufficientData(_)) => TrendSeries::default(),
        Err(e) => return Err(e),
    };
    Ok(Json(ApiResponse::success(trends)))
}
