use axum::{
    extract::{Query, State},
    response::Json,
    routing::get,
    Router,
};
use serde::Deserialize;
use utoipa::IntoParams;

use crate::{
    errors::ServiceError,
    models::ForecastResult,
    services::forecasting::{DrugSeries, ALL_DRUGS, MOCK_MODEL},
    ApiResponse, AppState,
};

/// Longest forecast horizon, in days.
pub const MAX_FORECAST_DAYS: u32 = 90;
const DEFAULT_FORECAST_DAYS: u32 = 30;

/// Build the forecasting Router scoped under `/api`.
pub fn forecast_routes() -> Router<AppState> {
    Router::new().route("/predict", get(predict))
}

/// Query parameters for demand prediction
#[derive(Debug, Deserialize, IntoParams)]
pub struct PredictQuery {
    /// Restrict to a single catalog drug (case-insensitive)
    pub drug: Option<String>,
    /// Forecast horizon in days (default: 30)
    #[param(minimum = 1, maximum = 90)]
    pub days: Option<u32>,
}

/// Demand forecast with history and a widening confidence band.
///
/// Delegates to the configured external model when one is available and
/// falls back to the internal synthetic model otherwise; the `status`
/// field says which source produced the answer.
#[utoipa::path(
    get,
    path = "/api/predict",
    params(PredictQuery),
    responses(
        (status = 200, description = "Forecast produced successfully", body = ApiResponse<ForecastResult>),
        (status = 400, description = "Unknown drug or invalid horizon", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Forecasting"
)]
pub async fn predict(
    State(state): State<AppState>,
    Query(params): Query<PredictQuery>,
) -> Result<Json<ApiResponse<ForecastResult>>, ServiceError> {
    let horizon = params.days.unwrap_or(DEFAULT_FORECAST_DAYS);
    if !(1..=MAX_FORECAST_DAYS).contains(&horizon) {
        return Err(ServiceError::ValidationError(format!(
            "days must be between 1 and {}",
            MAX_FORECAST_DAYS
        )));
    }

    // Resolve the filter against the catalog up front so an unknown drug
    // is a 400 rather than an empty forecast.
    let label = match params.drug.as_deref() {
        Some(name) => state
            .store
            .find_drug(name)
            .map(|d| d.name.clone())
            .ok_or_else(|| ServiceError::InvalidFilter(format!("Unknown drug: {}", name)))?,
        None => ALL_DRUGS.to_string(),
    };
    let drug_filter = params.drug.as_ref().map(|_| label.as_str());

    let totals = state
        .store
        .fetch_daily_totals(drug_filter, state.config.trend_window_days)
        .await?;
    let series = DrugSeries::from_daily_totals(label.clone(), &totals);

    let forecast = match state.forecasting.forecast(&series, horizon, drug_filter).await {
        Ok(forecast) => forecast,
        // No history is a valid dashboard state, not a failure.
        Err(ServiceError::InsufficientData(_)) => ForecastResult::empty(label, MOCK_MODEL),
        Err(e) => return Err(e),
    };
    Ok(Json(ApiResponse::success(forecast)))
}
