//! Pharma Insights API Library
//!
//! This crate provides the analytics core for a pharmacy sales dashboard:
//! metrics aggregation, demand forecasting and rule-driven insights over a
//! deterministic sample sales history.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod auth;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod openapi;
pub mod services;
pub mod store;

use axum::http::{header, HeaderValue, Method};
use axum::{extract::State, response::Json, routing::get, Router};
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use utoipa::ToSchema;

use crate::auth::{AuthRouterExt, AuthService};
use crate::services::forecasting::ForecastService;
use crate::services::insights::InsightService;
use crate::services::metrics::MetricsService;
use crate::store::SeriesStore;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<config::AppConfig>,
    pub store: Arc<dyn SeriesStore>,
    pub metrics: MetricsService,
    pub forecasting: Arc<ForecastService>,
    pub insights: InsightService,
    pub auth: Arc<AuthService>,
}

// Common response wrappers
#[derive(Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub errors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Serialize, ToSchema)]
pub struct ResponseMeta {
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message),
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }
}

/// Build the `/api` router: open status endpoint plus bearer-gated
/// analytics routes.
pub fn api_routes() -> Router<AppState> {
    let protected = Router::new()
        .merge(handlers::sales::sales_routes())
        .merge(handlers::forecasts::forecast_routes())
        .merge(handlers::insights::insight_routes())
        .merge(handlers::drugs::drug_routes())
        .with_auth();

    Router::new()
        .route("/status", get(api_status))
        .merge(protected)
}

/// Assemble the full application router. Shared by `main` and the
/// integration tests so both exercise identical middleware.
pub fn app_router(state: AppState) -> Router {
    let auth_service = state.auth.clone();

    Router::new()
        .route("/health", get(health_check))
        .nest("/api", api_routes())
        .nest(
            "/auth",
            auth::auth_routes().with_state(state.auth.clone()),
        )
        .merge(openapi::swagger_ui())
        .layer(axum::middleware::from_fn(request_logging_middleware))
        // The auth middleware pulls the service out of request extensions.
        .layer(axum::Extension(auth_service))
        .with_state(state)
}

/// Build the CORS layer from config.
///
/// Credentialed CORS cannot use wildcard methods or headers; tower-http
/// rejects the combination while writing response headers. Explicit
/// origins with credentials therefore get a concrete allow list.
pub fn build_cors_layer(cfg: &config::AppConfig) -> Result<CorsLayer, String> {
    let configured_origins: Option<Vec<HeaderValue>> = cfg
        .cors_allowed_origins
        .as_ref()
        .map(|raw| {
            raw.split(',')
                .filter_map(|origin| {
                    let trimmed = origin.trim();
                    if trimmed.is_empty() {
                        None
                    } else {
                        HeaderValue::from_str(trimmed).ok()
                    }
                })
                .collect::<Vec<_>>()
        })
        .filter(|origins| !origins.is_empty());

    if let Some(origins) = configured_origins {
        let layer = CorsLayer::new().allow_origin(origins);
        let layer = if cfg.cors_allow_credentials {
            layer
                .allow_methods([
                    Method::GET,
                    Method::POST,
                    Method::PUT,
                    Method::DELETE,
                    Method::OPTIONS,
                ])
                .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT])
                .allow_credentials(true)
        } else {
            layer.allow_methods(Any).allow_headers(Any)
        };
        Ok(layer)
    } else if cfg.should_allow_permissive_cors() {
        tracing::info!(
            "Using permissive CORS because explicit origins were not configured ({})",
            if cfg.is_development() {
                "development environment"
            } else {
                "explicit override enabled"
            }
        );
        Ok(CorsLayer::permissive())
    } else {
        Err("Missing CORS configuration: set APP__CORS_ALLOWED_ORIGINS or APP__CORS_ALLOW_ANY_ORIGIN=true".into())
    }
}

async fn api_status() -> Result<Json<ApiResponse<Value>>, errors::ServiceError> {
    let version = env!("CARGO_PKG_VERSION");
    let status_data = json!({
        "status": "ok",
        "version": version,
        "service": "pharma-insights-api",
        "timestamp": Utc::now().to_rfc3339(),
    });

    Ok(Json(ApiResponse::success(status_data)))
}

async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Value>>, errors::ServiceError> {
    let health_data = json!({
        "status": "healthy",
        "ml_api_configured": state.forecasting.has_provider(),
        "drugs": state.store.catalog().len(),
        "timestamp": Utc::now().to_rfc3339(),
    });

    Ok(Json(ApiResponse::success(health_data)))
}

// Request logging middleware
async fn request_logging_middleware(
    request: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = std::time::Instant::now();

    tracing::info!(method = %method, uri = %uri, "Incoming request");

    let response = next.run(request).await;

    let duration = start.elapsed();
    let status = response.status();

    tracing::info!(
        method = %method,
        uri = %uri,
        status = status.as_u16(),
        elapsed_ms = duration.as_millis() as u64,
        "Request completed"
    );

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_response_success_shape() {
        let response = ApiResponse::success(json!({"ok": true}));
        assert!(response.success);
        assert!(response.data.is_some());
        assert!(response.message.is_none());
        assert!(response.meta.is_some());
    }

    #[test]
    fn api_response_error_shape() {
        let response: ApiResponse<Value> = ApiResponse::error("boom".into());
        assert!(!response.success);
        assert!(response.data.is_none());
        assert_eq!(response.message.as_deref(), Some("boom"));
    }
}
