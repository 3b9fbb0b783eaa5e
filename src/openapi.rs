use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Pharma Insights API",
        version = "0.2.0",
        description = r#"
# Pharma Insights API

Analytics backend for a pharmacy sales dashboard: aggregated sales
metrics, daily trend series, demand forecasting and rule-driven
business insights over a ten-drug catalog.

## Authentication

Register or log in under `/auth` and send the issued token with every
`/api` request:

```
Authorization: Bearer <your-jwt-token>
```

## Forecast sources

`GET /api/predict` delegates to an external ML endpoint when one is
configured and falls back to the internal synthetic model otherwise;
the response `status` field (`live` or `mock`) says which source
produced the answer.
        "#,
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "auth", description = "Account registration and login"),
        (name = "Sales", description = "Raw records, metrics and trends"),
        (name = "Forecasting", description = "Demand projection endpoints"),
        (name = "Insights", description = "Rule-driven recommendations"),
        (name = "Catalog", description = "Drug catalog")
    ),
    paths(
        crate::auth::register_handler,
        crate::auth::login_handler,
        crate::auth::me_handler,
        crate::handlers::sales::list_sales,
        crate::handlers::sales::get_sales_metrics,
        crate::handlers::sales::get_sales_trends,
        crate::handlers::forecasts::predict,
        crate::handlers::insights::get_insights,
        crate::handlers::drugs::list_drugs,
    ),
    components(
        schemas(
            crate::ApiResponse<serde_json::Value>,
            crate::models::SalesRecord,
            crate::models::DrugInfo,
            crate::models::DrugTotals,
            crate::models::CategoryTotals,
            crate::models::MetricsSnapshot,
            crate::models::TrendSeries,
            crate::models::ForecastStatus,
            crate::models::ConfidenceBand,
            crate::models::ForecastResult,
            crate::models::InsightCategory,
            crate::models::InsightPriority,
            crate::models::Insight,
            crate::handlers::sales::SalesList,
            crate::handlers::insights::InsightList,
            crate::auth::RegisterRequest,
            crate::auth::LoginRequest,
            crate::auth::AuthSession,
            crate::auth::UserProfile,
            crate::errors::ErrorResponse
        )
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDoc::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}
