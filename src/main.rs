use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Utc;
use tokio::signal;
use tower_http::{compression::CompressionLayer, trace::TraceLayer};
use tracing::{error, info};

use pharma_insights_api::auth::{AuthConfig, AuthService};
use pharma_insights_api::services::forecasting::{
    ExternalForecastProvider, ForecastService, HttpForecastProvider,
};
use pharma_insights_api::services::insights::InsightService;
use pharma_insights_api::services::metrics::MetricsService;
use pharma_insights_api::store::SampleSeriesStore;
use pharma_insights_api::{app_router, config, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = config::load_config()?;
    config::init_tracing(cfg.log_level(), cfg.log_json);

    // Sample history is anchored on today; every request sees the same data.
    let store = Arc::new(SampleSeriesStore::new(
        Utc::now().date_naive(),
        cfg.sample_lookback_days,
    ));

    // External delegation is optional; without it every forecast is internal.
    let provider: Option<Arc<dyn ExternalForecastProvider>> = match cfg.ml_api_url.as_deref() {
        Some(url) => {
            info!("External forecast endpoint configured: {}", url);
            Some(Arc::new(HttpForecastProvider::new(
                url,
                cfg.ml_model_name.clone(),
                cfg.ml_api_timeout(),
            )?))
        }
        None => {
            info!("No external forecast endpoint configured; using the internal model");
            None
        }
    };
    let forecasting = Arc::new(ForecastService::new(provider));

    let auth_service = Arc::new(AuthService::new(AuthConfig {
        jwt_secret: cfg.jwt_secret.clone(),
        token_expiration: cfg.jwt_expiration,
    }));

    let app_state = AppState {
        config: Arc::new(cfg.clone()),
        store,
        metrics: MetricsService::new(),
        forecasting,
        insights: InsightService::new(),
        auth: auth_service,
    };

    // Build CORS layer from config
    let cors_layer = match pharma_insights_api::build_cors_layer(&cfg) {
        Ok(layer) => layer,
        Err(msg) => {
            error!("{}", msg);
            return Err(msg.into());
        }
    };

    let app = app_router(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors_layer);

    // Bind and serve
    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.port));
    info!("pharma-insights-api listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install signal handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
