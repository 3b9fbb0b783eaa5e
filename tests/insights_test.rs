//! Insight generation over the deterministic sample history, end to end:
//! store -> metrics -> forecasts -> rules.

use chrono::NaiveDate;
use std::collections::HashMap;

use pharma_insights_api::models::MetricsSnapshot;
use pharma_insights_api::services::forecasting::{DrugSeries, ForecastService};
use pharma_insights_api::services::insights::{InsightService, RuleContext};
use pharma_insights_api::services::metrics::MetricsService;
use pharma_insights_api::store::{SampleSeriesStore, SeriesStore};

const PERIOD_DAYS: u32 = 30;

async fn build_context_inputs(
    store: &SampleSeriesStore,
) -> (
    MetricsSnapshot,
    HashMap<String, DrugSeries>,
    HashMap<String, pharma_insights_api::models::ForecastResult>,
) {
    let records = store.fetch_series(None, PERIOD_DAYS).await.unwrap();
    let metrics = MetricsService::new()
        .compute_metrics(&records, PERIOD_DAYS)
        .unwrap();

    let mut series = HashMap::new();
    for drug in store.catalog().to_vec() {
        let totals = store
            .fetch_daily_totals(Some(&drug.name), PERIOD_DAYS)
            .await
            .unwrap();
        series.insert(
            drug.name.clone(),
            DrugSeries::from_daily_totals(drug.name.clone(), &totals),
        );
    }
    let forecasts = ForecastService::new(None).forecast_all(&series, 7).await;
    (metrics, series, forecasts)
}

#[tokio::test]
async fn generation_is_deterministic_over_sample_data() {
    let anchor = NaiveDate::from_ymd_opt(2025, 8, 26).unwrap();
    let store = SampleSeriesStore::new(anchor, 180);

    let (metrics_a, series_a, forecasts_a) = build_context_inputs(&store).await;
    let (metrics_b, series_b, forecasts_b) = build_context_inputs(&store).await;

    let svc = InsightService::new();
    let first = svc.generate(&RuleContext {
        metrics: &metrics_a,
        forecasts: &forecasts_a,
        series: &series_a,
        period_days: PERIOD_DAYS,
    });
    let second = svc.generate(&RuleContext {
        metrics: &metrics_b,
        forecasts: &forecasts_b,
        series: &series_b,
        period_days: PERIOD_DAYS,
    });

    let ids_first: Vec<&str> = first.iter().map(|i| i.id.as_str()).collect();
    let ids_second: Vec<&str> = second.iter().map(|i| i.id.as_str()).collect();
    assert_eq!(ids_first, ids_second);
    for (a, b) in first.iter().zip(second.iter()) {
        assert_eq!(a.title, b.title);
        assert_eq!(a.priority, b.priority);
    }
}

#[tokio::test]
async fn insights_are_ordered_and_well_formed() {
    let anchor = NaiveDate::from_ymd_opt(2025, 8, 26).unwrap();
    let store = SampleSeriesStore::new(anchor, 180);
    let (metrics, series, forecasts) = build_context_inputs(&store).await;

    let insights = InsightService::new().generate(&RuleContext {
        metrics: &metrics,
        forecasts: &forecasts,
        series: &series,
        period_days: PERIOD_DAYS,
    });

    assert!(insights
        .windows(2)
        .all(|w| w[0].priority.rank() <= w[1].priority.rank()));

    for insight in &insights {
        assert_eq!(insight.id.len(), 12);
        assert!(!insight.title.is_empty());
        assert!(!insight.description.is_empty());
        if let Some(drug) = &insight.drug_name {
            assert!(store.find_drug(drug).is_some(), "unknown drug {}", drug);
        }
    }

    // Ids are unique within a batch.
    let mut ids: Vec<&str> = insights.iter().map(|i| i.id.as_str()).collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), insights.len());
}
