use chrono::{Duration, NaiveDate};
use proptest::prelude::*;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use pharma_insights_api::models::ForecastStatus;
use pharma_insights_api::services::forecasting::{
    DrugSeries, ForecastService, HttpForecastProvider,
};

fn series(label: &str, values: &[u64]) -> DrugSeries {
    let start = NaiveDate::from_ymd_opt(2025, 7, 1).unwrap();
    let totals: Vec<(NaiveDate, u64)> = values
        .iter()
        .enumerate()
        .map(|(i, &v)| (start + Duration::days(i as i64), v))
        .collect();
    DrugSeries::from_daily_totals(label, &totals)
}

fn weekly_series(label: &str, days: usize) -> DrugSeries {
    // Rising trend with a weekly dip, enough shape to exercise seasonality.
    let values: Vec<u64> = (0..days)
        .map(|i| {
            let base = 100 + i as u64;
            if i % 7 >= 5 {
                base * 8 / 10
            } else {
                base
            }
        })
        .collect();
    series(label, &values)
}

#[test]
fn identical_inputs_yield_identical_forecasts() {
    let svc = ForecastService::new(None);
    let input = weekly_series("Paracetamol", 60);
    let a = svc.internal_forecast(&input, 30).unwrap();
    let b = svc.internal_forecast(&input, 30).unwrap();
    assert_eq!(a, b);
}

#[test]
fn confidence_band_contains_prediction_and_widens() {
    let svc = ForecastService::new(None);
    let forecast = svc
        .internal_forecast(&weekly_series("Metformin", 45), 30)
        .unwrap();

    for i in 0..forecast.predicted.len() {
        let predicted = forecast.predicted[i] as f64;
        let upper = forecast.confidence_interval.upper[i];
        let lower = forecast.confidence_interval.lower[i];
        assert!(upper >= predicted, "upper below prediction at day {}", i);
        assert!(predicted >= lower, "lower above prediction at day {}", i);
        assert!(lower >= 0.0, "negative lower bound at day {}", i);

        if forecast.predicted[i] > 0 {
            // Relative width grows by exactly two points per day out.
            let relative = (upper - lower) / predicted;
            let expected = 0.30 + 0.02 * i as f64;
            assert!(
                (relative - expected).abs() < 1e-9,
                "relative width {} != {} at day {}",
                relative,
                expected,
                i
            );
        }
    }
}

#[test]
fn history_is_echoed_unchanged() {
    let svc = ForecastService::new(None);
    let input = weekly_series("Omeprazole", 21);
    let forecast = svc.internal_forecast(&input, 7).unwrap();
    assert_eq!(forecast.historical_dates, input.dates);
    assert_eq!(forecast.historical_values, input.values);
    assert_eq!(forecast.forecast_dates.len(), 7);
}

#[tokio::test]
async fn external_success_is_reported_live() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/predict"))
        .and(query_param("days", "3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "historical_dates": ["2025-08-20", "2025-08-21"],
            "historical_values": [100, 110],
            "forecast_dates": ["2025-08-22", "2025-08-23", "2025-08-24"],
            "predicted": [105, 108, 111],
            "confidence_interval": {
                "upper": [120.0, 125.0, 130.0],
                "lower": [90.0, 88.0, 86.0]
            },
            "model": "SARIMA v2"
        })))
        .mount(&server)
        .await;

    let provider =
        HttpForecastProvider::new(server.uri(), "External ML", StdDuration::from_secs(1)).unwrap();
    let svc = ForecastService::new(Some(Arc::new(provider)));

    let forecast = svc
        .forecast(&weekly_series("Paracetamol", 30), 3, Some("Paracetamol"))
        .await
        .unwrap();
    assert_eq!(forecast.status, ForecastStatus::Live);
    assert_eq!(forecast.model, "SARIMA v2");
    assert_eq!(forecast.predicted, vec![105, 108, 111]);
}

#[tokio::test]
async fn external_error_falls_back_to_internal_model() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/predict"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let provider =
        HttpForecastProvider::new(server.uri(), "External ML", StdDuration::from_secs(1)).unwrap();
    let svc = ForecastService::new(Some(Arc::new(provider)));
    let input = weekly_series("Ibuprofen", 30);

    let fallback = svc.forecast(&input, 14, Some("Ibuprofen")).await.unwrap();
    assert_eq!(fallback.status, ForecastStatus::Mock);

    // Fallback output is exactly what the internal model alone produces.
    let internal = ForecastService::new(None)
        .internal_forecast(&input, 14)
        .unwrap();
    assert_eq!(fallback, internal);
}

#[tokio::test]
async fn malformed_external_payload_falls_back() {
    let server = MockServer::start().await;
    // Sequence lengths disagree; the payload must be rejected.
    Mock::given(method("GET"))
        .and(path("/predict"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "historical_dates": [],
            "historical_values": [],
            "forecast_dates": ["2025-08-22", "2025-08-23"],
            "predicted": [105],
            "confidence_interval": { "upper": [120.0], "lower": [90.0] }
        })))
        .mount(&server)
        .await;

    let provider =
        HttpForecastProvider::new(server.uri(), "External ML", StdDuration::from_secs(1)).unwrap();
    let svc = ForecastService::new(Some(Arc::new(provider)));

    let forecast = svc
        .forecast(&weekly_series("Gabapentin", 30), 7, Some("Gabapentin"))
        .await
        .unwrap();
    assert_eq!(forecast.status, ForecastStatus::Mock);
}

#[tokio::test]
async fn slow_external_endpoint_falls_back_within_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/predict"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(StdDuration::from_secs(5))
                .set_body_json(json!({})),
        )
        .mount(&server)
        .await;

    let provider =
        HttpForecastProvider::new(server.uri(), "External ML", StdDuration::from_millis(200))
            .unwrap();
    let svc = ForecastService::new(Some(Arc::new(provider)));

    let forecast = svc
        .forecast(&weekly_series("Amoxicillin", 30), 7, Some("Amoxicillin"))
        .await
        .unwrap();
    assert_eq!(forecast.status, ForecastStatus::Mock);
}

#[test]
fn constant_series_forecasts_near_its_level() {
    // 14 days of 100 units: trend is flat, seasonal factors are 1.0, and
    // only the 5% bounded noise moves the prediction.
    let svc = ForecastService::new(None);
    let forecast = svc
        .internal_forecast(&series("Amoxicillin", &[100; 14]), 7)
        .unwrap();

    for (i, &point) in forecast.predicted.iter().enumerate() {
        assert!(
            (90..=110).contains(&point),
            "day {} prediction {} strayed from level",
            i,
            point
        );
        // Band half-width runs 15% on day one up to 21% on day seven.
        let expected_half = 0.15 + 0.01 * i as f64;
        let upper = forecast.confidence_interval.upper[i];
        assert!((upper - point as f64 * (1.0 + expected_half)).abs() < 1e-9);
    }
}

proptest! {
    #[test]
    fn band_always_contains_prediction(values in prop::collection::vec(0u64..500, 1..60)) {
        let svc = ForecastService::new(None);
        let forecast = svc.internal_forecast(&series("Lisinopril", &values), 14).unwrap();
        for i in 0..forecast.predicted.len() {
            let predicted = forecast.predicted[i] as f64;
            prop_assert!(forecast.confidence_interval.upper[i] >= predicted);
            prop_assert!(predicted >= forecast.confidence_interval.lower[i]);
            prop_assert!(forecast.confidence_interval.lower[i] >= 0.0);
        }
    }
}
