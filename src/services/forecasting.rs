//! Demand forecasting.
//!
//! Each forecast call walks a small state machine: select the source,
//! try the configured external endpoint if any, and fall back to the
//! internal synthetic model on any failure. External failure is never
//! surfaced to the caller; it only shows up as `status: "mock"`.
//!
//! The internal model approximates SARIMA behavior with a least-squares
//! trend, per-weekday seasonal factors and bounded noise. The noise is
//! drawn from a PRNG seeded by (drug label, day offset) so identical
//! inputs always produce identical output. That determinism is a hard
//! contract relied on by tests and by insight id stability.

use async_trait::async_trait;
use chrono::{Datelike, Duration, NaiveDate};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tracing::{debug, instrument, warn};

use crate::errors::ServiceError;
use crate::models::{ConfidenceBand, ForecastResult, ForecastStatus};
use crate::store::stable_seed;

/// Model label for the internal synthetic source.
pub const MOCK_MODEL: &str = "Mock SARIMA";
/// Series label when no drug filter is applied.
pub const ALL_DRUGS: &str = "All Drugs";

/// Trailing observations used for the least-squares trend fit.
const TREND_OBSERVATIONS: usize = 30;
/// Observations below this count disable seasonal estimation.
const MIN_SEASONAL_OBSERVATIONS: usize = 7;
const SEASONAL_MIN: f64 = 0.5;
const SEASONAL_MAX: f64 = 1.5;
/// Noise amplitude as a fraction of the trend level at the last observation.
const NOISE_FRACTION: f64 = 0.05;
/// Confidence band half-width at the first forecast day.
const BAND_BASE: f64 = 0.15;
/// Band half-width growth per forecast day.
const BAND_STEP: f64 = 0.01;

/// Ordered-by-date daily unit series for one drug (or all drugs summed).
/// Dates are strictly increasing and dense; gap days carry zero.
#[derive(Debug, Clone, PartialEq)]
pub struct DrugSeries {
    pub label: String,
    pub dates: Vec<NaiveDate>,
    pub values: Vec<u64>,
}

impl DrugSeries {
    /// Build a dense series from per-day totals, zero-filling interior gaps.
    pub fn from_daily_totals(label: impl Into<String>, totals: &[(NaiveDate, u64)]) -> Self {
        let label = label.into();
        let mut dates = Vec::new();
        let mut values = Vec::new();
        if let (Some(&(first, _)), Some(&(last, _))) = (totals.first(), totals.last()) {
            let by_date: HashMap<NaiveDate, u64> = totals.iter().copied().collect();
            let mut date = first;
            while date <= last {
                dates.push(date);
                values.push(by_date.get(&date).copied().unwrap_or(0));
                date += Duration::days(1);
            }
        }
        Self { label, dates, values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Mean units over the trailing `days` observations.
    pub fn recent_average(&self, days: usize) -> f64 {
        let tail = &self.values[self.len().saturating_sub(days)..];
        if tail.is_empty() {
            return 0.0;
        }
        tail.iter().sum::<u64>() as f64 / tail.len() as f64
    }

    /// Least-squares slope over the trailing `days` observations,
    /// in units per day.
    pub fn recent_slope(&self, days: usize) -> f64 {
        let tail = &self.values[self.len().saturating_sub(days)..];
        linear_trend(tail).1
    }
}

/// Payload shape the external forecasting endpoint must return.
#[derive(Debug, Deserialize)]
pub struct ExternalForecastPayload {
    pub historical_dates: Vec<NaiveDate>,
    pub historical_values: Vec<u64>,
    pub forecast_dates: Vec<NaiveDate>,
    pub predicted: Vec<u64>,
    pub confidence_interval: ExternalBand,
    /// Model name declared by the endpoint; falls back to the configured one.
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ExternalBand {
    pub upper: Vec<f64>,
    pub lower: Vec<f64>,
}

impl ExternalForecastPayload {
    fn validate(&self) -> Result<(), ServiceError> {
        let n = self.predicted.len();
        if n == 0
            || self.forecast_dates.len() != n
            || self.confidence_interval.upper.len() != n
            || self.confidence_interval.lower.len() != n
            || self.historical_dates.len() != self.historical_values.len()
        {
            return Err(ServiceError::ExternalForecastUnavailable(
                "misaligned sequences in external payload".into(),
            ));
        }
        Ok(())
    }
}

/// Capability seam for delegating forecasts to an external ML endpoint.
#[async_trait]
pub trait ExternalForecastProvider: Send + Sync {
    fn model_name(&self) -> &str;

    async fn fetch(
        &self,
        drug: Option<&str>,
        horizon_days: u32,
    ) -> Result<ExternalForecastPayload, ServiceError>;
}

/// HTTP implementation of the delegation contract. The client carries a
/// bounded timeout so a slow endpoint can never hold a request hostage.
pub struct HttpForecastProvider {
    client: reqwest::Client,
    base_url: String,
    model_name: String,
}

impl HttpForecastProvider {
    pub fn new(
        base_url: impl Into<String>,
        model_name: impl Into<String>,
        timeout: StdDuration,
    ) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::InternalError(format!("http client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model_name: model_name.into(),
        })
    }
}

#[async_trait]
impl ExternalForecastProvider for HttpForecastProvider {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn fetch(
        &self,
        drug: Option<&str>,
        horizon_days: u32,
    ) -> Result<ExternalForecastPayload, ServiceError> {
        let mut request = self
            .client
            .get(format!("{}/predict", self.base_url))
            .query(&[("days", horizon_days.to_string())]);
        if let Some(name) = drug {
            request = request.query(&[("drug", name)]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ServiceError::ExternalForecastUnavailable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ServiceError::ExternalForecastUnavailable(format!(
                "endpoint returned {}",
                response.status()
            )));
        }

        let payload: ExternalForecastPayload = response
            .json()
            .await
            .map_err(|e| ServiceError::ExternalForecastUnavailable(e.to_string()))?;
        payload.validate()?;
        Ok(payload)
    }
}

/// Forecasting service. Stateless apart from the optional provider handle;
/// concurrent calls are fully independent.
#[derive(Clone, Default)]
pub struct ForecastService {
    provider: Option<Arc<dyn ExternalForecastProvider>>,
}

impl ForecastService {
    pub fn new(provider: Option<Arc<dyn ExternalForecastProvider>>) -> Self {
        Self { provider }
    }

    pub fn has_provider(&self) -> bool {
        self.provider.is_some()
    }

    /// Project `horizon_days` forward from `series`. `drug_filter` is the
    /// filter the series was built with and is forwarded to the external
    /// endpoint when delegation is attempted.
    #[instrument(skip(self, series), fields(drug = %series.label))]
    pub async fn forecast(
        &self,
        series: &DrugSeries,
        horizon_days: u32,
        drug_filter: Option<&str>,
    ) -> Result<ForecastResult, ServiceError> {
        if let Some(provider) = &self.provider {
            match provider.fetch(drug_filter, horizon_days).await {
                Ok(payload) => {
                    debug!(model = provider.model_name(), "external forecast accepted");
                    return Ok(Self::from_external(&series.label, provider.as_ref(), payload));
                }
                Err(e) => {
                    warn!(error = %e, "external forecast failed, using internal model");
                }
            }
        }
        self.internal_forecast(series, horizon_days)
    }

    /// The pure internal path, exposed so fallback behavior can be compared
    /// against it directly.
    pub fn internal_forecast(
        &self,
        series: &DrugSeries,
        horizon_days: u32,
    ) -> Result<ForecastResult, ServiceError> {
        if series.is_empty() {
            return Err(ServiceError::InsufficientData(format!(
                "no history for {}",
                series.label
            )));
        }

        let n = series.len();
        let window = n.min(TREND_OBSERVATIONS);
        let tail_values = &series.values[n - window..];
        let tail_dates = &series.dates[n - window..];
        let (intercept, slope) = linear_trend(tail_values);

        let seasonal = if n < MIN_SEASONAL_OBSERVATIONS {
            [1.0; 7]
        } else {
            seasonal_factors(tail_dates, tail_values, intercept, slope)
        };

        // Noise scale follows the trend level at the last observation.
        let level = (intercept + slope * (window as f64 - 1.0)).abs();
        let last_date = *series.dates.last().ok_or_else(|| {
            ServiceError::InsufficientData(format!("no history for {}", series.label))
        })?;

        let horizon = horizon_days as usize;
        let mut forecast_dates = Vec::with_capacity(horizon);
        let mut predicted = Vec::with_capacity(horizon);
        let mut upper = Vec::with_capacity(horizon);
        let mut lower = Vec::with_capacity(horizon);

        for i in 0..horizon {
            let date = last_date + Duration::days(i as i64 + 1);
            let t = window as f64 + i as f64;
            let trend = intercept + slope * t;
            let factor = seasonal[date.weekday().num_days_from_monday() as usize];
            let noise = bounded_noise(&series.label, i as u64, level * NOISE_FRACTION);
            let point = (trend * factor + noise).round().max(0.0) as u64;

            let half_width = BAND_BASE + BAND_STEP * i as f64;
            forecast_dates.push(date);
            predicted.push(point);
            upper.push(point as f64 * (1.0 + half_width));
            lower.push((point as f64 * (1.0 - half_width)).max(0.0));
        }

        Ok(ForecastResult {
            drug: series.label.clone(),
            model: MOCK_MODEL.to_string(),
            status: ForecastStatus::Mock,
            historical_dates: series.dates.clone(),
            historical_values: series.values.clone(),
            forecast_dates,
            predicted,
            confidence_interval: ConfidenceBand { upper, lower },
        })
    }

    /// Forecast several drugs in one pass. A failure in one drug's forecast
    /// never affects the others; it is logged and skipped.
    pub async fn forecast_all(
        &self,
        series: &HashMap<String, DrugSeries>,
        horizon_days: u32,
    ) -> HashMap<String, ForecastResult> {
        let futures = series.iter().map(|(name, series)| async move {
            let result = self.forecast(series, horizon_days, Some(name.as_str())).await;
            (name.clone(), result)
        });

        let mut results = HashMap::with_capacity(series.len());
        for (name, result) in futures::future::join_all(futures).await {
            match result {
                Ok(forecast) => {
                    results.insert(name, forecast);
                }
                Err(e) => warn!(drug = %name, error = %e, "skipping forecast"),
            }
        }
        results
    }

    fn from_external(
        label: &str,
        provider: &dyn ExternalForecastProvider,
        payload: ExternalForecastPayload,
    ) -> ForecastResult {
        let model = payload
            .model
            .unwrap_or_else(|| provider.model_name().to_string());
        ForecastResult {
            drug: label.to_string(),
            model,
            status: ForecastStatus::Live,
            historical_dates: payload.historical_dates,
            historical_values: payload.historical_values,
            forecast_dates: payload.forecast_dates,
            predicted: payload.predicted,
            confidence_interval: ConfidenceBand {
                upper: payload.confidence_interval.upper,
                lower: payload.confidence_interval.lower,
            },
        }
    }
}

/// Least-squares fit over `values` at t = 0..len-1; returns (intercept, slope).
fn linear_trend(values: &[u64]) -> (f64, f64) {
    let m = values.len();
    if m == 0 {
        return (0.0, 0.0);
    }
    if m == 1 {
        return (values[0] as f64, 0.0);
    }

    let mf = m as f64;
    let mean_t = (mf - 1.0) / 2.0;
    let mean_v = values.iter().sum::<u64>() as f64 / mf;

    let mut num = 0.0;
    let mut den = 0.0;
    for (t, &v) in values.iter().enumerate() {
        let dt = t as f64 - mean_t;
        num += dt * (v as f64 - mean_v);
        den += dt * dt;
    }
    let slope = if den > 0.0 { num / den } else { 0.0 };
    (mean_v - slope * mean_t, slope)
}

/// Mean ratio of observed value to fitted trend per weekday, clamped to
/// [0.5, 1.5]. Weekdays with no usable observations default to 1.0.
fn seasonal_factors(
    dates: &[NaiveDate],
    values: &[u64],
    intercept: f64,
    slope: f64,
) -> [f64; 7] {
    let mut sums = [0.0f64; 7];
    let mut counts = [0u32; 7];
    for (t, (date, &value)) in dates.iter().zip(values.iter()).enumerate() {
        let trend = intercept + slope * t as f64;
        if trend > f64::EPSILON {
            let idx = date.weekday().num_days_from_monday() as usize;
            sums[idx] += value as f64 / trend;
            counts[idx] += 1;
        }
    }

    let mut factors = [1.0f64; 7];
    for i in 0..7 {
        if counts[i] > 0 {
            factors[i] = (sums[i] / counts[i] as f64).clamp(SEASONAL_MIN, SEASONAL_MAX);
        }
    }
    factors
}

/// Deterministic perturbation in [-amplitude, amplitude], keyed by
/// (series label, forecast day offset).
fn bounded_noise(label: &str, day_offset: u64, amplitude: f64) -> f64 {
    let mut rng = StdRng::seed_from_u64(stable_seed(&format!("{}:noise:{}", label, day_offset)));
    rng.gen_range(-1.0..=1.0) * amplitude
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(label: &str, values: &[u64]) -> DrugSeries {
        let start = NaiveDate::from_ymd_opt(2025, 8, 1).unwrap();
        let totals: Vec<(NaiveDate, u64)> = values
            .iter()
            .enumerate()
            .map(|(i, &v)| (start + Duration::days(i as i64), v))
            .collect();
        DrugSeries::from_daily_totals(label, &totals)
    }

    #[test]
    fn linear_trend_recovers_line() {
        // v = 10 + 3t
        let values: Vec<u64> = (0..10).map(|t| 10 + 3 * t).collect();
        let (intercept, slope) = linear_trend(&values);
        assert!((slope - 3.0).abs() < 1e-9);
        assert!((intercept - 10.0).abs() < 1e-9);
    }

    #[test]
    fn linear_trend_flat_on_constant() {
        let (intercept, slope) = linear_trend(&[100, 100, 100, 100]);
        assert!(slope.abs() < 1e-9);
        assert!((intercept - 100.0).abs() < 1e-9);
    }

    #[test]
    fn seasonal_factors_are_clamped() {
        let dates: Vec<NaiveDate> = (0..14)
            .map(|i| NaiveDate::from_ymd_opt(2025, 8, 4).unwrap() + Duration::days(i))
            .collect();
        // Mondays carry an extreme spike; the factor must still stay <= 1.5.
        let values: Vec<u64> = dates
            .iter()
            .map(|d| if d.weekday() == chrono::Weekday::Mon { 1000 } else { 100 })
            .collect();
        let (intercept, slope) = linear_trend(&values);
        let factors = seasonal_factors(&dates, &values, intercept, slope);
        for f in factors {
            assert!((SEASONAL_MIN..=SEASONAL_MAX).contains(&f));
        }
    }

    #[test]
    fn short_series_skips_seasonality_without_failing() {
        let svc = ForecastService::new(None);
        let result = svc.internal_forecast(&series("Gabapentin", &[90, 110, 95]), 7);
        let forecast = result.expect("short history must not fail the request");
        assert_eq!(forecast.predicted.len(), 7);
        assert_eq!(forecast.status, ForecastStatus::Mock);
        assert_eq!(forecast.model, MOCK_MODEL);
    }

    #[test]
    fn empty_series_is_insufficient_data() {
        let svc = ForecastService::new(None);
        let err = svc
            .internal_forecast(&DrugSeries::from_daily_totals("Nothing", &[]), 7)
            .unwrap_err();
        assert!(matches!(err, ServiceError::InsufficientData(_)));
    }

    #[test]
    fn forecast_dates_follow_history_without_gap() {
        let svc = ForecastService::new(None);
        let input = series("Metformin", &[100; 20]);
        let forecast = svc.internal_forecast(&input, 5).unwrap();
        let last_hist = *input.dates.last().unwrap();
        assert_eq!(forecast.forecast_dates[0], last_hist + Duration::days(1));
        assert!(forecast
            .forecast_dates
            .windows(2)
            .all(|w| w[1] - w[0] == Duration::days(1)));
    }

    #[test]
    fn noise_is_keyed_by_label_and_offset() {
        let a = bounded_noise("Paracetamol", 0, 5.0);
        let b = bounded_noise("Paracetamol", 0, 5.0);
        let c = bounded_noise("Paracetamol", 1, 5.0);
        let d = bounded_noise("Ibuprofen", 0, 5.0);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
        assert!(a.abs() <= 5.0);
    }

    #[test]
    fn dense_series_zero_fills_interior_gaps() {
        let start = NaiveDate::from_ymd_opt(2025, 8, 1).unwrap();
        let totals = vec![
            (start, 10),
            (start + Duration::days(3), 12),
        ];
        let s = DrugSeries::from_daily_totals("Omeprazole", &totals);
        assert_eq!(s.values, vec![10, 0, 0, 12]);
        assert_eq!(s.dates.len(), 4);
    }
}
