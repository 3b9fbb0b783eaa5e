//! Read-side sales data source.
//!
//! `SeriesStore` is the seam between the analytics engine and whatever
//! actually holds the raw sales rows. The bundled `SampleSeriesStore`
//! synthesizes a reproducible history so the dashboard works without a
//! warehouse connection: every record is derived from a seed keyed by
//! (drug, date), so identical requests always see identical data.

use async_trait::async_trait;
use chrono::{Datelike, Duration, NaiveDate, Weekday};
use once_cell::sync::Lazy;
use rand::{rngs::StdRng, Rng, SeedableRng};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::errors::ServiceError;
use crate::models::{DrugInfo, SalesRecord};

/// Derives a stable 64-bit seed from an arbitrary key.
pub(crate) fn stable_seed(key: &str) -> u64 {
    let digest = Sha256::digest(key.as_bytes());
    u64::from_le_bytes(digest[..8].try_into().expect("digest is 32 bytes"))
}

/// Read contract over the raw sales history.
#[async_trait]
pub trait SeriesStore: Send + Sync {
    /// Fetch records for the trailing `days` window, ordered by date
    /// ascending. When `drug` is given it must name a catalog entry
    /// (case-insensitive); otherwise records for all drugs are returned.
    async fn fetch_series(
        &self,
        drug: Option<&str>,
        days: u32,
    ) -> Result<Vec<SalesRecord>, ServiceError>;

    /// The distinct drug catalog.
    fn catalog(&self) -> &[DrugInfo];

    /// Case-insensitive catalog lookup.
    fn find_drug(&self, name: &str) -> Option<&DrugInfo> {
        self.catalog()
            .iter()
            .find(|d| d.name.eq_ignore_ascii_case(name))
    }

    /// Per-day unit totals across the fetched records, dense over the days
    /// that actually carry sales.
    async fn fetch_daily_totals(
        &self,
        drug: Option<&str>,
        days: u32,
    ) -> Result<Vec<(NaiveDate, u64)>, ServiceError> {
        let records = self.fetch_series(drug, days).await?;
        let mut totals: BTreeMap<NaiveDate, u64> = BTreeMap::new();
        for record in &records {
            *totals.entry(record.date).or_insert(0) += record.units_sold;
        }
        Ok(totals.into_iter().collect())
    }
}

static CATALOG: Lazy<Vec<DrugInfo>> = Lazy::new(|| {
    let entries: [(&str, &str, Decimal); 10] = [
        ("Paracetamol", "Pain Relief", dec!(5.99)),
        ("Amoxicillin", "Antibiotics", dec!(12.99)),
        ("Omeprazole", "Digestive", dec!(8.49)),
        ("Metformin", "Diabetes", dec!(15.99)),
        ("Lisinopril", "Cardiovascular", dec!(18.99)),
        ("Atorvastatin", "Cardiovascular", dec!(22.49)),
        ("Ibuprofen", "Pain Relief", dec!(6.99)),
        ("Ciprofloxacin", "Antibiotics", dec!(14.99)),
        ("Amlodipine", "Cardiovascular", dec!(16.99)),
        ("Gabapentin", "Neurological", dec!(24.99)),
    ];
    entries
        .into_iter()
        .map(|(name, category, base_price)| DrugInfo {
            name: name.to_string(),
            category: category.to_string(),
            base_price,
        })
        .collect()
});

/// Deterministic in-process sales history generator.
pub struct SampleSeriesStore {
    anchor: NaiveDate,
    lookback_days: u32,
    catalog: Vec<DrugInfo>,
}

impl SampleSeriesStore {
    /// `anchor` is the most recent day with data; history extends
    /// `lookback_days` back from it inclusive.
    pub fn new(anchor: NaiveDate, lookback_days: u32) -> Self {
        Self {
            anchor,
            lookback_days: lookback_days.max(1),
            catalog: CATALOG.clone(),
        }
    }

    pub fn anchor(&self) -> NaiveDate {
        self.anchor
    }

    fn record_for(drug: &DrugInfo, date: NaiveDate) -> SalesRecord {
        let seed = stable_seed(&format!("{}:{}", drug.name, date));
        let mut rng = StdRng::seed_from_u64(seed);

        let base_units: u64 = rng.gen_range(50..=200);
        let day_factor = match date.weekday() {
            Weekday::Sat | Weekday::Sun => 0.8,
            _ => 1.2,
        };
        let noise: f64 = rng.gen_range(0.7..1.3);
        let units = (base_units as f64 * day_factor * noise) as u64;

        // Price jitter stays in whole percent so Decimal math is exact.
        let price_pct: i64 = rng.gen_range(90..=110);
        let unit_price = drug.base_price * Decimal::from(price_pct) / dec!(100);

        SalesRecord::new(date, &drug.name, &drug.category, units, unit_price)
    }
}

#[async_trait]
impl SeriesStore for SampleSeriesStore {
    async fn fetch_series(
        &self,
        drug: Option<&str>,
        days: u32,
    ) -> Result<Vec<SalesRecord>, ServiceError> {
        let selected = match drug {
            Some(name) => {
                let info = self
                    .find_drug(name)
                    .ok_or_else(|| ServiceError::InvalidFilter(format!("Unknown drug: {}", name)))?;
                vec![info.clone()]
            }
            None => self.catalog.clone(),
        };

        let span = days.min(self.lookback_days);
        let start = self.anchor - Duration::days(i64::from(span) - 1);

        let mut records = Vec::with_capacity(span as usize * selected.len());
        let mut date = start;
        while date <= self.anchor {
            for info in &selected {
                records.push(Self::record_for(info, date));
            }
            date += Duration::days(1);
        }
        Ok(records)
    }

    fn catalog(&self) -> &[DrugInfo] {
        &self.catalog
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn anchor() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 8, 26).unwrap()
    }

    #[tokio::test]
    async fn identical_requests_see_identical_data() {
        let store = SampleSeriesStore::new(anchor(), 180);
        let a = store.fetch_series(Some("Paracetamol"), 30).await.unwrap();
        let b = store.fetch_series(Some("Paracetamol"), 30).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 30);
    }

    #[tokio::test]
    async fn series_is_ordered_and_windowed() {
        let store = SampleSeriesStore::new(anchor(), 180);
        let records = store.fetch_series(None, 7).await.unwrap();
        assert_eq!(records.len(), 7 * store.catalog().len());
        assert!(records.windows(2).all(|w| w[0].date <= w[1].date));
        assert_eq!(records.first().unwrap().date, anchor() - Duration::days(6));
        assert_eq!(records.last().unwrap().date, anchor());
    }

    #[tokio::test]
    async fn unknown_drug_is_rejected() {
        let store = SampleSeriesStore::new(anchor(), 180);
        let err = store.fetch_series(Some("Aspirinn"), 30).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidFilter(_)));
    }

    #[tokio::test]
    async fn drug_lookup_is_case_insensitive() {
        let store = SampleSeriesStore::new(anchor(), 180);
        assert!(store.find_drug("amoxicillin").is_some());
        let records = store.fetch_series(Some("AMOXICILLIN"), 5).await.unwrap();
        assert!(records.iter().all(|r| r.drug_name == "Amoxicillin"));
    }

    #[tokio::test]
    async fn daily_totals_collapse_across_drugs() {
        let store = SampleSeriesStore::new(anchor(), 180);
        let totals = store.fetch_daily_totals(None, 10).await.unwrap();
        assert_eq!(totals.len(), 10);
        assert!(totals.windows(2).all(|w| w[0].0 < w[1].0));
    }

    #[test]
    fn revenue_is_units_times_price() {
        let store = SampleSeriesStore::new(anchor(), 180);
        let drug = &store.catalog()[0];
        let rec = SampleSeriesStore::record_for(drug, anchor());
        assert_eq!(rec.revenue, Decimal::from(rec.units_sold) * rec.unit_price);
    }
}
