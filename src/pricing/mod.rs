//! Price normalization, trend annotation and the date x property matrix

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{RateShopperError, Result};
use crate::store::{JobStore, PriceStore, PropertyStore};

pub mod index;
pub mod matrix;
pub mod normalizer;
pub mod trend;

pub use index::PriceIndex;
pub use matrix::{BundleBadge, MatrixBuilder, MatrixRow, PriceCell, PriceMatrix, TrendPoint};
pub use normalizer::{round_price, NormalizedPrice, PriceNormalizer};
pub use trend::{annotate, summarize, PriceHistoryEntry, TrendDirection, TrendSummary};

/// Inclusive range of nights
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn checked(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if end < start {
            return Err(RateShopperError::validation(format!(
                "end_date {} is before start_date {}",
                end, start
            )));
        }
        Ok(Self::new(start, end))
    }

    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> {
        let end = self.end;
        self.start.iter_days().take_while(move |d| *d <= end)
    }
}

/// Response of the price-history query
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceHistory {
    pub property_id: Uuid,
    pub property_name: String,
    pub date: NaiveDate,
    pub entries: Vec<PriceHistoryEntry>,
    pub summary: Option<TrendSummary>,
}

/// Read-side queries over stored prices. Never runs during an extraction.
#[derive(Clone)]
pub struct PriceAnalytics {
    store: Arc<dyn JobStore>,
}

impl PriceAnalytics {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    pub async fn price_matrix(
        &self,
        hotel_id: Uuid,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<PriceMatrix> {
        let range = DateRange::checked(start, end)?;
        let properties: Vec<_> = self
            .store
            .list_properties(hotel_id)
            .await?
            .into_iter()
            .filter(|p| p.active)
            .collect();
        let ids: Vec<Uuid> = properties.iter().map(|p| p.id).collect();
        let observations = self.store.prices_in_range(&ids, start, end).await?;
        let index = PriceIndex::from_observations(&observations);
        Ok(MatrixBuilder::build(range, &properties, &index))
    }

    /// Chart-ready per-date objects keyed by property name
    pub async fn price_trends(
        &self,
        hotel_id: Uuid,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<TrendPoint>> {
        Ok(self.price_matrix(hotel_id, start, end).await?.trend_points())
    }

    pub async fn price_history(&self, property_id: Uuid, date: NaiveDate) -> Result<PriceHistory> {
        let property = self.store.get_property(property_id).await?;
        let observations = self.store.prices_in_range(&[property_id], date, date).await?;
        let index = PriceIndex::from_observations(&observations);
        let entries = annotate(date, index.history(property_id, date));
        let summary = summarize(&entries);
        Ok(PriceHistory {
            property_id,
            property_name: property.name,
            date,
            entries,
            summary,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PriceObservation, Property};
    use crate::store::MemoryStore;
    use chrono::{Duration, Utc};

    fn day(n: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 9, n).unwrap()
    }

    #[tokio::test]
    async fn history_annotates_bundle_and_direct_prices() {
        let store = Arc::new(MemoryStore::new());
        let property = store
            .insert_property(
                Property::new(Uuid::new_v4(), "Hotel Sol", "https://example.com/sol", Utc::now()).with_max_bundle_size(3),
            )
            .await
            .unwrap();
        let now = Utc::now();
        store
            .append_prices(vec![
                PriceObservation::new(property.id, day(1), 300.0, 3, now - Duration::days(2)),
                PriceObservation::new(property.id, day(2), 120.0, 1, now - Duration::days(1)),
                PriceObservation::new(property.id, day(2), 90.0, 1, now),
            ])
            .await
            .unwrap();

        let analytics = PriceAnalytics::new(store);
        let history = analytics.price_history(property.id, day(2)).await.unwrap();

        let prices: Vec<f64> = history.entries.iter().map(|e| e.per_night_price).collect();
        assert_eq!(prices, vec![100.0, 120.0, 90.0]);
        assert!(history.entries[0].is_bundle);
        assert_eq!(history.entries[1].change, Some(20.0));
        assert_eq!(history.entries[2].direction, Some(TrendDirection::Decrease));
        assert_eq!(history.summary.unwrap().change, -10.0);
    }

    #[tokio::test]
    async fn trends_skip_inactive_properties() {
        let store = Arc::new(MemoryStore::new());
        let hotel = Uuid::new_v4();
        let active = store
            .insert_property(Property::new(hotel, "Active", "https://example.com/a", Utc::now()))
            .await
            .unwrap();
        let mut retired = Property::new(hotel, "Retired", "https://example.com/r", Utc::now());
        retired.active = false;
        let retired = store.insert_property(retired).await.unwrap();
        store
            .append_prices(vec![
                PriceObservation::new(active.id, day(1), 100.0, 1, Utc::now()),
                PriceObservation::new(retired.id, day(1), 999.0, 1, Utc::now()),
            ])
            .await
            .unwrap();

        let points = PriceAnalytics::new(store).price_trends(hotel, day(1), day(1)).await.unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].prices.get("Active"), Some(&Some(100.0)));
        assert!(!points[0].prices.contains_key("Retired"));
        assert_eq!(points[0].competitor_average, Some(100.0));
    }

    #[test]
    fn date_range_rejects_inverted_bounds() {
        assert!(DateRange::checked(day(3), day(1)).is_err());
        assert_eq!(DateRange::new(day(1), day(3)).dates().count(), 3);
    }
}
