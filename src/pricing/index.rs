use chrono::NaiveDate;
use std::cmp::Ordering;
use std::collections::HashMap;
use uuid::Uuid;

use crate::models::PriceObservation;
use crate::pricing::normalizer::NormalizedPrice;

/// Normalized prices keyed by (property, night), each list ordered by `scraped_at`.
///
/// A bundle is filed under every night it covers.
#[derive(Debug, Default, Clone)]
pub struct PriceIndex {
    entries: HashMap<(Uuid, NaiveDate), Vec<NormalizedPrice>>,
}

impl PriceIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_observations<'a>(observations: impl IntoIterator<Item = &'a PriceObservation>) -> Self {
        let mut index = Self::new();
        for observation in observations {
            if let Some(price) = NormalizedPrice::from_observation(observation) {
                index.insert(price);
            }
        }
        index
    }

    pub fn insert(&mut self, price: NormalizedPrice) {
        for date in price.covered_dates().collect::<Vec<_>>() {
            let slot = self.entries.entry((price.property_id, date)).or_default();
            let at = slot.partition_point(|existing| existing.scraped_at <= price.scraped_at);
            slot.insert(at, price.clone());
        }
    }

    /// History for one property and night, oldest first
    pub fn history(&self, property_id: Uuid, date: NaiveDate) -> &[NormalizedPrice] {
        self.entries
            .get(&(property_id, date))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Most recent price; ties prefer a direct nightly rate, then the lower price
    pub fn latest(&self, property_id: Uuid, date: NaiveDate) -> Option<&NormalizedPrice> {
        self.history(property_id, date).iter().max_by(|a, b| {
            a.scraped_at
                .cmp(&b.scraped_at)
                .then_with(|| b.is_bundle.cmp(&a.is_bundle))
                .then_with(|| {
                    b.per_night_price
                        .partial_cmp(&a.per_night_price)
                        .unwrap_or(Ordering::Equal)
                })
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
