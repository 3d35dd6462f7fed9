use anyhow::Context;
use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{RateShopperError, Result};
use crate::models::{PriceObservation, Property, SearchRecord, SearchStatus};
use crate::store::{PriceStore, PropertyStore, SearchStore};

/// Field names of a trend point that a property name must not shadow
const RESERVED_PROPERTY_NAMES: [&str; 3] = ["date", "competitor_average", "bundle_badge"];

/// Serializable copy of everything a `MemoryStore` holds
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub properties: Vec<Property>,
    pub searches: Vec<SearchRecord>,
    pub prices: Vec<PriceObservation>,
}

#[derive(Default)]
struct State {
    properties: HashMap<Uuid, Property>,
    searches: HashMap<Uuid, SearchRecord>,
    /// Insertion sequence, breaks ties between searches created in the same instant
    search_seq: HashMap<Uuid, u64>,
    next_seq: u64,
    prices: Vec<PriceObservation>,
}

impl State {
    fn insert_search(&mut self, search: SearchRecord) {
        self.search_seq.insert(search.id, self.next_seq);
        self.next_seq += 1;
        self.searches.insert(search.id, search);
    }

    /// Searches matching `filter` in creation order
    fn searches_where(&self, filter: impl Fn(&SearchRecord) -> bool) -> Vec<SearchRecord> {
        let mut searches: Vec<&SearchRecord> = self.searches.values().filter(|s| filter(s)).collect();
        searches.sort_by_key(|s| (s.created_at, self.search_seq.get(&s.id).copied().unwrap_or(u64::MAX)));
        searches.into_iter().cloned().collect()
    }
}

/// In-process store, optionally persisted as a JSON snapshot
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        let mut state = State {
            properties: snapshot.properties.into_iter().map(|p| (p.id, p)).collect(),
            prices: snapshot.prices,
            ..State::default()
        };
        for search in snapshot.searches {
            state.insert_search(search);
        }
        Self { state: RwLock::new(state) }
    }

    pub async fn snapshot(&self) -> StoreSnapshot {
        let state = self.state.read().await;
        let mut properties: Vec<Property> = state.properties.values().cloned().collect();
        properties.sort_by_key(|p| p.created_at);
        StoreSnapshot {
            properties,
            searches: state.searches_where(|_| true),
            prices: state.prices.clone(),
        }
    }

    pub async fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        let snapshot = self.snapshot().await;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(&snapshot)?;
        tokio::fs::write(path, json)
            .await
            .with_context(|| format!("Failed to write snapshot {}", path.display()))?;
        info!(
            "💾 Saved {} searches and {} prices to {}",
            snapshot.searches.len(),
            snapshot.prices.len(),
            path.display()
        );
        Ok(())
    }

    pub async fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let json = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read snapshot {}", path.display()))?;
        let snapshot: StoreSnapshot = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse snapshot {}", path.display()))?;
        Ok(Self::from_snapshot(snapshot))
    }

    /// Load the snapshot if the file exists, otherwise start empty
    pub async fn load_or_default(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        if tokio::fs::try_exists(path.as_ref()).await.unwrap_or(false) {
            Self::load(path).await
        } else {
            Ok(Self::new())
        }
    }
}

#[async_trait]
impl PropertyStore for MemoryStore {
    async fn insert_property(&self, property: Property) -> Result<Property> {
        if property.max_bundle_size < 1 {
            return Err(RateShopperError::validation("max_bundle_size must be at least 1"));
        }
        if property.name.trim().is_empty() {
            return Err(RateShopperError::validation("property name is empty"));
        }

        let name = property.name.trim();
        if RESERVED_PROPERTY_NAMES.iter().any(|r| r.eq_ignore_ascii_case(name)) {
            return Err(RateShopperError::validation(format!(
                "property name {:?} is reserved",
                property.name
            )));
        }

        let mut state = self.state.write().await;
        // Names key the chart-ready trend rows, so they must be unique per hotel
        let duplicate = state.properties.values().any(|p| {
            p.hotel_id == property.hotel_id && p.id != property.id && p.name.trim().eq_ignore_ascii_case(name)
        });
        if duplicate {
            return Err(RateShopperError::validation(format!(
                "hotel {} already has a property named {}",
                property.hotel_id, property.name
            )));
        }
        if property.is_main_property {
            let existing = state.properties.values().find(|p| {
                p.hotel_id == property.hotel_id && p.is_main_property && p.id != property.id
            });
            if let Some(existing) = existing {
                return Err(RateShopperError::validation(format!(
                    "hotel {} already has main property {}",
                    property.hotel_id, existing.name
                )));
            }
        }
        debug!("Registering property {} ({})", property.name, property.id);
        state.properties.insert(property.id, property.clone());
        Ok(property)
    }

    async fn get_property(&self, id: Uuid) -> Result<Property> {
        self.state
            .read()
            .await
            .properties
            .get(&id)
            .cloned()
            .ok_or_else(|| RateShopperError::not_found(format!("property {}", id)))
    }

    async fn list_properties(&self, hotel_id: Uuid) -> Result<Vec<Property>> {
        let state = self.state.read().await;
        let mut properties: Vec<Property> = state
            .properties
            .values()
            .filter(|p| p.hotel_id == hotel_id)
            .cloned()
            .collect();
        properties.sort_by_key(|p| p.created_at);
        Ok(properties)
    }
}

#[async_trait]
impl SearchStore for MemoryStore {
    async fn insert_search(&self, search: SearchRecord) -> Result<SearchRecord> {
        let mut state = self.state.write().await;
        if state.searches.contains_key(&search.id) {
            return Err(RateShopperError::Store(format!("search {} already exists", search.id)));
        }
        state.insert_search(search.clone());
        Ok(search)
    }

    async fn get_search(&self, id: Uuid) -> Result<SearchRecord> {
        self.state
            .read()
            .await
            .searches
            .get(&id)
            .cloned()
            .ok_or_else(|| RateShopperError::not_found(format!("search {}", id)))
    }

    async fn update_search(&self, search: SearchRecord) -> Result<()> {
        let mut state = self.state.write().await;
        match state.searches.get_mut(&search.id) {
            Some(slot) => {
                *slot = search;
                Ok(())
            }
            None => Err(RateShopperError::not_found(format!("search {}", search.id))),
        }
    }

    async fn delete_search(&self, id: Uuid) -> Result<()> {
        let mut state = self.state.write().await;
        state.search_seq.remove(&id);
        state
            .searches
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| RateShopperError::not_found(format!("search {}", id)))
    }

    async fn list_searches(&self, hotel_id: Uuid) -> Result<Vec<SearchRecord>> {
        let state = self.state.read().await;
        Ok(state.searches_where(|s| s.hotel_id == hotel_id))
    }

    async fn running_searches(&self) -> Result<Vec<SearchRecord>> {
        let state = self.state.read().await;
        Ok(state.searches_where(|s| s.status == SearchStatus::Running))
    }
}

#[async_trait]
impl PriceStore for MemoryStore {
    async fn append_prices(&self, prices: Vec<PriceObservation>) -> Result<usize> {
        let count = prices.len();
        self.state.write().await.prices.extend(prices);
        Ok(count)
    }

    async fn prices_in_range(
        &self,
        property_ids: &[Uuid],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PriceObservation>> {
        let state = self.state.read().await;
        Ok(state
            .prices
            .iter()
            .filter(|p| property_ids.contains(&p.property_id))
            .filter(|p| {
                let last_night = p.check_in + Duration::days(i64::from(p.nights_count.max(1)) - 1);
                p.check_in <= end && last_night >= start
            })
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CreateSearch;
    use chrono::Utc;

    fn day(n: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 9, n).unwrap()
    }

    #[tokio::test]
    async fn only_one_main_property_per_hotel() {
        let store = MemoryStore::new();
        let hotel = Uuid::new_v4();
        store
            .insert_property(Property::new(hotel, "Ours", "https://example.com/a", Utc::now()).main())
            .await
            .unwrap();

        let second = store
            .insert_property(Property::new(hotel, "Also ours", "https://example.com/b", Utc::now()).main())
            .await;
        assert!(matches!(second, Err(RateShopperError::Validation(_))));

        let other_hotel = store
            .insert_property(Property::new(Uuid::new_v4(), "Elsewhere", "https://example.com/c", Utc::now()).main())
            .await;
        assert!(other_hotel.is_ok());
    }

    #[tokio::test]
    async fn property_names_are_unique_and_not_reserved() {
        let store = MemoryStore::new();
        let hotel = Uuid::new_v4();
        store
            .insert_property(Property::new(hotel, "Casa Azul", "https://example.com/a", Utc::now()))
            .await
            .unwrap();

        let twin = store
            .insert_property(Property::new(hotel, "casa azul ", "https://example.com/b", Utc::now()))
            .await;
        assert!(matches!(twin, Err(RateShopperError::Validation(_))));

        let reserved = store
            .insert_property(Property::new(hotel, "Date", "https://example.com/c", Utc::now()))
            .await;
        assert!(matches!(reserved, Err(RateShopperError::Validation(_))));

        let elsewhere = store
            .insert_property(Property::new(Uuid::new_v4(), "Casa Azul", "https://example.com/d", Utc::now()))
            .await;
        assert!(elsewhere.is_ok());
    }

    #[tokio::test]
    async fn rejects_zero_bundle_limit() {
        let store = MemoryStore::new();
        let property = Property::new(Uuid::new_v4(), "Bad", "https://example.com", Utc::now()).with_max_bundle_size(0);
        assert!(store.insert_property(property).await.is_err());
    }

    #[tokio::test]
    async fn range_query_includes_overlapping_bundles() {
        let store = MemoryStore::new();
        let property = Uuid::new_v4();
        store
            .append_prices(vec![
                PriceObservation::new(property, day(1), 300.0, 3, Utc::now()),
                PriceObservation::new(property, day(1), 90.0, 1, Utc::now()),
                PriceObservation::new(property, day(6), 80.0, 1, Utc::now()),
                PriceObservation::new(Uuid::new_v4(), day(3), 70.0, 1, Utc::now()),
            ])
            .await
            .unwrap();

        let found = store.prices_in_range(&[property], day(3), day(5)).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].raw_price, 300.0);
    }

    #[tokio::test]
    async fn snapshot_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("snapshot.json");

        let store = MemoryStore::new();
        let property = store
            .insert_property(Property::new(Uuid::new_v4(), "Casa", "https://example.com/casa", Utc::now()))
            .await
            .unwrap();
        let request = CreateSearch {
            property_id: property.id,
            start_date: day(1),
            end_date: day(3),
            max_bundle_size: None,
        };
        let search = store
            .insert_search(SearchRecord::new(&property, &request, Utc::now()))
            .await
            .unwrap();
        store
            .append_prices(vec![PriceObservation::new(property.id, day(1), 120.0, 1, Utc::now())])
            .await
            .unwrap();
        store.save(&path).await.unwrap();

        let restored = MemoryStore::load_or_default(&path).await.unwrap();
        assert_eq!(restored.get_search(search.id).await.unwrap(), search);
        assert_eq!(restored.get_property(property.id).await.unwrap(), property);
        assert_eq!(restored.snapshot().await.prices.len(), 1);

        let empty = MemoryStore::load_or_default(dir.path().join("missing.json")).await.unwrap();
        assert!(empty.snapshot().await.searches.is_empty());
    }
}
