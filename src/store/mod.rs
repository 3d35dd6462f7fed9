//! Persistence seams for properties, searches and scraped prices

use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{PriceObservation, Property, SearchRecord};

pub mod memory;

pub use memory::{MemoryStore, StoreSnapshot};

#[async_trait]
pub trait PropertyStore: Send + Sync {
    async fn insert_property(&self, property: Property) -> Result<Property>;

    async fn get_property(&self, id: Uuid) -> Result<Property>;

    async fn list_properties(&self, hotel_id: Uuid) -> Result<Vec<Property>>;
}

#[async_trait]
pub trait SearchStore: Send + Sync {
    async fn insert_search(&self, search: SearchRecord) -> Result<SearchRecord>;

    async fn get_search(&self, id: Uuid) -> Result<SearchRecord>;

    async fn update_search(&self, search: SearchRecord) -> Result<()>;

    async fn delete_search(&self, id: Uuid) -> Result<()>;

    /// Searches for a hotel in creation order
    async fn list_searches(&self, hotel_id: Uuid) -> Result<Vec<SearchRecord>>;

    /// RUNNING searches across all hotels
    async fn running_searches(&self) -> Result<Vec<SearchRecord>>;
}

#[async_trait]
pub trait PriceStore: Send + Sync {
    /// Append observations; stored rows are never overwritten
    async fn append_prices(&self, prices: Vec<PriceObservation>) -> Result<usize>;

    /// Observations for the given properties whose covered nights intersect `start..=end`
    async fn prices_in_range(
        &self,
        property_ids: &[Uuid],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PriceObservation>>;
}

/// Everything the orchestrator and analytics need from persistence
pub trait JobStore: PropertyStore + SearchStore + PriceStore {}

impl<T: PropertyStore + SearchStore + PriceStore> JobStore for T {}
