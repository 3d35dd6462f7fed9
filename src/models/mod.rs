use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod search;

pub use search::{CreateSearch, LiveProgress, SearchRecord, SearchStatus};

/// A monitored competitor listing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Property {
    pub id: Uuid,
    pub hotel_id: Uuid,
    pub name: String,
    /// Listing URL on the source platform
    pub url: String,
    pub platform: String,
    /// Largest number of consecutive nights the scraper may return as one price
    pub max_bundle_size: u32,
    /// The hotel's own listing, used as the comparison baseline
    pub is_main_property: bool,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl Property {
    pub fn new(
        hotel_id: Uuid,
        name: impl Into<String>,
        url: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            hotel_id,
            name: name.into(),
            url: url.into(),
            platform: "booking".to_string(),
            max_bundle_size: 1,
            is_main_property: false,
            active: true,
            created_at,
        }
    }

    pub fn with_max_bundle_size(mut self, max_bundle_size: u32) -> Self {
        self.max_bundle_size = max_bundle_size;
        self
    }

    pub fn main(mut self) -> Self {
        self.is_main_property = true;
        self
    }
}

/// One scraped data point. Append-only once stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceObservation {
    pub id: Uuid,
    pub property_id: Uuid,
    /// Search that collected it, if any
    pub search_id: Option<Uuid>,
    pub check_in: NaiveDate,
    pub raw_price: f64,
    /// 1 for a plain nightly rate, >1 for a bundle over consecutive nights
    pub nights_count: u32,
    pub scraped_at: DateTime<Utc>,
}

impl PriceObservation {
    pub fn new(
        property_id: Uuid,
        check_in: NaiveDate,
        raw_price: f64,
        nights_count: u32,
        scraped_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            property_id,
            search_id: None,
            check_in,
            raw_price,
            nights_count,
            scraped_at,
        }
    }

    pub fn is_bundle(&self) -> bool {
        self.nights_count > 1
    }
}
