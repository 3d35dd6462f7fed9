//! Error types for the rate shopper core

use thiserror::Error;
use uuid::Uuid;

use crate::models::SearchStatus;

/// Result type used throughout the library
pub type Result<T> = std::result::Result<T, RateShopperError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RateShopperError {
    /// Bad request shape or date range, rejected before any state change
    #[error("Validation error: {0}")]
    Validation(String),

    /// Another search already holds the hotel's single-flight slot
    #[error("Hotel {hotel_id} is busy: search {running_search} is running")]
    HotelBusy { hotel_id: Uuid, running_search: Uuid },

    /// Scraper returned an observation outside the configured bundle limits
    #[error("Invalid bundle: {nights_count} nights (allowed 1..={max_bundle_size})")]
    InvalidBundle { nights_count: u32, max_bundle_size: u32 },

    /// Scraper or network failure mid-run
    #[error("Extraction error: {0}")]
    Extraction(String),

    /// A RUNNING search stopped reporting progress and was cleaned up
    #[error("Search {search_id} went stale after {idle_secs}s without progress")]
    StaleJob { search_id: Uuid, idle_secs: i64 },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition { from: SearchStatus, to: SearchStatus },

    #[error("Search {0} is running")]
    SearchRunning(Uuid),

    #[error("Store error: {0}")]
    Store(String),
}

impl RateShopperError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }
}
