use crate::models::{PriceObservation, Property};
use crate::scrapers::types::ScrapeError;
use async_trait::async_trait;
use chrono::NaiveDate;

/// Common trait for all price sources
/// New platforms plug in here without touching the orchestrator
#[async_trait]
pub trait PriceScraper: Send + Sync {
    /// Prices offered by `property` for a stay starting on `check_in`
    async fn scrape(
        &self,
        property: &Property,
        check_in: NaiveDate,
    ) -> Result<Vec<PriceObservation>, ScrapeError>;

    /// Get the name of the scraper source
    fn source_name(&self) -> &'static str;
}
