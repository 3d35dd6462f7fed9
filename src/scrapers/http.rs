use crate::clock::Clock;
use crate::config::ScraperConfig;
use crate::models::{PriceObservation, Property};
use crate::scrapers::traits::PriceScraper;
use crate::scrapers::types::{ScrapeError, StayQuery};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, StatusCode};
use scraper::{Html, Selector};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Generic listing-page scraper: fetch the property URL for a stay and read price elements
pub struct HttpPriceScraper {
    client: Client,
    price_selector: Selector,
    nights_attribute: String,
    clock: Arc<dyn Clock>,
}

impl HttpPriceScraper {
    pub fn new(config: &ScraperConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.as_str())
            .build()
            .context("Failed to create HTTP client")?;

        let price_selector = Selector::parse(&config.price_selector)
            .map_err(|e| anyhow!("Invalid price selector {:?}: {:?}", config.price_selector, e))?;

        Ok(Self {
            client,
            price_selector,
            nights_attribute: config.nights_attribute.clone(),
            clock,
        })
    }

    /// Extract every price element from a listing page
    fn parse_prices(&self, html: &str, property_id: Uuid, check_in: NaiveDate) -> Vec<PriceObservation> {
        let document = Html::parse_document(html);
        let scraped_at = self.clock.now();
        let mut prices = Vec::new();

        for element in document.select(&self.price_selector) {
            let text: String = element.text().collect();
            let Some(raw_price) = parse_price_text(&text) else {
                debug!("Skipping unparseable price text {:?}", text.trim());
                continue;
            };
            let nights_count = element
                .value()
                .attr(&self.nights_attribute)
                .and_then(|n| n.trim().parse::<u32>().ok())
                .unwrap_or(1);

            prices.push(PriceObservation::new(property_id, check_in, raw_price, nights_count, scraped_at));
        }

        prices
    }
}

#[async_trait]
impl PriceScraper for HttpPriceScraper {
    async fn scrape(
        &self,
        property: &Property,
        check_in: NaiveDate,
    ) -> std::result::Result<Vec<PriceObservation>, ScrapeError> {
        let query = StayQuery::one_night(check_in);
        let response = self
            .client
            .get(&property.url)
            .query(&query.query_pairs())
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(ScrapeError::Retryable(format!("{} returned {}", property.url, status)));
        }
        if !status.is_success() {
            return Err(ScrapeError::Fatal(format!("{} returned {}", property.url, status)));
        }

        let html = response.text().await?;
        let prices = self.parse_prices(&html, property.id, check_in);
        if prices.is_empty() {
            warn!("No prices found for {} on {}", property.name, check_in);
        }
        Ok(prices)
    }

    fn source_name(&self) -> &'static str {
        "http"
    }
}

/// Parse a displayed amount such as "R$ 1.234,56", "$1,234.56" or "€ 300"
pub fn parse_price_text(text: &str) -> Option<f64> {
    let cleaned: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .collect();
    let cleaned = cleaned.trim_matches(|c| c == '.' || c == ',');
    if cleaned.is_empty() {
        return None;
    }

    let decimal_sep = match (cleaned.rfind('.'), cleaned.rfind(',')) {
        (Some(dot), Some(comma)) => Some(if dot > comma { '.' } else { ',' }),
        (Some(pos), None) | (None, Some(pos)) => {
            let sep = cleaned[pos..].chars().next()?;
            let digits_after = cleaned.len() - pos - 1;
            let occurrences = cleaned.matches(sep).count();
            // "1.234" is a thousands group, "12.5" and "99,90" are decimals
            if occurrences == 1 && digits_after != 3 {
                Some(sep)
            } else {
                None
            }
        }
        (None, None) => None,
    };

    let normalized: String = match decimal_sep {
        Some(sep) => {
            let (int_part, frac_part) = cleaned.rsplit_once(sep)?;
            let int_digits: String = int_part.chars().filter(char::is_ascii_digit).collect();
            format!("{}.{}", int_digits, frac_part)
        }
        None => cleaned.chars().filter(char::is_ascii_digit).collect(),
    };

    normalized.parse::<f64>().ok()
}
