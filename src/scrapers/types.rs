use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure reported by a price source
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScrapeError {
    /// Timeouts, throttling, server errors: worth another attempt
    #[error("Retryable scrape failure: {0}")]
    Retryable(String),

    /// The listing cannot be scraped; retrying will not help
    #[error("Fatal scrape failure: {0}")]
    Fatal(String),
}

impl ScrapeError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }
}

impl From<reqwest::Error> for ScrapeError {
    fn from(err: reqwest::Error) -> Self {
        let retryable = err.is_timeout()
            || err.is_connect()
            || err
                .status()
                .map(|s| s.is_server_error() || s.as_u16() == 429)
                .unwrap_or(false);
        if retryable {
            Self::Retryable(err.to_string())
        } else {
            Self::Fatal(err.to_string())
        }
    }
}

/// Stay parameters sent to the source platform
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StayQuery {
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub adults: u32,
}

impl StayQuery {
    /// One-night stay for two adults
    pub fn one_night(check_in: NaiveDate) -> Self {
        Self {
            check_in,
            check_out: check_in + Duration::days(1),
            adults: 2,
        }
    }

    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("checkin", self.check_in.format("%Y-%m-%d").to_string()),
            ("checkout", self.check_out.format("%Y-%m-%d").to_string()),
            ("group_adults", self.adults.to_string()),
        ]
    }
}
