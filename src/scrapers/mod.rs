pub mod http;
pub mod traits;
pub mod types;

pub use http::HttpPriceScraper;
pub use traits::PriceScraper;
pub use types::{ScrapeError, StayQuery};
