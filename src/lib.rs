//! Competitor rate shopping: scheduled price extraction per hotel, nightly price normalization
//! and date x property price analytics.

pub mod clock;
pub mod config;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod pricing;
pub mod progress;
pub mod scrapers;
pub mod store;

pub use error::{RateShopperError, Result};
pub use orchestrator::{ExtractionHandle, ExtractionOrchestrator, LazyState, StopOutcome};
