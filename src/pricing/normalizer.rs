//! Decomposes bundled prices into comparable per-night prices.
//!
//! Rounding policy: the per-night value is `raw_price / nights_count` rounded half away from
//! zero to 2 decimal places. The bundle total is never rounded, so reconstructing it from the
//! per-night value is exact within `0.005 * nights_count`.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{RateShopperError, Result};
use crate::models::PriceObservation;

/// Round to cents, half away from zero
pub fn round_price(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Largest allowed gap between `per_night_price * nights` and the raw bundle price
pub fn round_trip_tolerance(nights_count: u32) -> f64 {
    0.005 * f64::from(nights_count) + f64::EPSILON
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NormalizedPrice {
    pub property_id: Uuid,
    /// Check-in date of the originating observation
    pub check_in: NaiveDate,
    pub raw_price: f64,
    pub per_night_price: f64,
    pub is_bundle: bool,
    pub bundle_size: u32,
    pub scraped_at: DateTime<Utc>,
}

impl NormalizedPrice {
    /// Plain derivation without limit checks; `None` for a zero night count
    pub fn from_observation(observation: &PriceObservation) -> Option<Self> {
        if observation.nights_count == 0 {
            return None;
        }
        Some(Self {
            property_id: observation.property_id,
            check_in: observation.check_in,
            raw_price: observation.raw_price,
            per_night_price: round_price(observation.raw_price / f64::from(observation.nights_count)),
            is_bundle: observation.nights_count > 1,
            bundle_size: observation.nights_count,
            scraped_at: observation.scraped_at,
        })
    }

    /// Every night the price applies to, starting at check-in
    pub fn covered_dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        (0..i64::from(self.bundle_size)).map(move |offset| self.check_in + Duration::days(offset))
    }

    pub fn covers(&self, date: NaiveDate) -> bool {
        date >= self.check_in && (date - self.check_in).num_days() < i64::from(self.bundle_size)
    }
}

/// Validates observations against a bundle limit and derives per-night prices
#[derive(Debug, Clone, Copy)]
pub struct PriceNormalizer {
    max_bundle_size: u32,
}

impl PriceNormalizer {
    pub fn new(max_bundle_size: u32) -> Self {
        Self { max_bundle_size: max_bundle_size.max(1) }
    }

    pub fn max_bundle_size(&self) -> u32 {
        self.max_bundle_size
    }

    pub fn normalize(&self, observation: &PriceObservation) -> Result<NormalizedPrice> {
        if observation.nights_count < 1 || observation.nights_count > self.max_bundle_size {
            return Err(RateShopperError::InvalidBundle {
                nights_count: observation.nights_count,
                max_bundle_size: self.max_bundle_size,
            });
        }
        if !observation.raw_price.is_finite() || observation.raw_price < 0.0 {
            return Err(RateShopperError::validation(format!(
                "raw price {} is not a valid amount",
                observation.raw_price
            )));
        }

        NormalizedPrice::from_observation(observation).ok_or(RateShopperError::InvalidBundle {
            nights_count: observation.nights_count,
            max_bundle_size: self.max_bundle_size,
        })
    }
}
