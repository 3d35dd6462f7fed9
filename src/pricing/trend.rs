use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::pricing::normalizer::{round_price, NormalizedPrice};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Increase,
    Decrease,
    Unchanged,
}

impl TrendDirection {
    pub fn of(change: f64) -> Self {
        if change > 0.0 {
            Self::Increase
        } else if change < 0.0 {
            Self::Decrease
        } else {
            Self::Unchanged
        }
    }
}

/// One observation in a (property, date) history with its delta to the previous one
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceHistoryEntry {
    pub date: NaiveDate,
    pub per_night_price: f64,
    pub raw_price: f64,
    pub is_bundle: bool,
    pub bundle_size: u32,
    pub scraped_at: DateTime<Utc>,
    pub change: Option<f64>,
    pub change_percent: Option<f64>,
    pub direction: Option<TrendDirection>,
}

/// Net movement between the first and last entry of a history
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrendSummary {
    pub first_price: f64,
    pub last_price: f64,
    pub change: f64,
    pub change_percent: Option<f64>,
    pub direction: TrendDirection,
    pub observations: usize,
}

fn percent_of(change: f64, previous: f64) -> Option<f64> {
    if previous == 0.0 {
        None
    } else {
        Some(round_price(change / previous * 100.0))
    }
}

/// Annotate an ordered history with deltas. Pure and idempotent.
pub fn annotate(date: NaiveDate, history: &[NormalizedPrice]) -> Vec<PriceHistoryEntry> {
    let mut previous: Option<f64> = None;
    history
        .iter()
        .map(|price| {
            let current = price.per_night_price;
            let (change, change_percent, direction) = match previous {
                Some(prev) => {
                    let change = round_price(current - prev);
                    (Some(change), percent_of(change, prev), Some(TrendDirection::of(change)))
                }
                None => (None, None, None),
            };
            previous = Some(current);

            PriceHistoryEntry {
                date,
                per_night_price: current,
                raw_price: price.raw_price,
                is_bundle: price.is_bundle,
                bundle_size: price.bundle_size,
                scraped_at: price.scraped_at,
                change,
                change_percent,
                direction,
            }
        })
        .collect()
}

pub fn summarize(entries: &[PriceHistoryEntry]) -> Option<TrendSummary> {
    let first = entries.first()?;
    let last = entries.last()?;
    let change = round_price(last.per_night_price - first.per_night_price);
    Some(TrendSummary {
        first_price: first.per_night_price,
        last_price: last.per_night_price,
        change,
        change_percent: percent_of(change, first.per_night_price),
        direction: TrendDirection::of(change),
        observations: entries.len(),
    })
}
