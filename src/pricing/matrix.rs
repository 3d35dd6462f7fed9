use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::models::Property;
use crate::pricing::index::PriceIndex;
use crate::pricing::DateRange;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PriceCell {
    pub per_night_price: f64,
    pub is_bundle: bool,
    pub bundle_size: u32,
}

/// Cosmetic annotation describing how many of a date's prices came from bundles
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BundleBadge {
    /// No price on this date came from a bundle
    Direct,
    /// Bundle-derived prices are a strict majority of the non-null cells
    MostlyBundle,
    Mixed,
}

impl BundleBadge {
    fn classify(cells: &[&PriceCell]) -> Option<Self> {
        if cells.is_empty() {
            return None;
        }
        let bundles = cells.iter().filter(|c| c.is_bundle).count();
        Some(if bundles == 0 {
            Self::Direct
        } else if bundles * 2 > cells.len() {
            Self::MostlyBundle
        } else {
            Self::Mixed
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatrixRow {
    pub property_id: Uuid,
    pub property_name: String,
    pub is_main_property: bool,
    /// One cell per date of the matrix, aligned with `PriceMatrix::dates`
    pub prices: Vec<Option<PriceCell>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceMatrix {
    pub dates: Vec<NaiveDate>,
    pub rows: Vec<MatrixRow>,
    /// Unrounded mean of the non-main per-night prices
    pub competitor_average: BTreeMap<NaiveDate, Option<f64>>,
    pub bundle_badges: BTreeMap<NaiveDate, Option<BundleBadge>>,
}

/// Chart-ready view of one date: property name -> per-night price
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrendPoint {
    pub date: NaiveDate,
    #[serde(flatten)]
    pub prices: BTreeMap<String, Option<f64>>,
    pub competitor_average: Option<f64>,
    pub bundle_badge: Option<BundleBadge>,
}

pub struct MatrixBuilder;

impl MatrixBuilder {
    /// Date x property grid. Every date in the range gets a column even without prices.
    pub fn build(range: DateRange, properties: &[Property], index: &PriceIndex) -> PriceMatrix {
        let dates: Vec<NaiveDate> = range.dates().collect();

        let mut ordered: Vec<&Property> = properties.iter().collect();
        ordered.sort_by(|a, b| {
            b.is_main_property
                .cmp(&a.is_main_property)
                .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
                .then_with(|| a.name.cmp(&b.name))
        });

        let rows: Vec<MatrixRow> = ordered
            .into_iter()
            .map(|property| MatrixRow {
                property_id: property.id,
                property_name: property.name.clone(),
                is_main_property: property.is_main_property,
                prices: dates
                    .iter()
                    .map(|date| {
                        index.latest(property.id, *date).map(|price| PriceCell {
                            per_night_price: price.per_night_price,
                            is_bundle: price.is_bundle,
                            bundle_size: price.bundle_size,
                        })
                    })
                    .collect(),
            })
            .collect();

        let mut competitor_average = BTreeMap::new();
        let mut bundle_badges = BTreeMap::new();
        for (column, date) in dates.iter().enumerate() {
            let cells: Vec<&PriceCell> = rows
                .iter()
                .filter_map(|row| row.prices[column].as_ref())
                .collect();
            bundle_badges.insert(*date, BundleBadge::classify(&cells));

            let competitors: Vec<f64> = rows
                .iter()
                .filter(|row| !row.is_main_property)
                .filter_map(|row| row.prices[column].map(|cell| cell.per_night_price))
                .collect();
            let average = if competitors.is_empty() {
                None
            } else {
                Some(competitors.iter().sum::<f64>() / competitors.len() as f64)
            };
            competitor_average.insert(*date, average);
        }

        PriceMatrix {
            dates,
            rows,
            competitor_average,
            bundle_badges,
        }
    }
}

impl PriceMatrix {
    pub fn competitor_average(&self, date: NaiveDate) -> Option<f64> {
        self.competitor_average.get(&date).copied().flatten()
    }

    pub fn price(&self, property_id: Uuid, date: NaiveDate) -> Option<f64> {
        let column = self.dates.iter().position(|d| *d == date)?;
        self.rows
            .iter()
            .find(|row| row.property_id == property_id)?
            .prices[column]
            .map(|cell| cell.per_night_price)
    }

    pub fn trend_points(&self) -> Vec<TrendPoint> {
        self.dates
            .iter()
            .enumerate()
            .map(|(column, date)| TrendPoint {
                date: *date,
                prices: self
                    .rows
                    .iter()
                    .map(|row| {
                        (
                            row.property_name.clone(),
                            row.prices[column].map(|cell| cell.per_night_price),
                        )
                    })
                    .collect(),
                competitor_average: self.competitor_average(*date),
                bundle_badge: self.bundle_badges.get(date).copied().flatten(),
            })
            .collect()
    }
}
