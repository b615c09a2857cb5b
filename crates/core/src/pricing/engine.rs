use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;

use crate::domain::price::{
    FlashSaleNudge, PriceObservation, PriceSource, PricingSuggestion, SourceSummary,
};
use crate::domain::product::Product;
use crate::errors::EngineError;

/// Tuning knobs for price suggestions. Factors are multipliers on the
/// competitor median bounds; a suggestion never leaves
/// `[min_median * floor_factor, max_median * ceiling_factor]`.
#[derive(Clone, Debug, PartialEq)]
pub struct PricingParams {
    pub window_days: i64,
    pub expiry_flash_days: i64,
    pub floor_factor: Decimal,
    pub ceiling_factor: Decimal,
    pub validity_hours: i64,
}

impl Default for PricingParams {
    fn default() -> Self {
        Self {
            window_days: 30,
            expiry_flash_days: 3,
            floor_factor: Decimal::new(85, 2),
            ceiling_factor: Decimal::new(105, 2),
            validity_hours: 24,
        }
    }
}

/// Computes suggested unit prices from historical observations.
///
/// Per-source central tendency is the median, not the mean, so a single
/// outlier competitor listing cannot drag the suggestion. The preferred
/// price is the internal-sale band with the highest recent sell-through
/// velocity, clipped to the competitor median envelope.
#[derive(Clone, Debug, Default)]
pub struct PricingInsightEngine {
    params: PricingParams,
}

impl PricingInsightEngine {
    pub fn new(params: PricingParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &PricingParams {
        &self.params
    }

    pub fn suggest(
        &self,
        observations: &[PriceObservation],
        as_of: DateTime<Utc>,
    ) -> Result<PricingSuggestion, EngineError> {
        let cutoff = as_of - Duration::days(self.params.window_days);
        let windowed: Vec<&PriceObservation> =
            observations.iter().filter(|o| o.observed_at >= cutoff && o.observed_at <= as_of).collect();

        if windowed.len() < 2 {
            return Err(EngineError::InsufficientData);
        }

        let product_id = windowed[0].product_id.clone();
        let rationale = summarize_sources(&windowed);

        let competitor_medians: Vec<Decimal> = rationale
            .iter()
            .filter(|summary| summary.source.is_competitor())
            .map(|summary| summary.median)
            .collect();

        let preferred = best_internal_band(&windowed);

        let suggested_price = match (preferred, competitor_bounds(&competitor_medians, &self.params))
        {
            (Some(band), Some((floor, ceiling))) => band.clamp(floor, ceiling),
            (Some(band), None) => band,
            (None, Some((floor, ceiling))) => {
                // No internal sales yet: anchor on the competitor midpoint.
                let mid = competitor_medians.iter().copied().sum::<Decimal>()
                    / Decimal::from(competitor_medians.len());
                mid.clamp(floor, ceiling)
            }
            (None, None) => return Err(EngineError::InsufficientData),
        };

        Ok(PricingSuggestion {
            product_id,
            suggested_price,
            rationale,
            valid_until: as_of + Duration::hours(self.params.validity_hours),
        })
    }

    /// Discount nudge for a product within the flash-sale window of its
    /// expiry date. The closer to expiry, the deeper the discount.
    pub fn flash_sale(&self, product: &Product, today: NaiveDate) -> Option<FlashSaleNudge> {
        let days_remaining = product.days_until_expiry(today)?;
        if days_remaining > self.params.expiry_flash_days {
            return None;
        }
        let window = Decimal::from(self.params.expiry_flash_days);
        let discount_fraction = (window - Decimal::from(days_remaining)) / window;
        Some(FlashSaleNudge { product_id: product.id.clone(), days_remaining, discount_fraction })
    }
}

fn summarize_sources(observations: &[&PriceObservation]) -> Vec<SourceSummary> {
    let mut by_source: BTreeMap<&'static str, (PriceSource, Vec<Decimal>)> = BTreeMap::new();
    for observation in observations {
        by_source
            .entry(observation.source.as_str())
            .or_insert_with(|| (observation.source, Vec::new()))
            .1
            .push(observation.price);
    }

    by_source
        .into_values()
        .map(|(source, mut prices)| {
            prices.sort();
            SourceSummary {
                source,
                median: median_of_sorted(&prices),
                min: prices[0],
                max: prices[prices.len() - 1],
                samples: prices.len(),
            }
        })
        .collect()
}

fn median_of_sorted(sorted: &[Decimal]) -> Decimal {
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        sorted[mid]
    } else {
        (sorted[mid - 1] + sorted[mid]) / Decimal::from(2)
    }
}

fn competitor_bounds(medians: &[Decimal], params: &PricingParams) -> Option<(Decimal, Decimal)> {
    let min = medians.iter().copied().min()?;
    let max = medians.iter().copied().max()?;
    Some((min * params.floor_factor, max * params.ceiling_factor))
}

/// The internal-sale price band with the highest recent velocity. Velocity
/// is the quantity sold at that exact price (observation count when the
/// quantity was not recorded). Ties resolve toward the higher price.
fn best_internal_band(observations: &[&PriceObservation]) -> Option<Decimal> {
    let mut velocity_by_price: BTreeMap<Decimal, Decimal> = BTreeMap::new();
    for observation in observations {
        if observation.source != PriceSource::InternalSale {
            continue;
        }
        let moved = observation.quantity.unwrap_or(Decimal::ONE);
        *velocity_by_price.entry(observation.price).or_insert(Decimal::ZERO) += moved;
    }

    velocity_by_price
        .into_iter()
        .max_by(|(price_a, velocity_a), (price_b, velocity_b)| {
            velocity_a.cmp(velocity_b).then(price_a.cmp(price_b))
        })
        .map(|(price, _)| price)
}
