use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::product::ProductId;

/// Where a price observation came from. Competitor sources are scraped or
/// surveyed listings; internal sales carry the quantity that moved.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceSource {
    CompetitorLocal,
    CompetitorSupermarket,
    InternalSale,
}

impl PriceSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CompetitorLocal => "competitor_local",
            Self::CompetitorSupermarket => "competitor_supermarket",
            Self::InternalSale => "internal_sale",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "competitor_local" => Some(Self::CompetitorLocal),
            "competitor_supermarket" => Some(Self::CompetitorSupermarket),
            "internal_sale" => Some(Self::InternalSale),
            _ => None,
        }
    }

    pub fn is_competitor(&self) -> bool {
        matches!(self, Self::CompetitorLocal | Self::CompetitorSupermarket)
    }
}

/// Immutable once recorded; the pricing engine only reads.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PriceObservation {
    pub product_id: ProductId,
    pub source: PriceSource,
    pub price: Decimal,
    /// Quantity sold at this price, for internal-sale observations.
    pub quantity: Option<Decimal>,
    pub observed_at: DateTime<Utc>,
}

/// Derived on demand, never persisted as authoritative.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PricingSuggestion {
    pub product_id: ProductId,
    pub suggested_price: Decimal,
    /// Per-source medians and sample sizes the suggestion was derived from.
    pub rationale: Vec<SourceSummary>,
    pub valid_until: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SourceSummary {
    pub source: PriceSource,
    pub median: Decimal,
    pub min: Decimal,
    pub max: Decimal,
    pub samples: usize,
}

/// Discount nudge for a product close to expiry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FlashSaleNudge {
    pub product_id: ProductId,
    pub days_remaining: i64,
    /// Fraction of the current price to discount, in [0, 1).
    pub discount_fraction: Decimal,
}
