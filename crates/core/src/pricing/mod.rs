pub mod engine;

pub use engine::{PricingInsightEngine, PricingParams};
