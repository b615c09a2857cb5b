//! Domain core for the Kcart dialogue engine.
//!
//! Everything in this crate is deterministic and side-effect free: the
//! order flow state machine, the pricing insight engine, domain types, and
//! layered configuration. IO lives in the `kcart-db` and `kcart-agent`
//! crates, which depend on this one.

pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod pricing;

pub use config::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};
pub use errors::EngineError;
pub use flows::{FlowAction, FlowTransitionError, OrderEvent, OrderFlow, TransitionOutcome};
pub use pricing::{PricingInsightEngine, PricingParams};
