pub mod engine;
pub mod states;

pub use engine::{FlowTransitionError, OrderFlow};
pub use states::{FlowAction, OrderEvent, OrderFlowContext, TransitionOutcome};
