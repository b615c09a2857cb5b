use thiserror::Error;

use crate::flows::FlowTransitionError;

/// Closed error taxonomy for the dialogue orchestration engine.
///
/// Everything that can go wrong on a turn is mapped into one of these
/// variants before it reaches the language model or the user; raw
/// persistence or transport errors never leak past this boundary.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("input was empty after normalization")]
    EmptyInput,
    #[error("a `{active}` flow is already in progress; cannot start `{requested}`")]
    FlowConflict { active: String, requested: String },
    #[error("unknown tool `{0}`")]
    UnknownTool(String),
    #[error("invalid arguments for tool `{tool}`: {reason}")]
    ToolArgument { tool: String, reason: String },
    #[error("not enough price observations to compute a suggestion")]
    InsufficientData,
    #[error("insufficient stock for product `{product_id}`: requested {requested}, available {available}")]
    InsufficientStock { product_id: String, requested: String, available: String },
    #[error("tool invocation budget of {budget} rounds exhausted")]
    LoopBudgetExceeded { budget: u32 },
    #[error("external capability `{capability}` is unavailable")]
    CapabilityUnavailable { capability: String },
    #[error(transparent)]
    FlowTransition(#[from] FlowTransitionError),
}

impl EngineError {
    /// User-safe sentence for each variant. Internal details (tool names,
    /// schema paths, transport errors) stay in logs.
    pub fn user_message(&self) -> String {
        match self {
            Self::EmptyInput => "I didn't catch that. Could you type your message again?".into(),
            Self::FlowConflict { active, .. } => format!(
                "We are in the middle of {active}. Please finish or cancel it before starting something else."
            ),
            Self::UnknownTool(_) | Self::ToolArgument { .. } => {
                "I could not complete that request. Could you rephrase it?".into()
            }
            Self::InsufficientData => {
                "There is not enough recent market data for a price suggestion yet.".into()
            }
            Self::InsufficientStock { requested, available, .. } => format!(
                "Sorry, only {available} is in stock right now (you asked for {requested})."
            ),
            Self::LoopBudgetExceeded { .. } => {
                "I was unable to complete that request. Please try asking in a simpler way.".into()
            }
            Self::CapabilityUnavailable { .. } => {
                "The service is temporarily unavailable. Please try again shortly.".into()
            }
            Self::FlowTransition(_) => {
                "That step is not possible for this order right now.".into()
            }
        }
    }

    /// True when the turn must not advance any flow state, letting the
    /// user retry without losing slot progress.
    pub fn preserves_turn(&self) -> bool {
        matches!(self, Self::CapabilityUnavailable { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::EngineError;

    #[test]
    fn capability_outage_preserves_the_turn() {
        let error = EngineError::CapabilityUnavailable { capability: "language-model".into() };
        assert!(error.preserves_turn());
        assert!(error.user_message().contains("try again shortly"));
    }

    #[test]
    fn stock_error_mentions_quantities_not_internals() {
        let error = EngineError::InsufficientStock {
            product_id: "p-1".into(),
            requested: "5 kg".into(),
            available: "2 kg".into(),
        };
        let message = error.user_message();
        assert!(message.contains("2 kg"));
        assert!(message.contains("5 kg"));
        assert!(!message.contains("p-1"));
    }

    #[test]
    fn schema_errors_never_leak_tool_names_to_users() {
        let error = EngineError::ToolArgument {
            tool: "create_order".into(),
            reason: "missing field `quantity`".into(),
        };
        assert!(!error.user_message().contains("create_order"));
    }
}
