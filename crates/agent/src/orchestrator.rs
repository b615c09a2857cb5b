//! The bounded tool-call loop between the model and the registry.
//!
//! The model is strictly a translator: it picks tools and phrases replies,
//! while every business decision happens inside tool invocations. The loop
//! runs at most a fixed number of rounds per user turn so a misbehaving
//! model cannot spin the engine.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{info, warn};

use kcart_core::errors::EngineError;

use crate::llm::{LanguageModel, LlmError, Message, ModelResponse};
use crate::tools::{ToolContext, ToolRegistry};

pub struct Orchestrator {
    model: Arc<dyn LanguageModel>,
    registry: Arc<ToolRegistry>,
    max_rounds: u32,
}

impl Orchestrator {
    pub fn new(model: Arc<dyn LanguageModel>, registry: Arc<ToolRegistry>, max_rounds: u32) -> Self {
        Self { model, registry, max_rounds: max_rounds.max(1) }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Drive one user turn to a textual reply. `messages` is the retained
    /// transcript ending with the current user message; tool observations
    /// are appended to it as the loop progresses.
    pub async fn run_turn(
        &self,
        system_prompt: &str,
        ctx: &mut ToolContext,
        mut messages: Vec<Message>,
    ) -> Result<String, EngineError> {
        let catalog = self.registry.catalog(ctx.user_type(), &ctx.flow);
        // Each tool gets exactly one schema-correction attempt per turn;
        // after that its failures are surfaced instead of retried.
        let mut corrected: HashSet<String> = HashSet::new();

        for round in 0..self.max_rounds {
            let response = self
                .model
                .complete(system_prompt, &messages, &catalog)
                .await
                .map_err(model_unavailable)?;

            let calls = match response {
                ModelResponse::Reply(reply) => return Ok(reply),
                ModelResponse::ToolCalls(calls) => calls,
            };

            for call in calls {
                info!(tool = %call.name, round, event_name = "tool_call", "model requested tool");
                match self.registry.invoke(&call.name, ctx, &call.arguments).await {
                    Ok(result) => {
                        messages.push(Message::tool(&call.name, result.to_string()));
                    }
                    Err(
                        error @ (EngineError::UnknownTool(_) | EngineError::ToolArgument { .. }),
                    ) if corrected.insert(call.name.clone()) => {
                        // Malformed call: feed the violation back once so the
                        // model can repair its own arguments.
                        messages.push(Message::tool(
                            &call.name,
                            format!("invalid call: {error}. Correct the call and try again."),
                        ));
                    }
                    Err(error) if error.preserves_turn() => return Err(error),
                    Err(error) => {
                        // Business rejection: the model relays it, it does
                        // not retry mutations on its own initiative.
                        warn!(tool = %call.name, error = %error, "tool rejected call");
                        messages.push(Message::tool(
                            &call.name,
                            format!("rejected: {}", error.user_message()),
                        ));
                    }
                }
            }
        }

        Err(EngineError::LoopBudgetExceeded { budget: self.max_rounds })
    }
}

fn model_unavailable(err: LlmError) -> EngineError {
    warn!(error = %err, "language model unavailable");
    EngineError::CapabilityUnavailable { capability: "language-model".to_string() }
}
