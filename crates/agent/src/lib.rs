//! Conversational layer of the marketplace: sessions, the tool-call loop,
//! and the model backends.
//!
//! The model is strictly a translator; prices, stock, and order state are
//! decided by the engine and its tools.

pub mod engine;
pub mod gemini;
pub mod images;
pub mod lang;
pub mod llm;
pub mod ollama;
pub mod orchestrator;
pub mod retrieval;
pub mod session;
pub mod timers;
pub mod tools;
pub mod toolset;

pub use engine::DialogueEngine;
pub use gemini::GeminiClient;
pub use images::{ImageGeneration, PlaceholderImageGenerator};
pub use ollama::OllamaClient;
pub use lang::{LanguageNormalizer, LanguageTag, ScriptDetector};
pub use retrieval::{evidence_block, EmbeddingSearch, KeywordSearch};
pub use llm::{LanguageModel, LlmError, Message, ModelResponse, ScriptedModel};
pub use orchestrator::Orchestrator;
pub use session::{SessionId, SessionStore};
pub use timers::ConfirmationScheduler;
pub use tools::{Tool, ToolAccess, ToolContext, ToolDescriptor, ToolRegistry};
pub use toolset::{standard_registry, ToolDeps};
