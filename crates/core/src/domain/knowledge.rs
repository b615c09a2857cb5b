use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::product::ProductId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SnippetId(pub String);

impl SnippetId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

/// A curated question/answer pair about a product or farming practice.
/// Snippets are evidence for replies; they never trigger tool calls.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeSnippet {
    pub id: SnippetId,
    pub product_id: Option<ProductId>,
    pub question: String,
    pub answer: String,
    /// BCP 47 style tag of the answer text (`en`, `am`).
    pub language: String,
}
