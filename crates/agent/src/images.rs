use async_trait::async_trait;

use kcart_core::errors::EngineError;

/// Produces a marketing image for a product listing and returns a storable
/// reference. Listings work without one; generation failure never blocks
/// onboarding.
#[async_trait]
pub trait ImageGeneration: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, EngineError>;
}

/// Deterministic stand-in used when no image backend is configured. The
/// reference encodes the prompt slug so listings stay distinguishable.
#[derive(Clone, Debug, Default)]
pub struct PlaceholderImageGenerator;

#[async_trait]
impl ImageGeneration for PlaceholderImageGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, EngineError> {
        let slug: String = prompt
            .to_lowercase()
            .chars()
            .map(|ch| if ch.is_alphanumeric() { ch } else { '-' })
            .collect::<String>()
            .split('-')
            .filter(|part| !part.is_empty())
            .take(6)
            .collect::<Vec<&str>>()
            .join("-");

        if slug.is_empty() {
            return Err(EngineError::ToolArgument {
                tool: "generate_product_image".to_string(),
                reason: "image prompt is empty".to_string(),
            });
        }

        Ok(format!("img://placeholder/{slug}"))
    }
}
