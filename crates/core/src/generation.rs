use crate::error::CapabilityError;
use crate::ollama::{GenerateOptions, OllamaClient};
use async_trait::async_trait;

pub const DEFAULT_GENERATION_MODEL: &str = "llama3.2";

/// Single prompt in, single completion out.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, CapabilityError>;
}

pub struct OllamaGenerator {
    client: OllamaClient,
    model: String,
    options: GenerateOptions,
}

impl OllamaGenerator {
    /// Temperature is pinned to zero.
    pub fn new(client: OllamaClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
            options: GenerateOptions::default(),
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.options.seed = Some(seed);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, CapabilityError> {
        let text = self.client.generate(&self.model, prompt, self.options).await?;
        if text.trim().is_empty() {
            return Err(CapabilityError::EmptyResponse(format!(
                "ollama model {}",
                self.model
            )));
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generator_is_pinned_to_zero_temperature() -> Result<(), CapabilityError> {
        let generator = OllamaGenerator::new(OllamaClient::default_local()?, "llama3.2").with_seed(7);
        assert_eq!(generator.options.temperature, 0.0);
        assert_eq!(generator.options.seed, Some(7));
        assert_eq!(generator.model(), DEFAULT_GENERATION_MODEL);
        Ok(())
    }

    #[test]
    fn adapter_satisfies_generator_trait() {
        fn accepts_generator<G: Generator>(_generator: &G) {}
        let _: fn(&OllamaGenerator) = accepts_generator;
    }
}
