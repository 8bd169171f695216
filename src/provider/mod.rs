//! Model provider abstraction.
//!
//! Every vendor backend sits behind [`ModelProvider`]. The bundled
//! [`HttpModelProvider`] talks to any OpenAI-compatible chat completions
//! endpoint (Groq, OpenAI, Ollama, vLLM).

mod client;
mod types;

pub use client::HttpModelProvider;
pub use types::*;

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::error::ModelResult;

/// A lazy, finite, non-restartable sequence of generated text fragments.
pub type TextStream = BoxStream<'static, ModelResult<String>>;

/// Sampling parameters for a single generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationConfig {
    /// Sampling temperature.
    pub temperature: f32,
    /// Upper bound on generated tokens.
    pub max_tokens: u32,
    /// Stop sequences.
    pub stop: Vec<String>,
    /// Optional system prompt sent ahead of the user prompt.
    pub system: Option<String>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 2048,
            stop: Vec::new(),
            system: None,
        }
    }
}

impl GenerationConfig {
    /// Set the system prompt
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Set the temperature
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set the max tokens
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Text generation backend.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Generate a complete response for `prompt`.
    async fn generate(&self, prompt: &str, config: &GenerationConfig) -> ModelResult<String>;

    /// Generate a response as a stream of fragments.
    async fn generate_stream(
        &self,
        prompt: &str,
        config: &GenerationConfig,
    ) -> ModelResult<TextStream>;

    /// Approximate token count of `text` for this backend.
    fn count_tokens(&self, text: &str) -> usize;
}

/// Rough token estimate (about four characters per token).
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcdefgh"), 2);
        assert_eq!(estimate_tokens("abcdefghi"), 3);
    }

    #[test]
    fn test_generation_config_builders() {
        let config = GenerationConfig::default()
            .with_system("You plan.")
            .with_temperature(0.1)
            .with_max_tokens(100);
        assert_eq!(config.system.as_deref(), Some("You plan."));
        assert_eq!(config.temperature, 0.1);
        assert_eq!(config.max_tokens, 100);
        assert!(config.stop.is_empty());
    }
}
