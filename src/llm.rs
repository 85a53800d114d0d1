//! LLM generation collaborator.
//!
//! The engine treats text generation as an opaque async call that returns
//! content plus usage, or fails. The production implementation drives an
//! Anthropic model through rig-core; tests substitute scripted
//! generators behind the same trait.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use crate::error::{Error, Result};

/// One generation call.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub system: String,
    pub prompt: String,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u64,
}

/// Output of a generation call, with the usage the provider reported.
#[derive(Debug, Clone)]
pub struct Generation {
    pub content: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cost_usd: f64,
}

#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<Generation>;
}

/// Anthropic-backed generator via rig-core.
pub struct AnthropicGenerator {
    client: rig::providers::anthropic::Client,
}

impl AnthropicGenerator {
    /// Create a generator from a secret API key.
    ///
    /// # Errors
    /// Returns an error if the underlying HTTP client cannot be constructed.
    pub fn new(api_key: &SecretString) -> Result<Self> {
        let client = rig::providers::anthropic::Client::new(api_key.expose_secret())
            .map_err(|e| Error::Config(format!("cannot create Anthropic client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Generator for AnthropicGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<Generation> {
        use rig::client::CompletionClient;
        use rig::completion::{AssistantContent, Completion};

        let agent = self
            .client
            .agent(&request.model)
            .preamble(&request.system)
            .temperature(request.temperature)
            .max_tokens(request.max_tokens)
            .build();

        let response = agent
            .completion(request.prompt.as_str(), Vec::new())
            .await
            .map_err(|e| Error::Generation(e.to_string()))?
            .send()
            .await
            .map_err(|e| Error::Generation(e.to_string()))?;

        let content: String = response
            .choice
            .iter()
            .filter_map(|part| match part {
                AssistantContent::Text(text) => Some(text.text.clone()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("");

        let prompt_tokens = response.usage.input_tokens;
        let completion_tokens = response.usage.output_tokens;
        let cost_usd = price_for(&request.model).cost(prompt_tokens, completion_tokens);

        Ok(Generation {
            content,
            prompt_tokens,
            completion_tokens,
            cost_usd,
        })
    }
}

// ---------------------------------------------------------------------------
// Pricing
// ---------------------------------------------------------------------------

/// Per-model pricing in USD per million tokens.
#[derive(Debug, Clone, Copy)]
pub struct ModelPrice {
    pub input_per_mtok: f64,
    pub output_per_mtok: f64,
}

impl ModelPrice {
    pub fn cost(&self, prompt_tokens: u64, completion_tokens: u64) -> f64 {
        (prompt_tokens as f64 * self.input_per_mtok
            + completion_tokens as f64 * self.output_per_mtok)
            / 1_000_000.0
    }
}

/// Look up pricing by model-id prefix. Unknown models fall back to the
/// mid-tier rate so budget enforcement stays conservative rather than
/// free.
pub fn price_for(model: &str) -> ModelPrice {
    if model.starts_with("claude-opus") {
        ModelPrice {
            input_per_mtok: 15.0,
            output_per_mtok: 75.0,
        }
    } else if model.starts_with("claude-haiku") || model.contains("haiku") {
        ModelPrice {
            input_per_mtok: 0.80,
            output_per_mtok: 4.0,
        }
    } else {
        // claude-sonnet and anything unrecognized
        ModelPrice {
            input_per_mtok: 3.0,
            output_per_mtok: 15.0,
        }
    }
}
