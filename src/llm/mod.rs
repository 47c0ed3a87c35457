//! LLM integration for the post-onboarding assistant.
//!
//! One backend is supported: OpenRouter, spoken to directly over its
//! OpenAI-compatible chat completions API.

mod openrouter;
pub mod provider;

pub use openrouter::{OPENROUTER_BASE_URL, OpenRouterProvider};
pub use provider::*;

use std::sync::Arc;
use std::time::Duration;

use crate::error::LlmError;

pub const DEFAULT_MODEL: &str = "x-ai/grok-3-mini";
pub const DEFAULT_MAX_TOKENS: u32 = 1500;

/// Configuration for creating an LLM provider.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: secrecy::SecretString,
    pub model: String,
    pub max_tokens: u32,
    pub timeout: Duration,
}

/// Create an LLM provider from configuration.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    let provider = OpenRouterProvider::new(config.api_key.clone(), &config.model, config.timeout)?;
    tracing::info!("Using OpenRouter (model: {})", config.model);
    Ok(Arc::new(provider))
}
