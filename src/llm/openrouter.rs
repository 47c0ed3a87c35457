//! OpenRouter provider (OpenAI-compatible chat completions over reqwest).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::provider::{ChatMessage, CompletionRequest, CompletionResponse, LlmProvider};
use crate::error::LlmError;

pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";

const PROVIDER: &str = "openrouter";

pub struct OpenRouterProvider {
    http: reqwest::Client,
    api_key: SecretString,
    model: String,
    base_url: String,
}

impl OpenRouterProvider {
    pub fn new(api_key: SecretString, model: &str, timeout: Duration) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::RequestFailed {
                provider: PROVIDER.to_string(),
                reason: format!("Failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            http,
            api_key,
            model: model.to_string(),
            base_url: OPENROUTER_BASE_URL.to_string(),
        })
    }

    /// Point at a different OpenAI-compatible endpoint.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn body<'a>(&'a self, request: &'a CompletionRequest) -> ChatCompletionBody<'a> {
        ChatCompletionBody {
            model: &self.model,
            messages: &request.messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        }
    }
}

#[derive(Serialize)]
struct ChatCompletionBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Deserialize)]
struct ChatCompletionReply {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

/// Extract the first choice's text. Missing content yields an empty string.
fn parse_reply(text: &str) -> Result<CompletionResponse, LlmError> {
    let reply: ChatCompletionReply = serde_json::from_str(text)?;
    let content = reply
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .unwrap_or_default();
    let (input_tokens, output_tokens) = reply
        .usage
        .map(|u| (u.prompt_tokens, u.completion_tokens))
        .unwrap_or((0, 0));
    Ok(CompletionResponse {
        content,
        input_tokens,
        output_tokens,
    })
}

#[async_trait]
impl LlmProvider for OpenRouterProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        tracing::debug!(url = %url, model = %self.model, provider = PROVIDER, "Sending LLM request");

        let response = self
            .http
            .post(&url)
            .bearer_auth(self.api_key.expose_secret())
            .json(&self.body(&request))
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed {
                provider: PROVIDER.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| LlmError::RequestFailed {
            provider: PROVIDER.to_string(),
            reason: e.to_string(),
        })?;

        match status {
            s if s.is_success() => parse_reply(&text),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(LlmError::AuthFailed {
                provider: PROVIDER.to_string(),
            }),
            StatusCode::TOO_MANY_REQUESTS => Err(LlmError::RateLimited {
                provider: PROVIDER.to_string(),
            }),
            s => Err(LlmError::RequestFailed {
                provider: PROVIDER.to_string(),
                reason: format!("HTTP {s}: {text}"),
            }),
        }
    }
}
