//! # ra-llm-http
//!
//! HTTP adapters for the `TextGenerationPort`: any OpenAI-compatible
//! `/chat/completions` endpoint (OpenAI, vLLM, Ollama, LocalAI, ...) and the
//! Anthropic `/v1/messages` API. Retries and fallback live in the engine's
//! `RetryingGenerator`; a call here is exactly one HTTP request.

use std::time::Duration;

use secrecy::SecretString;

mod anthropic;
mod openai;

pub use anthropic::AnthropicMessagesClient;
pub use openai::OpenAiChatClient;

/// Connection and sampling settings shared by both adapters.
#[derive(Debug, Clone)]
pub struct ProviderOptions {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<SecretString>,
    pub temperature: Option<f32>,
    pub max_tokens: u32,
    /// Transport-level timeout; the engine applies its own per-attempt bound.
    pub request_timeout: Duration,
}

impl ProviderOptions {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            model: model.into(),
            api_key: None,
            temperature: None,
            max_tokens: 1024,
            request_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_api_key(mut self, key: SecretString) -> Self {
        self.api_key = Some(key);
        self
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    fn http_client(&self) -> anyhow::Result<reqwest::Client> {
        Ok(reqwest::Client::builder().timeout(self.request_timeout).build()?)
    }
}

/// Keeps error bodies readable in logs.
fn truncate_body(body: &str) -> &str {
    const MAX: usize = 512;
    if body.len() <= MAX {
        return body;
    }
    let mut end = MAX;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}
