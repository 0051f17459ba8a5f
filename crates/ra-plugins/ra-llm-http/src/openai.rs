//! OpenAI-compatible chat completions client.

use async_trait::async_trait;
use ra_core::TextGenerationPort;
use reqwest::{header, Client};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{truncate_body, ProviderOptions};

pub struct OpenAiChatClient {
    client: Client,
    options: ProviderOptions,
}

impl OpenAiChatClient {
    pub fn new(options: ProviderOptions) -> anyhow::Result<Self> {
        Ok(Self { client: options.http_client()?, options })
    }

    fn chat_completions_url(&self) -> String {
        self.options.endpoint("chat/completions")
    }

    fn build_request(&self, system_prompt: &str, user_prompt: &str) -> ChatRequest {
        ChatRequest {
            model: self.options.model.clone(),
            messages: vec![
                ChatMessage { role: "system", content: system_prompt.to_string() },
                ChatMessage { role: "user", content: user_prompt.to_string() },
            ],
            max_tokens: Some(self.options.max_tokens),
            temperature: self.options.temperature,
            stream: false,
        }
    }
}

/// OpenAI chat completion request body.
#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

/// OpenAI chat completion response.
#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: MessageResponse,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    content: Option<String>,
}

fn parse_response(body: &str) -> anyhow::Result<String> {
    let response: ChatResponse = serde_json::from_str(body)?;
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("no choices in response"))?;
    if choice.finish_reason.as_deref() == Some("content_filter") {
        anyhow::bail!("completion stopped by content filter");
    }
    Ok(choice.message.content.unwrap_or_default())
}

#[async_trait]
impl TextGenerationPort for OpenAiChatClient {
    fn name(&self) -> String {
        format!("openai:{}", self.options.model)
    }

    async fn generate(&self, system_prompt: &str, user_prompt: &str) -> anyhow::Result<String> {
        let mut request = self
            .client
            .post(self.chat_completions_url())
            .json(&self.build_request(system_prompt, user_prompt));
        if let Some(key) = &self.options.api_key {
            request = request.header(header::AUTHORIZATION, format!("Bearer {}", key.expose_secret()));
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            anyhow::bail!("HTTP {status}: {}", truncate_body(&body));
        }
        debug!(model = %self.options.model, bytes = body.len(), "chat completion received");
        parse_response(&body)
    }
}
