//! Anthropic Messages API client.

use async_trait::async_trait;
use ra_core::TextGenerationPort;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{truncate_body, ProviderOptions};

const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicMessagesClient {
    client: Client,
    options: ProviderOptions,
}

impl AnthropicMessagesClient {
    pub fn new(options: ProviderOptions) -> anyhow::Result<Self> {
        if options.api_key.is_none() {
            anyhow::bail!("the anthropic provider requires an api key");
        }
        Ok(Self { client: options.http_client()?, options })
    }

    fn headers(&self) -> anyhow::Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        if let Some(key) = &self.options.api_key {
            let mut value = HeaderValue::from_str(key.expose_secret())?;
            value.set_sensitive(true);
            headers.insert("x-api-key", value);
        }
        headers.insert("anthropic-version", HeaderValue::from_static(ANTHROPIC_VERSION));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    fn build_request<'a>(&'a self, system_prompt: &'a str, user_prompt: &'a str) -> MessagesRequest<'a> {
        MessagesRequest {
            model: &self.options.model,
            system: system_prompt,
            messages: vec![Message { role: "user", content: user_prompt }],
            max_tokens: self.options.max_tokens,
            temperature: self.options.temperature,
        }
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    system: &'a str,
    messages: Vec<Message<'a>>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}

/// Concatenates the text blocks of a response.
fn parse_response(body: &str) -> anyhow::Result<String> {
    let response: MessagesResponse = serde_json::from_str(body)?;
    let text: String = response
        .content
        .into_iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } => Some(text),
            ContentBlock::Other => None,
        })
        .collect();
    Ok(text)
}

fn describe_error(status: reqwest::StatusCode, body: &str) -> String {
    match serde_json::from_str::<ApiErrorResponse>(body) {
        Ok(parsed) => format!("HTTP {status} {}: {}", parsed.error.error_type, parsed.error.message),
        Err(_) => format!("HTTP {status}: {}", truncate_body(body)),
    }
}

#[async_trait]
impl TextGenerationPort for AnthropicMessagesClient {
    fn name(&self) -> String {
        format!("anthropic:{}", self.options.model)
    }

    async fn generate(&self, system_prompt: &str, user_prompt: &str) -> anyhow::Result<String> {
        let url = self.options.endpoint("messages");
        let response = self
            .client
            .post(&url)
            .headers(self.headers()?)
            .json(&self.build_request(system_prompt, user_prompt))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            anyhow::bail!(describe_error(status, &body));
        }
        debug!(model = %self.options.model, bytes = body.len(), "message received");
        parse_response(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    fn client() -> AnthropicMessagesClient {
        let options = ProviderOptions::new("https://api.anthropic.com/v1", "claude-test")
            .with_api_key(SecretString::from("sk-test".to_string()));
        AnthropicMessagesClient::new(options).unwrap()
    }

    #[test]
    fn test_requires_api_key() {
        assert!(AnthropicMessagesClient::new(ProviderOptions::new("http://x", "m")).is_err());
    }

    #[test]
    fn test_headers_and_body() {
        let client = client();
        let headers = client.headers().unwrap();
        assert_eq!(headers["anthropic-version"], ANTHROPIC_VERSION);
        assert!(headers["x-api-key"].is_sensitive());

        let json = serde_json::to_value(client.build_request("persona", "prompt")).unwrap();
        assert_eq!(json["system"], "persona");
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["max_tokens"], 1024);
    }

    #[test]
    fn test_parse_joins_text_blocks() {
        let body = r#"{"id":"m","content":[{"type":"text","text":"Hello, "},{"type":"tool_use","id":"t","name":"x","input":{}},{"type":"text","text":"world"}],"stop_reason":"end_turn"}"#;
        assert_eq!(parse_response(body).unwrap(), "Hello, world");
    }

    #[test]
    fn test_error_body_is_described() {
        let body = r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#;
        let msg = describe_error(reqwest::StatusCode::from_u16(529).unwrap(), body);
        assert!(msg.contains("overloaded_error"));
        assert!(msg.contains("Overloaded"));
    }
}
