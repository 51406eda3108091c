use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use super::{AiTextService, Completion};
use crate::config::AiConfig;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_OUTPUT_TOKENS: u32 = 1024;

/// Calls the Anthropic Messages API directly.
pub struct AnthropicHttpService {
    client: Client,
    url: String,
    api_key: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

impl MessagesResponse {
    fn into_completion(self) -> Completion {
        let text = self
            .content
            .into_iter()
            .filter(|b| b.kind == "text")
            .map(|b| b.text)
            .collect::<Vec<_>>()
            .join("");
        Completion {
            text,
            tokens_used: self.usage.map(|u| u.input_tokens + u.output_tokens),
        }
    }
}

impl AnthropicHttpService {
    pub fn new(config: &AiConfig, api_key: &str) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            url: format!("{}/v1/messages", config.api_url.trim_end_matches('/')),
            api_key: api_key.to_string(),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl AiTextService for AnthropicHttpService {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str, model_hint: Option<&str>) -> Result<Completion> {
        let body = json!({
            "model": model_hint.unwrap_or(&self.model),
            "max_tokens": MAX_OUTPUT_TOKENS,
            "messages": [{"role": "user", "content": prompt}],
        });

        let response = self
            .client
            .post(&self.url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .context("Anthropic request failed")?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let snippet: String = text.chars().take(300).collect();
            anyhow::bail!("Anthropic API error {}: {}", status.as_u16(), snippet);
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .context("Failed to decode Anthropic response")?;
        Ok(parsed.into_completion())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_joins_text_blocks_and_sums_usage() {
        let raw = r#"{
            "content": [
                {"type": "text", "text": "{\"questions\": "},
                {"type": "tool_use", "id": "x"},
                {"type": "text", "text": "[\"Who was present?\"]}"}
            ],
            "usage": {"input_tokens": 300, "output_tokens": 25}
        }"#;
        let parsed: MessagesResponse = serde_json::from_str(raw).unwrap();
        let completion = parsed.into_completion();
        assert_eq!(completion.text, r#"{"questions": ["Who was present?"]}"#);
        assert_eq!(completion.tokens_used, Some(325));
    }

    #[test]
    fn test_messages_url_is_normalized() -> Result<()> {
        let config = AiConfig {
            api_url: "https://api.anthropic.com/".into(),
            ..AiConfig::default()
        };
        let service = AnthropicHttpService::new(&config, "sk-test")?;
        assert_eq!(service.url, "https://api.anthropic.com/v1/messages");
        Ok(())
    }
}
