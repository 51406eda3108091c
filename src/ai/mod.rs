//! Adapters for the external AI text-generation service.
//!
//! Adapters make exactly one attempt per call; retries belong to
//! [`crate::backoff::Backoff`].

mod anthropic;
mod claude_cli;

use std::sync::Arc;

use anyhow::{Result, bail};
use async_trait::async_trait;
use serde::Serialize;

use crate::config::{AiConfig, AiProvider};

pub use anthropic::AnthropicHttpService;
pub use claude_cli::ClaudeCliService;

/// Text returned by one completion call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Completion {
    pub text: String,
    /// Input plus output tokens, when the backend reports them.
    pub tokens_used: Option<u64>,
}

#[async_trait]
pub trait AiTextService: Send + Sync {
    /// Model identifier recorded as question provenance.
    fn model_id(&self) -> &str;

    async fn complete(&self, prompt: &str, model_hint: Option<&str>) -> Result<Completion>;
}

/// Build the configured backend.
pub fn build_service(config: &AiConfig) -> Result<Arc<dyn AiTextService>> {
    match config.provider {
        AiProvider::ClaudeCli => Ok(Arc::new(ClaudeCliService::new(config))),
        AiProvider::Anthropic => {
            let Some(key) = config.api_key.as_deref().filter(|k| !k.is_empty()) else {
                bail!("ai.provider is \"anthropic\" but ANTHROPIC_API_KEY is not set");
            };
            Ok(Arc::new(AnthropicHttpService::new(config, key)?))
        }
    }
}

/// Estimated spend for `tokens` at `cost_per_1k` per thousand tokens.
pub fn estimate_cost(tokens: Option<u64>, cost_per_1k: Option<f64>) -> Option<f64> {
    Some(tokens? as f64 / 1000.0 * cost_per_1k?)
}
