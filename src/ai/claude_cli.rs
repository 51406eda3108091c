use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;

use super::{AiTextService, Completion};
use crate::config::AiConfig;

const SYSTEM_PROMPT: &str = "You help safety officers clarify incident reports. \
Follow the response format the user asks for exactly.";

/// Calls the `claude` CLI in print mode, one subprocess per completion.
pub struct ClaudeCliService {
    claude_cmd: String,
    model: String,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct CliEnvelope {
    result: String,
    #[serde(default)]
    usage: Option<CliUsage>,
}

#[derive(Debug, Deserialize)]
struct CliUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

impl ClaudeCliService {
    pub fn new(config: &AiConfig) -> Self {
        Self {
            claude_cmd: config.claude_cmd.clone(),
            model: config.model.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    /// Accept the CLI's JSON envelope, or plain text from older versions.
    fn parse_output(stdout: &str) -> Completion {
        match serde_json::from_str::<CliEnvelope>(stdout.trim()) {
            Ok(envelope) => Completion {
                text: envelope.result,
                tokens_used: envelope.usage.map(|u| u.input_tokens + u.output_tokens),
            },
            Err(_) => Completion {
                text: stdout.to_string(),
                tokens_used: None,
            },
        }
    }
}

#[async_trait]
impl AiTextService for ClaudeCliService {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str, model_hint: Option<&str>) -> Result<Completion> {
        let model = model_hint.unwrap_or(&self.model);
        let run = Command::new(&self.claude_cmd)
            .args([
                "--print",
                "--output-format",
                "json",
                "--model",
                model,
                "--system-prompt",
                SYSTEM_PROMPT,
                "-p",
                prompt,
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, run)
            .await
            .with_context(|| format!("claude CLI timed out after {:?}", self.timeout))?
            .context("Failed to run claude CLI")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("claude CLI exited with {}: {}", output.status, stderr.trim());
        }

        Ok(Self::parse_output(&String::from_utf8_lossy(&output.stdout)))
    }
}
