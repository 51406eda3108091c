//! Configuration read from `.narrate/narrate.toml`.
//!
//! Layered as file → environment → CLI flags. Every section is optional and
//! defaulted, so an empty file is a valid configuration.
//!
//! ```toml
//! [ai]
//! provider = "claude_cli"        # or "anthropic"
//! model = "claude-sonnet-4-5"
//! claude_cmd = "claude"
//! api_url = "https://api.anthropic.com"
//! timeout_secs = 60
//! max_questions = 5
//! cost_per_1k_tokens = 0.003
//!
//! [retry]
//! max_attempts = 3
//! base_delay_ms = 1000
//! max_delay_ms = 8000
//!
//! [clarification]
//! completeness_threshold = 10
//!
//! [server]
//! host = "127.0.0.1"
//! port = 3150
//! db_path = ".narrate/narrate.db"
//!
//! [logging]
//! level = "info"
//! json = false
//! dir = ".narrate/logs"
//!
//! [[auth.tokens]]
//! token = "dev-token"
//! actor_id = "safety-officer-1"
//! company_id = "acme"
//! capabilities = ["edit_own_capture", "view_company_incidents", "access_ai_features"]
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use narrate_common::Capability;
use serde::{Deserialize, Serialize};

use crate::backoff::RetryPolicy;
use crate::clarification::DEFAULT_COMPLETENESS_THRESHOLD;
use crate::questions::DEFAULT_MAX_QUESTIONS;

pub const NARRATE_DIR: &str = ".narrate";
pub const CONFIG_FILE: &str = "narrate.toml";

/// Which AI backend answers completion calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AiProvider {
    #[default]
    ClaudeCli,
    Anthropic,
}

impl AiProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClaudeCli => "claude_cli",
            Self::Anthropic => "anthropic",
        }
    }
}

impl fmt::Display for AiProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AiProvider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "claude_cli" | "claude" => Ok(Self::ClaudeCli),
            "anthropic" => Ok(Self::Anthropic),
            _ => anyhow::bail!("Unknown AI provider '{}': expected claude_cli or anthropic", s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiConfig {
    #[serde(default)]
    pub provider: AiProvider,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_claude_cmd")]
    pub claude_cmd: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Only ever read from `ANTHROPIC_API_KEY`.
    #[serde(skip)]
    pub api_key: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_questions")]
    pub max_questions: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_per_1k_tokens: Option<f64>,
}

fn default_model() -> String {
    "claude-sonnet-4-5".to_string()
}

fn default_claude_cmd() -> String {
    "claude".to_string()
}

fn default_api_url() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_max_questions() -> usize {
    DEFAULT_MAX_QUESTIONS
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            provider: AiProvider::default(),
            model: default_model(),
            claude_cmd: default_claude_cmd(),
            api_url: default_api_url(),
            api_key: None,
            timeout_secs: default_timeout_secs(),
            max_questions: default_max_questions(),
            cost_per_1k_tokens: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClarificationConfig {
    #[serde(default = "default_completeness_threshold")]
    pub completeness_threshold: usize,
}

fn default_completeness_threshold() -> usize {
    DEFAULT_COMPLETENESS_THRESHOLD
}

impl Default for ClarificationConfig {
    fn default() -> Self {
        Self {
            completeness_threshold: DEFAULT_COMPLETENESS_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3150
}

fn default_db_path() -> PathBuf {
    PathBuf::from(NARRATE_DIR).join("narrate.db")
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            db_path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
    /// Directory for daily rolling log files; stderr only when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
            dir: None,
        }
    }
}

/// One static bearer token and what it may do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenEntry {
    pub token: String,
    pub actor_id: String,
    pub company_id: String,
    #[serde(default)]
    pub capabilities: Vec<Capability>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub tokens: Vec<TokenEntry>,
}

/// The complete narrate.toml structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NarrateToml {
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub clarification: ClarificationConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

impl NarrateToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse narrate.toml")
    }

    /// Load `<narrate_dir>/narrate.toml`, or defaults when it does not exist.
    pub fn load_or_default(narrate_dir: &Path) -> Result<Self> {
        let path = narrate_dir.join(CONFIG_FILE);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize narrate.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply environment overrides using `lookup` to read variables.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("NARRATE_DB_PATH") {
            self.server.db_path = PathBuf::from(path);
        }
        if let Some(provider) = lookup("NARRATE_AI_PROVIDER") {
            self.ai.provider = provider
                .parse()
                .context("Invalid NARRATE_AI_PROVIDER")?;
        }
        if let Some(cmd) = lookup("CLAUDE_CMD") {
            self.ai.claude_cmd = cmd;
        }
        if let Some(key) = lookup("ANTHROPIC_API_KEY") {
            self.ai.api_key = Some(key);
        }
        Ok(())
    }

    /// Check the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.ai.max_questions == 0 {
            warnings.push("ai.max_questions is 0; at least one question is always kept".to_string());
        }
        if self.ai.timeout_secs == 0 {
            warnings.push("ai.timeout_secs is 0; every AI call will time out".to_string());
        }
        if self.ai.provider == AiProvider::Anthropic && self.ai.api_key.is_none() {
            warnings.push("ai.provider is anthropic but ANTHROPIC_API_KEY is not set".to_string());
        }
        if self.retry.max_attempts == 0 {
            warnings.push("retry.max_attempts is 0; calls are still attempted once".to_string());
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            warnings.push(format!(
                "retry.base_delay_ms ({}) exceeds retry.max_delay_ms ({})",
                self.retry.base_delay_ms, self.retry.max_delay_ms
            ));
        }
        if self.auth.tokens.is_empty() {
            warnings.push("auth.tokens is empty; every request will be rejected".to_string());
        }
        for (i, entry) in self.auth.tokens.iter().enumerate() {
            if entry.token.trim().is_empty() {
                warnings.push(format!("auth.tokens[{}] has an empty token", i));
            }
            if entry.capabilities.is_empty() {
                warnings.push(format!(
                    "auth.tokens[{}] ({}) grants no capabilities",
                    i, entry.actor_id
                ));
            }
        }

        warnings
    }
}

/// Resolved runtime configuration for one project directory.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub narrate_dir: PathBuf,
    pub toml: NarrateToml,
}

impl Config {
    /// Load `.narrate/narrate.toml` under `project_dir` and apply the process environment.
    pub fn load(project_dir: &Path) -> Result<Self> {
        let narrate_dir = project_dir.join(NARRATE_DIR);
        let mut toml = NarrateToml::load_or_default(&narrate_dir)?;
        toml.apply_env(|key| std::env::var(key).ok())?;
        Ok(Self {
            project_dir: project_dir.to_path_buf(),
            narrate_dir,
            toml,
        })
    }

    pub fn config_path(&self) -> PathBuf {
        self.narrate_dir.join(CONFIG_FILE)
    }

    /// Database path, resolved against the project directory when relative.
    pub fn db_path(&self) -> PathBuf {
        let path = &self.toml.server.db_path;
        if path.is_absolute() {
            path.clone()
        } else {
            self.project_dir.join(path)
        }
    }

    /// Log directory, resolved against the project directory when relative.
    pub fn log_dir(&self) -> Option<PathBuf> {
        self.toml.logging.dir.as_ref().map(|dir| {
            if dir.is_absolute() {
                dir.clone()
            } else {
                self.project_dir.join(dir)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_empty_file_uses_defaults() -> Result<()> {
        let config = NarrateToml::parse("")?;
        assert_eq!(config, NarrateToml::default());
        assert_eq!(config.ai.provider, AiProvider::ClaudeCli);
        assert_eq!(config.ai.max_questions, 5);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay_ms, 1000);
        assert_eq!(config.retry.max_delay_ms, 8000);
        assert_eq!(config.clarification.completeness_threshold, 10);
        Ok(())
    }

    #[test]
    fn test_parse_full_file() -> Result<()> {
        let config = NarrateToml::parse(
            r#"
            [ai]
            provider = "anthropic"
            model = "claude-haiku-4-5"
            cost_per_1k_tokens = 0.25

            [retry]
            max_attempts = 5

            [clarification]
            completeness_threshold = 20

            [server]
            port = 9000

            [logging]
            json = true

            [[auth.tokens]]
            token = "abc"
            actor_id = "u1"
            company_id = "acme"
            capabilities = ["edit_own_capture", "access_ai_features"]
            "#,
        )?;

        assert_eq!(config.ai.provider, AiProvider::Anthropic);
        assert_eq!(config.ai.model, "claude-haiku-4-5");
        assert_eq!(config.ai.cost_per_1k_tokens, Some(0.25));
        assert_eq!(config.ai.claude_cmd, "claude");
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay_ms, 1000);
        assert_eq!(config.clarification.completeness_threshold, 20);
        assert_eq!(config.server.port, 9000);
        assert!(config.logging.json);
        assert_eq!(
            config.auth.tokens[0].capabilities,
            vec![Capability::EditOwnCapture, Capability::AccessAiFeatures]
        );
        Ok(())
    }

    #[test]
    fn test_unknown_capability_is_rejected() {
        let result = NarrateToml::parse(
            r#"
            [[auth.tokens]]
            token = "abc"
            actor_id = "u1"
            company_id = "acme"
            capabilities = ["delete_everything"]
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_env_overrides_file_values() -> Result<()> {
        let mut config = NarrateToml::parse("[server]\ndb_path = \"from-file.db\"")?;
        let env: HashMap<&str, &str> = HashMap::from([
            ("NARRATE_DB_PATH", "/tmp/from-env.db"),
            ("NARRATE_AI_PROVIDER", "anthropic"),
            ("ANTHROPIC_API_KEY", "sk-test"),
            ("CLAUDE_CMD", "/opt/claude"),
        ]);
        config.apply_env(|k| env.get(k).map(|v| v.to_string()))?;

        assert_eq!(config.server.db_path, PathBuf::from("/tmp/from-env.db"));
        assert_eq!(config.ai.provider, AiProvider::Anthropic);
        assert_eq!(config.ai.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.ai.claude_cmd, "/opt/claude");
        Ok(())
    }

    #[test]
    fn test_invalid_env_provider_is_an_error() -> Result<()> {
        let mut config = NarrateToml::default();
        let result = config.apply_env(|k| (k == "NARRATE_AI_PROVIDER").then(|| "gpt".to_string()));
        assert!(result.is_err());
        Ok(())
    }

    #[test]
    fn test_validate_reports_problems() {
        let mut config = NarrateToml::default();
        config.retry.base_delay_ms = 10_000;
        config.auth.tokens.push(TokenEntry {
            token: "".into(),
            actor_id: "u1".into(),
            company_id: "acme".into(),
            capabilities: vec![],
        });

        let warnings = config.validate();
        assert!(warnings.iter().any(|w| w.contains("base_delay_ms")));
        assert!(warnings.iter().any(|w| w.contains("empty token")));
        assert!(warnings.iter().any(|w| w.contains("grants no capabilities")));
    }

    #[test]
    fn test_save_and_load_round_trip() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut config = NarrateToml::default();
        config.ai.api_key = Some("secret".into());
        config.server.port = 4000;
        let path = dir.path().join(CONFIG_FILE);
        config.save(&path)?;

        let content = std::fs::read_to_string(&path)?;
        assert!(!content.contains("secret"), "API keys are never written to disk");
        let loaded = NarrateToml::load_or_default(dir.path())?;
        assert_eq!(loaded.server.port, 4000);
        assert!(loaded.ai.api_key.is_none());
        Ok(())
    }

    #[test]
    fn test_relative_paths_resolve_against_project_dir() {
        let config = Config {
            project_dir: PathBuf::from("/srv/app"),
            narrate_dir: PathBuf::from("/srv/app/.narrate"),
            toml: NarrateToml {
                logging: LoggingConfig {
                    dir: Some(PathBuf::from("logs")),
                    ..LoggingConfig::default()
                },
                ..NarrateToml::default()
            },
        };
        assert_eq!(config.db_path(), PathBuf::from("/srv/app/.narrate/narrate.db"));
        assert_eq!(config.log_dir(), Some(PathBuf::from("/srv/app/logs")));
    }
}
