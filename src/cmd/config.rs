//! Configuration view and validation commands — `narrate config`.

use anyhow::Result;

use super::super::ConfigCommands;

pub fn cmd_config(project_dir: &std::path::Path, command: Option<ConfigCommands>) -> Result<()> {
    use narrate::config::Config;

    let config = Config::load(project_dir)?;
    let config_path = config.config_path();

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Narrate Configuration");
            println!("=====================");
            println!();
            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No narrate.toml found at {}; using defaults.", config_path.display());
            }
            println!();

            let toml = &config.toml;
            println!("[ai]");
            println!("  provider = \"{}\"", toml.ai.provider);
            println!("  model = \"{}\"", toml.ai.model);
            println!("  claude_cmd = \"{}\"", toml.ai.claude_cmd);
            println!("  api_url = \"{}\"", toml.ai.api_url);
            println!(
                "  api_key = {}",
                if toml.ai.api_key.is_some() { "(set)" } else { "(unset)" }
            );
            println!("  timeout_secs = {}", toml.ai.timeout_secs);
            println!("  max_questions = {}", toml.ai.max_questions);
            if let Some(cost) = toml.ai.cost_per_1k_tokens {
                println!("  cost_per_1k_tokens = {}", cost);
            }
            println!();
            println!("[retry]");
            println!("  max_attempts = {}", toml.retry.max_attempts);
            println!("  base_delay_ms = {}", toml.retry.base_delay_ms);
            println!("  max_delay_ms = {}", toml.retry.max_delay_ms);
            println!();
            println!("[clarification]");
            println!(
                "  completeness_threshold = {}",
                toml.clarification.completeness_threshold
            );
            println!();
            println!("[server]");
            println!("  host = \"{}\"", toml.server.host);
            println!("  port = {}", toml.server.port);
            println!("  db_path = \"{}\"", config.db_path().display());
            println!();
            println!("[logging]");
            println!("  level = \"{}\"", toml.logging.level);
            println!("  json = {}", toml.logging.json);
            if let Some(dir) = config.log_dir() {
                println!("  dir = \"{}\"", dir.display());
            }
            println!();
            println!("[auth]");
            println!("  tokens = {}", toml.auth.tokens.len());
            for entry in &toml.auth.tokens {
                let caps: Vec<&str> = entry.capabilities.iter().map(|c| c.as_str()).collect();
                println!(
                    "    {} @ {}: {}",
                    entry.actor_id,
                    entry.company_id,
                    caps.join(", ")
                );
            }
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            let warnings = config.toml.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
    }

    Ok(())
}
