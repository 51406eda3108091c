//! Prompt template inspection — `narrate templates`.

use std::path::Path;

use anyhow::{Context, Result};

use super::super::TemplatesCommands;

pub async fn cmd_templates(project_dir: &Path, command: TemplatesCommands) -> Result<()> {
    use narrate::config::Config;
    use narrate::db::{DbHandle, Store};
    use narrate::templates::TemplateRegistry;

    let config = Config::load(project_dir)?;
    let db_path = config.db_path();
    if !db_path.exists() {
        anyhow::bail!(
            "No database at {}. Run `narrate init` first.",
            db_path.display()
        );
    }
    let store = Store::new(&db_path).context("Failed to open narrate database")?;
    let registry = TemplateRegistry::new(DbHandle::new(store));

    match command {
        TemplatesCommands::List => {
            let templates = registry.list().await?;
            if templates.is_empty() {
                println!("No templates registered.");
                return Ok(());
            }
            println!(
                "{:<32} {:>7}  {:<8} {:>6} {:>10} {:>8}",
                "NAME", "VERSION", "STATUS", "USES", "AVG MS", "SUCCESS"
            );
            for t in templates {
                println!(
                    "{:<32} {:>7}  {:<8} {:>6} {:>10.1} {:>7.0}%",
                    t.name,
                    t.version,
                    t.lifecycle.as_str(),
                    t.stats.usage_count,
                    t.stats.avg_latency_ms,
                    t.stats.success_rate * 100.0
                );
            }
        }
        TemplatesCommands::Show { name } => {
            let template = registry
                .get_active(&name, None)
                .await?
                .with_context(|| format!("No active template named '{}'", name))?;
            println!("{} v{} ({})", template.name, template.version, template.subsystem);
            if let Some(hint) = &template.model_hint {
                println!("model hint: {}", hint);
            }
            println!(
                "uses: {}  avg latency: {:.1} ms  success: {:.0}%",
                template.stats.usage_count,
                template.stats.avg_latency_ms,
                template.stats.success_rate * 100.0
            );
            println!();
            println!("{}", template.body);
        }
        TemplatesCommands::Register {
            name,
            file,
            subsystem,
            model_hint,
        } => {
            let body = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read template body: {}", file.display()))?;
            if body.trim().is_empty() {
                anyhow::bail!("Template body in {} is empty", file.display());
            }
            let template = registry
                .register(&name, &subsystem, &body, model_hint.as_deref())
                .await?;
            println!(
                "Registered {} v{} as the active version.",
                template.name, template.version
            );
        }
    }

    Ok(())
}
