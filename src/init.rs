//! `narrate init`: create the `.narrate/` directory for a project.
//!
//! ```text
//! .narrate/
//! ├── narrate.toml     # Configuration (defaults written on first init)
//! └── narrate.db       # SQLite store, migrated and seeded with templates
//! ```
//!
//! Running it again only fills in what is missing.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::config::{CONFIG_FILE, Config, NARRATE_DIR, NarrateToml};
use crate::db::{DbHandle, Store};
use crate::templates::TemplateRegistry;

/// Result of initializing a project.
#[derive(Debug)]
pub struct InitResult {
    pub narrate_dir: PathBuf,
    /// False when `.narrate/` already existed.
    pub created: bool,
    pub config_written: bool,
    pub db_path: PathBuf,
    pub templates_seeded: usize,
}

pub async fn init_project(project_dir: &Path) -> Result<InitResult> {
    let narrate_dir = project_dir.join(NARRATE_DIR);
    let created = !narrate_dir.exists();
    std::fs::create_dir_all(&narrate_dir)
        .with_context(|| format!("Failed to create directory: {}", narrate_dir.display()))?;

    let config_path = narrate_dir.join(CONFIG_FILE);
    let config_written = !config_path.exists();
    if config_written {
        NarrateToml::default().save(&config_path)?;
    }

    let config = Config::load(project_dir)?;
    let db_path = config.db_path();
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    let store = Store::new(&db_path)
        .with_context(|| format!("Failed to open database: {}", db_path.display()))?;
    let templates = TemplateRegistry::new(DbHandle::new(store));
    let templates_seeded = templates
        .seed_defaults()
        .await
        .context("Failed to seed default prompt templates")?;

    Ok(InitResult {
        narrate_dir,
        created,
        config_written,
        db_path,
        templates_seeded,
    })
}
