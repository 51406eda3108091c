//! HTTP API — `narrate serve`.

use std::path::{Path, PathBuf};

use anyhow::Result;

/// CLI flags layered over the file and environment configuration.
pub struct ServeOverrides {
    pub port: Option<u16>,
    pub host: Option<String>,
    pub db_path: Option<PathBuf>,
}

pub async fn cmd_serve(
    project_dir: &Path,
    overrides: ServeOverrides,
    dev: bool,
    verbose: bool,
) -> Result<()> {
    use narrate::config::Config;
    use narrate::{logging, server};

    let mut config = Config::load(project_dir)?;
    if let Some(port) = overrides.port {
        config.toml.server.port = port;
    }
    if let Some(host) = overrides.host {
        config.toml.server.host = host;
    }
    if let Some(db_path) = overrides.db_path {
        config.toml.server.db_path = db_path;
    }

    let log_dir = config.log_dir();
    let _guard = logging::init(&config.toml.logging, log_dir.as_deref(), verbose)?;

    for warning in config.toml.validate() {
        tracing::warn!("{}", warning);
    }

    server::start_server(&config, dev).await
}
