use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "narrate")]
#[command(version, about = "Incident narrative capture with AI-assisted clarification")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create .narrate/, a default narrate.toml and the database
    Init,
    /// Start the HTTP API
    Serve {
        /// Port to listen on (overrides [server] port)
        #[arg(long)]
        port: Option<u16>,

        /// Interface to bind (overrides [server] host)
        #[arg(long)]
        host: Option<String>,

        /// Database path (overrides [server] db_path and NARRATE_DB_PATH)
        #[arg(long)]
        db_path: Option<PathBuf>,

        /// Permissive CORS for a local front end
        #[arg(long)]
        dev: bool,
    },
    /// Inspect and register prompt templates
    Templates {
        #[command(subcommand)]
        command: TemplatesCommands,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum TemplatesCommands {
    /// List every template version
    List,
    /// Show the active version of a template
    Show { name: String },
    /// Register a new active version of a template
    Register {
        name: String,
        /// File containing the template body
        #[arg(short, long)]
        file: PathBuf,
        #[arg(long, default_value = "clarification")]
        subsystem: String,
        #[arg(long)]
        model_hint: Option<String>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        Commands::Init => cmd::cmd_init(&project_dir).await?,
        Commands::Serve {
            port,
            host,
            db_path,
            dev,
        } => {
            let overrides = cmd::ServeOverrides {
                port: *port,
                host: host.clone(),
                db_path: db_path.clone(),
            };
            cmd::cmd_serve(&project_dir, overrides, *dev, cli.verbose).await?;
        }
        Commands::Templates { command } => {
            cmd::cmd_templates(&project_dir, command.clone()).await?
        }
        Commands::Config { command } => cmd::cmd_config(&project_dir, command.clone())?,
    }

    Ok(())
}
