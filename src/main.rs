use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use inbox_sync::config::{CliOverrides, InboxConfig};

mod cmd;

#[derive(Parser)]
#[command(name = "inbox-sync")]
#[command(version, about = "Inbox filter state, cached queries and realtime invalidation")]
pub struct Cli {
    /// Path to a config file (defaults to .inbox-sync/config.toml if present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the inbox API and change-feed server
    Serve {
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        db_path: Option<PathBuf>,
        /// Permissive CORS and bind on 0.0.0.0
        #[arg(long)]
        dev: bool,
    },
    /// Create the inbox database and exit
    Init {
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
    /// Decode a URL query string into filter state
    Filter {
        /// e.g. "?q=hello&tags=x&tags=y"
        query: String,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
}

impl Cli {
    fn overrides(&self) -> CliOverrides {
        let mut overrides = CliOverrides {
            verbose: self.verbose,
            log_json: self.log_json,
            ..Default::default()
        };
        match &self.command {
            Commands::Serve { port, db_path, dev } => {
                overrides.port = *port;
                overrides.db_path = db_path.clone();
                overrides.dev_mode = *dev;
            }
            Commands::Init { db_path } => overrides.db_path = db_path.clone(),
            Commands::Filter { .. } | Commands::Config { .. } => {}
        }
        overrides
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = InboxConfig::resolve(cli.config.as_deref(), &cli.overrides())?;
    inbox_sync::logging::init(&config.logging)?;

    match &cli.command {
        Commands::Serve { .. } => cmd::cmd_serve(&config).await?,
        Commands::Init { .. } => cmd::cmd_init(&config.server.db_path)?,
        Commands::Filter { query } => cmd::cmd_filter(query)?,
        Commands::Config { command } => {
            cmd::cmd_config(&config, cli.config.as_deref(), command.clone())?
        }
    }

    Ok(())
}
