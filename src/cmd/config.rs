//! Configuration view and validation commands: `inbox-sync config`.

use std::path::Path;

use anyhow::Result;

use inbox_sync::config::{DEFAULT_CONFIG_PATH, InboxConfig};

use super::super::ConfigCommands;

pub fn cmd_config(
    config: &InboxConfig,
    config_path: Option<&Path>,
    command: Option<ConfigCommands>,
) -> Result<()> {
    let source = config_path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_PATH));

    match command {
        None | Some(ConfigCommands::Show) => {
            if source.exists() {
                println!("# Config file: {}", source.display());
            } else {
                println!("# No config file at {}; using defaults", source.display());
            }
            println!("# Effective values (with env/CLI overrides)");
            println!();
            print!("{}", config.to_toml()?);
        }
        Some(ConfigCommands::Validate) => {
            let warnings = config.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in &warnings {
                    println!("  - {}", warning);
                }
            }
        }
    }

    Ok(())
}
