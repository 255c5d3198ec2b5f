//! Inbox server commands: `inbox-sync serve` and `inbox-sync init`.

use std::path::Path;

use anyhow::Result;

use inbox_sync::config::InboxConfig;
use inbox_sync::inbox::server::{ServerConfig, open_db, start_server};

pub async fn cmd_serve(config: &InboxConfig) -> Result<()> {
    for warning in config.validate() {
        tracing::warn!("{}", warning);
    }
    start_server(ServerConfig::from(config)).await
}

pub fn cmd_init(db_path: &Path) -> Result<()> {
    open_db(db_path)?;
    println!("Inbox database initialized at {}", db_path.display());
    Ok(())
}
