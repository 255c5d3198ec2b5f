//! `inbox-sync filter <query>`: decode a URL query the way the inbox view
//! does and print the normalized state plus its canonical encoding.

use anyhow::{Context, Result};

use inbox_sync::inbox::{FilterState, ListParams};

pub fn cmd_filter(query: &str) -> Result<()> {
    let state = FilterState::decode(query);
    let json = serde_json::to_string_pretty(&state).context("Failed to serialize filter")?;
    println!("{}", json);

    let params = ListParams::from_filter(&state);
    tracing::debug!(params = %params.to_query_string(), "derived list params");

    println!("canonical: {}", state.to_query_string());
    Ok(())
}
