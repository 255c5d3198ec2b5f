//! Layered configuration for inbox-sync.
//!
//! Values resolve in order: built-in defaults → TOML file → environment →
//! CLI flags. The file lives at `.inbox-sync/config.toml` unless `--config`
//! points elsewhere; a missing default file is not an error.
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 3142
//! db_path = ".inbox-sync/inbox.db"
//! dev_mode = false
//!
//! [cache]
//! stale_after_secs = 60
//!
//! [realtime]
//! table = "inbox_messages"
//! ping_interval_secs = 30
//!
//! [logging]
//! filter = "info,inbox_sync=debug"
//! json = false
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::inbox::models::INBOX_MESSAGES_TABLE;

pub const DEFAULT_CONFIG_PATH: &str = ".inbox-sync/config.toml";

pub const ENV_PORT: &str = "INBOX_SYNC_PORT";
pub const ENV_HOST: &str = "INBOX_SYNC_HOST";
pub const ENV_DB_PATH: &str = "INBOX_SYNC_DB_PATH";
pub const ENV_LOG: &str = "INBOX_SYNC_LOG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    /// Permissive CORS and bind on all interfaces, for a local UI dev server.
    pub dev_mode: bool,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3142,
            db_path: PathBuf::from(".inbox-sync/inbox.db"),
            dev_mode: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    /// Age after which cached list/count results are re-fetched even
    /// without an invalidation. Unset means only invalidation expires them.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stale_after_secs: Option<u64>,
}

impl CacheSection {
    pub fn stale_after(&self) -> Option<Duration> {
        self.stale_after_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeSection {
    /// Table whose inserts invalidate list/count.
    pub table: String,
    pub ping_interval_secs: u64,
}

impl Default for RealtimeSection {
    fn default() -> Self {
        Self {
            table: INBOX_MESSAGES_TABLE.to_string(),
            ping_interval_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// `EnvFilter` directive string.
    pub filter: String,
    pub json: bool,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InboxConfig {
    pub server: ServerSection,
    pub cache: CacheSection,
    pub realtime: RealtimeSection,
    pub logging: LoggingSection,
}

/// CLI overrides; `None` leaves the lower layer in place.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub port: Option<u16>,
    pub db_path: Option<PathBuf>,
    pub dev_mode: bool,
    pub verbose: bool,
    pub log_json: bool,
}

impl InboxConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid config file: {}", path.display()))
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse inbox-sync config")
    }

    /// Load an explicit path (which must exist), or the default path if it
    /// exists, or fall back to defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_PATH);
                if default_path.exists() {
                    Self::load(default_path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Resolve every layer: file, process environment, then CLI.
    pub fn resolve(path: Option<&Path>, cli: &CliOverrides) -> Result<Self> {
        let mut config = Self::load_or_default(path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.apply_cli(cli);
        Ok(config)
    }

    /// Apply environment overrides through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup(ENV_PORT) {
            self.server.port = port
                .trim()
                .parse()
                .with_context(|| format!("{} must be a port number, got '{}'", ENV_PORT, port))?;
        }
        if let Some(host) = lookup(ENV_HOST) {
            self.server.host = host;
        }
        if let Some(db_path) = lookup(ENV_DB_PATH) {
            self.server.db_path = PathBuf::from(db_path);
        }
        if let Some(filter) = lookup(ENV_LOG) {
            self.logging.filter = filter;
        }
        Ok(())
    }

    pub fn apply_cli(&mut self, cli: &CliOverrides) {
        if let Some(port) = cli.port {
            self.server.port = port;
        }
        if let Some(ref db_path) = cli.db_path {
            self.server.db_path = db_path.clone();
        }
        if cli.dev_mode {
            self.server.dev_mode = true;
        }
        if cli.verbose {
            self.logging.filter = "debug".to_string();
        }
        if cli.log_json {
            self.logging.json = true;
        }
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config")
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.server.port == 0 {
            warnings.push("server.port is 0; the OS will pick a random port".to_string());
        }
        if self.realtime.table.trim().is_empty() {
            warnings.push("realtime.table is empty; no insert will invalidate queries".to_string());
        }
        if self.realtime.ping_interval_secs == 0 {
            warnings.push("realtime.ping_interval_secs is 0; using 1 second".to_string());
        }
        if let Some(0) = self.cache.stale_after_secs {
            warnings.push("cache.stale_after_secs is 0; every read will re-fetch".to_string());
        }
        warnings
    }
}
