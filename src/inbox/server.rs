use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use tower_http::cors::CorsLayer;

use super::api::{self, AppState};
use super::db::{DbHandle, InboxDb};
use super::feed::BroadcastFeed;
use super::models::INBOX_MESSAGES_TABLE;
use super::query::QueryClient;
use crate::config::InboxConfig;

/// Configuration for the inbox server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: std::path::PathBuf,
    pub dev_mode: bool,
    pub table: String,
    pub ping_interval: Duration,
    /// Age limit for cached list/count reads; `None` relies on invalidation.
    pub stale_after: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3142,
            db_path: std::path::PathBuf::from(".inbox-sync/inbox.db"),
            dev_mode: false,
            table: INBOX_MESSAGES_TABLE.to_string(),
            ping_interval: Duration::from_secs(30),
            stale_after: None,
        }
    }
}

impl From<&InboxConfig> for ServerConfig {
    fn from(config: &InboxConfig) -> Self {
        Self {
            host: config.server.host.clone(),
            port: config.server.port,
            db_path: config.server.db_path.clone(),
            dev_mode: config.server.dev_mode,
            table: config.realtime.table.clone(),
            ping_interval: Duration::from_secs(config.realtime.ping_interval_secs.max(1)),
            stale_after: config.cache.stale_after(),
        }
    }
}

/// Build the full application router: REST API, change-feed socket, health.
pub fn build_router(state: Arc<AppState>, dev_mode: bool) -> Router {
    let app = api::api_router().with_state(state);
    if dev_mode {
        app.layer(CorsLayer::permissive())
    } else {
        app
    }
}

/// Create the database file's parent directory if it is missing.
pub fn ensure_db_dir(db_path: &Path) -> Result<()> {
    if let Some(parent) = db_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create database directory {}", parent.display()))?;
    }
    Ok(())
}

/// Create the directory and open (migrating) the store.
pub fn open_db(db_path: &Path) -> Result<InboxDb> {
    ensure_db_dir(db_path)?;
    InboxDb::new(db_path).context("Failed to initialize inbox database")
}

/// Open the store and assemble shared state. The feed is passed in so
/// in-process listeners can share it with the server.
pub fn build_state(config: &ServerConfig, feed: Arc<BroadcastFeed>) -> Result<Arc<AppState>> {
    let db = open_db(&config.db_path)?;
    Ok(Arc::new(AppState {
        db: Arc::new(DbHandle::new(db)),
        queries: Arc::new(QueryClient::new(config.stale_after)),
        feed,
        table: config.table.clone(),
        ping_interval: config.ping_interval,
    }))
}

/// Start the inbox server and run until Ctrl+C.
pub async fn start_server(config: ServerConfig) -> Result<()> {
    let state = build_state(&config, Arc::new(BroadcastFeed::new()))?;
    let app = build_router(state, config.dev_mode);

    let host = if config.dev_mode { "0.0.0.0" } else { config.host.as_str() };
    let addr = format!("{}:{}", host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    tracing::info!(%local_addr, db = %config.db_path.display(), "inbox-sync listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
