//! Typed error hierarchy for inbox-sync.
//!
//! `InboxError` covers the library surface: the upstream inbox API, the
//! message store and the change feed. Binaries wrap it in
//! `anyhow` with context at the call site.

use thiserror::Error;

/// Errors from the inbox query, storage and realtime layers.
#[derive(Debug, Error)]
pub enum InboxError {
    #[error("Inbox API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Inbox API transport error: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[source] anyhow::Error),

    #[error("Query cache lock poisoned")]
    LockPoisoned,

    #[error("Failed to subscribe to change feed for team {team_id}: {message}")]
    SubscriptionFailed { team_id: String, message: String },

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<reqwest::Error> for InboxError {
    fn from(err: reqwest::Error) -> Self {
        InboxError::Transport(err)
    }
}

pub type Result<T, E = InboxError> = std::result::Result<T, E>;
