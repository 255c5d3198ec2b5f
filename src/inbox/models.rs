use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Table whose inserts drive list/count invalidation.
pub const INBOX_MESSAGES_TABLE: &str = "inbox_messages";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: i64,
    pub team_id: String,
    pub mailbox_id: String,
    pub sender: String,
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub tags: Vec<String>,
    pub received_at: DateTime<Utc>,
}

/// Insert payload for a captured message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewMessage {
    pub mailbox_id: String,
    pub sender: String,
    #[serde(default)]
    pub recipient: String,
    pub subject: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub received_at: Option<DateTime<Utc>>,
}

impl NewMessage {
    /// Reject payloads the inbox cannot display.
    pub fn validate(&self) -> Result<(), String> {
        if self.mailbox_id.trim().is_empty() {
            return Err("mailbox_id must not be empty".to_string());
        }
        if self.sender.trim().is_empty() {
            return Err("sender must not be empty".to_string());
        }
        if self.subject.trim().is_empty() {
            return Err("subject must not be empty".to_string());
        }
        Ok(())
    }
}

/// Cacheable read operations exposed by the upstream inbox API.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    List,
    Count,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::List => "list",
            Self::Count => "count",
        }
    }
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "list" => Ok(Self::List),
            "count" => Ok(Self::Count),
            _ => Err(format!("Invalid operation: {}", s)),
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Row-level notification delivered by the change feed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChangeEvent {
    Insert { table: String },
    Update { table: String },
    Delete { table: String },
}

impl ChangeEvent {
    pub fn insert(table: impl Into<String>) -> Self {
        Self::Insert {
            table: table.into(),
        }
    }

    pub fn table(&self) -> &str {
        match self {
            Self::Insert { table } | Self::Update { table } | Self::Delete { table } => table,
        }
    }

    /// True for inserts into `table`.
    pub fn is_insert_into(&self, table: &str) -> bool {
        matches!(self, Self::Insert { table: t } if t == table)
    }
}
