use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, params, params_from_iter, types::Value};

use super::models::{Message, NewMessage};
use super::query::{InboxApi, ListParams};
use crate::errors::InboxError;

const MESSAGE_COLUMNS: &str =
    "id, team_id, mailbox_id, sender, recipient, subject, body, tags, received_at";

/// Async-safe handle to the message store.
///
/// Wraps `InboxDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, so SQLite I/O never ties up
/// async worker threads.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<InboxDb>>,
}

impl DbHandle {
    pub fn new(db: InboxDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&InboxDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }
}

#[async_trait]
impl InboxApi for DbHandle {
    async fn list(&self, team_id: &str, params: &ListParams) -> crate::errors::Result<Vec<Message>> {
        let team_id = team_id.to_string();
        let params = params.clone();
        self.call(move |db| db.list_messages(&team_id, &params))
            .await
            .map_err(InboxError::Database)
    }

    async fn count(&self, team_id: &str, params: &ListParams) -> crate::errors::Result<u64> {
        let team_id = team_id.to_string();
        let params = params.clone();
        self.call(move |db| db.count_messages(&team_id, &params))
            .await
            .map_err(InboxError::Database)
    }
}

pub struct InboxDb {
    conn: Connection,
}

impl InboxDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.run_migrations().context("Failed to run migrations")?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.run_migrations().context("Failed to run migrations")?;
        Ok(db)
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS inbox_messages (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    team_id TEXT NOT NULL,
                    mailbox_id TEXT NOT NULL,
                    sender TEXT NOT NULL,
                    recipient TEXT NOT NULL DEFAULT '',
                    subject TEXT NOT NULL,
                    body TEXT NOT NULL DEFAULT '',
                    tags TEXT NOT NULL DEFAULT '[]',
                    received_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_inbox_messages_team
                    ON inbox_messages(team_id, received_at DESC);
                CREATE INDEX IF NOT EXISTS idx_inbox_messages_mailbox
                    ON inbox_messages(team_id, mailbox_id);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    // ── Messages ──────────────────────────────────────────────────────

    pub fn insert_message(&self, team_id: &str, msg: &NewMessage) -> Result<Message> {
        let tags = serde_json::to_string(&msg.tags).context("Failed to encode tags")?;
        let received_at = format_timestamp(msg.received_at.unwrap_or_else(Utc::now));
        self.conn
            .execute(
                "INSERT INTO inbox_messages (team_id, mailbox_id, sender, recipient, subject, body, tags, received_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    team_id,
                    msg.mailbox_id,
                    msg.sender,
                    msg.recipient,
                    msg.subject,
                    msg.body,
                    tags,
                    received_at
                ],
            )
            .context("Failed to insert message")?;
        let id = self.conn.last_insert_rowid();
        self.get_message(id)?.context("Message not found after insert")
    }

    pub fn get_message(&self, id: i64) -> Result<Option<Message>> {
        let sql = format!("SELECT {MESSAGE_COLUMNS} FROM inbox_messages WHERE id = ?1");
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed to prepare get_message")?;
        let mut rows = stmt
            .query_map(params![id], MessageRow::from_row)
            .context("Failed to query message")?;
        match rows.next() {
            Some(row) => {
                let r = row.context("Failed to read message row")?;
                Ok(Some(r.into_message()?))
            }
            None => Ok(None),
        }
    }

    /// Newest first.
    pub fn list_messages(&self, team_id: &str, filter: &ListParams) -> Result<Vec<Message>> {
        let (clause, values) = where_clause(team_id, filter);
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM inbox_messages WHERE {clause}
             ORDER BY received_at DESC, id DESC"
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed to prepare list_messages")?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), MessageRow::from_row)
            .context("Failed to query messages")?;
        let mut messages = Vec::new();
        for row in rows {
            let r = row.context("Failed to read message row")?;
            messages.push(r.into_message()?);
        }
        Ok(messages)
    }

    pub fn count_messages(&self, team_id: &str, filter: &ListParams) -> Result<u64> {
        let (clause, values) = where_clause(team_id, filter);
        let sql = format!("SELECT COUNT(*) FROM inbox_messages WHERE {clause}");
        let count: i64 = self
            .conn
            .query_row(&sql, params_from_iter(values.iter()), |row| row.get(0))
            .context("Failed to count messages")?;
        Ok(count as u64)
    }
}

// ── Internal row helpers ──────────────────────────────────────────────

/// Build the WHERE clause for a team-scoped filter.
///
/// `q` matches subject, sender, recipient or body (case-insensitive for
/// ASCII). Every requested tag must be present. The date range is
/// inclusive on both ends and compares the UTC calendar day.
fn where_clause(team_id: &str, filter: &ListParams) -> (String, Vec<Value>) {
    let mut clauses = vec!["team_id = ?".to_string()];
    let mut values = vec![Value::Text(team_id.to_string())];

    if let Some(mailbox_id) = &filter.mailbox_id {
        clauses.push("mailbox_id = ?".to_string());
        values.push(Value::Text(mailbox_id.clone()));
    }
    if let Some(q) = &filter.q {
        clauses.push(
            "(subject LIKE ? ESCAPE '\\' OR sender LIKE ? ESCAPE '\\' \
             OR recipient LIKE ? ESCAPE '\\' OR body LIKE ? ESCAPE '\\')"
                .to_string(),
        );
        let pattern = format!("%{}%", escape_like(q));
        for _ in 0..4 {
            values.push(Value::Text(pattern.clone()));
        }
    }
    for tag in filter.tags.iter().flatten() {
        clauses.push(
            "EXISTS (SELECT 1 FROM json_each(inbox_messages.tags) WHERE json_each.value = ?)"
                .to_string(),
        );
        values.push(Value::Text(tag.clone()));
    }
    if let Some(start) = filter.start {
        clauses.push("substr(received_at, 1, 10) >= ?".to_string());
        values.push(Value::Text(start.format("%Y-%m-%d").to_string()));
    }
    if let Some(end) = filter.end {
        clauses.push("substr(received_at, 1, 10) <= ?".to_string());
        values.push(Value::Text(end.format("%Y-%m-%d").to_string()));
    }

    (clauses.join(" AND "), values)
}

fn escape_like(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// Fixed-width UTC timestamps so lexical order matches time order.
fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

struct MessageRow {
    id: i64,
    team_id: String,
    mailbox_id: String,
    sender: String,
    recipient: String,
    subject: String,
    body: String,
    tags: String,
    received_at: String,
}

impl MessageRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            team_id: row.get(1)?,
            mailbox_id: row.get(2)?,
            sender: row.get(3)?,
            recipient: row.get(4)?,
            subject: row.get(5)?,
            body: row.get(6)?,
            tags: row.get(7)?,
            received_at: row.get(8)?,
        })
    }

    fn into_message(self) -> Result<Message> {
        let tags: Vec<String> =
            serde_json::from_str(&self.tags).context("Failed to parse message tags JSON")?;
        let received_at = DateTime::parse_from_rfc3339(&self.received_at)
            .context("Failed to parse received_at")?
            .with_timezone(&Utc);
        Ok(Message {
            id: self.id,
            team_id: self.team_id,
            mailbox_id: self.mailbox_id,
            sender: self.sender,
            recipient: self.recipient,
            subject: self.subject,
            body: self.body,
            tags,
            received_at,
        })
    }
}
