//! Cached list/count reads keyed by canonical parameters.
//!
//! `QueryClient` is the shared cache. Entries are keyed by
//! `(Operation, canonical JSON of ListParams)`; `serde_json` objects keep
//! their keys sorted, so two structurally equal parameter records produce
//! the same key no matter how they were built. Invalidation marks entries
//! stale by operation name and broadcasts the operation to observers; it
//! never writes values.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::filter::FilterState;
use super::models::{Message, Operation};
use crate::errors::{InboxError, Result};

const INVALIDATION_CHANNEL_CAPACITY: usize = 64;

/// Parameters sent to the upstream `list` and `count` operations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mailbox_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub q: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<NaiveDate>,
}

impl ListParams {
    /// Project a filter onto request parameters. The free-text query is
    /// trimmed and dropped when nothing is left.
    pub fn from_filter(state: &FilterState) -> Self {
        let q = state
            .query
            .as_deref()
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .map(str::to_string);
        let tags = if state.tags.is_empty() {
            None
        } else {
            Some(state.tags.clone())
        };
        Self {
            mailbox_id: state.mailbox_id.clone(),
            q,
            tags,
            start: state.range_start,
            end: state.range_end,
        }
    }

    /// The same parameters as a codec query string, for HTTP transport.
    pub fn to_query_string(&self) -> String {
        let state = FilterState {
            query: self.q.clone(),
            mailbox_id: self.mailbox_id.clone(),
            tags: self.tags.clone().unwrap_or_default(),
            range_start: self.start,
            range_end: self.end,
        };
        state.to_query_string()
    }

    pub fn cache_key(&self, operation: Operation) -> QueryKey {
        // Serializing a plain struct of strings and dates cannot fail.
        let value = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        QueryKey::from_value(operation, &value)
    }

    /// True when no filter field is set.
    pub fn is_unfiltered(&self) -> bool {
        *self == Self::default()
    }
}

/// Cache identity: operation plus canonical serialized parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
    pub operation: Operation,
    pub params: String,
}

impl QueryKey {
    /// Build a key from any JSON parameter record. Object keys are emitted
    /// in sorted order, so insertion order does not matter.
    pub fn from_value(operation: Operation, params: &serde_json::Value) -> Self {
        Self {
            operation,
            params: params.to_string(),
        }
    }
}

/// Upstream read contract. Retry and backoff belong to the implementation.
#[async_trait]
pub trait InboxApi: Send + Sync + 'static {
    async fn list(&self, team_id: &str, params: &ListParams) -> Result<Vec<Message>>;
    async fn count(&self, team_id: &str, params: &ListParams) -> Result<u64>;
}

#[derive(Debug, Clone)]
enum CachedValue {
    Messages(Arc<Vec<Message>>),
    Count(u64),
}

#[derive(Debug)]
struct CacheEntry {
    value: CachedValue,
    fetched_at: Instant,
    stale: bool,
}

impl CacheEntry {
    fn new(value: CachedValue) -> Self {
        Self {
            value,
            fetched_at: Instant::now(),
            stale: false,
        }
    }

    fn is_fresh(&self, stale_after: Option<Duration>) -> bool {
        if self.stale {
            return false;
        }
        match stale_after {
            Some(ttl) => self.fetched_at.elapsed() < ttl,
            None => true,
        }
    }
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<(String, QueryKey), CacheEntry>,
    /// Bumped by every `invalidate`; a fetch that started under an older
    /// epoch must not be cached.
    epochs: HashMap<Operation, u64>,
}

impl CacheState {
    fn epoch(&self, operation: Operation) -> u64 {
        self.epochs.get(&operation).copied().unwrap_or(0)
    }
}

/// Shared query-result cache.
pub struct QueryClient {
    state: Mutex<CacheState>,
    stale_after: Option<Duration>,
    invalidations: broadcast::Sender<Operation>,
}

impl Default for QueryClient {
    fn default() -> Self {
        Self::new(None)
    }
}

impl QueryClient {
    pub fn new(stale_after: Option<Duration>) -> Self {
        let (invalidations, _rx) = broadcast::channel(INVALIDATION_CHANNEL_CAPACITY);
        Self {
            state: Mutex::new(CacheState::default()),
            stale_after,
            invalidations,
        }
    }

    /// Receive every operation invalidated from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Operation> {
        self.invalidations.subscribe()
    }

    /// Mark every entry for `operation` stale, across all parameter sets and
    /// teams, and notify observers. Reads already in flight for `operation`
    /// will not be cached. Returns the number of entries marked.
    pub fn invalidate(&self, operation: Operation) -> Result<usize> {
        let marked = {
            let mut state = self.state.lock().map_err(|_| InboxError::LockPoisoned)?;
            *state.epochs.entry(operation).or_insert(0) += 1;
            let mut marked = 0;
            for ((_, key), entry) in state.entries.iter_mut() {
                if key.operation == operation {
                    entry.stale = true;
                    marked += 1;
                }
            }
            marked
        };
        tracing::debug!(%operation, marked, "invalidated cached queries");
        let _ = self.invalidations.send(operation); // no observers is fine
        Ok(marked)
    }

    /// True when a fresh entry exists for this key.
    pub fn is_fresh(&self, team_id: &str, key: &QueryKey) -> Result<bool> {
        let state = self.state.lock().map_err(|_| InboxError::LockPoisoned)?;
        Ok(state
            .entries
            .get(&(team_id.to_string(), key.clone()))
            .is_some_and(|e| e.is_fresh(self.stale_after)))
    }

    pub fn len(&self) -> usize {
        self.state.lock().map(|s| s.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current invalidation epoch for `operation`; capture before fetching.
    fn epoch(&self, operation: Operation) -> Result<u64> {
        let state = self.state.lock().map_err(|_| InboxError::LockPoisoned)?;
        Ok(state.epoch(operation))
    }

    fn get_fresh(&self, team_id: &str, key: &QueryKey) -> Result<Option<CachedValue>> {
        let state = self.state.lock().map_err(|_| InboxError::LockPoisoned)?;
        Ok(state
            .entries
            .get(&(team_id.to_string(), key.clone()))
            .filter(|e| e.is_fresh(self.stale_after))
            .map(|e| e.value.clone()))
    }

    /// Cache a fetched value unless `key.operation` was invalidated after
    /// `fetched_epoch` was captured. Stale and expired entries are evicted
    /// on every write. Returns whether the value was cached.
    fn store(
        &self,
        team_id: &str,
        key: QueryKey,
        value: CachedValue,
        fetched_epoch: u64,
    ) -> Result<bool> {
        let mut state = self.state.lock().map_err(|_| InboxError::LockPoisoned)?;
        let stale_after = self.stale_after;
        state.entries.retain(|_, entry| entry.is_fresh(stale_after));
        if state.epoch(key.operation) != fetched_epoch {
            tracing::debug!(
                operation = %key.operation,
                team_id,
                "skipping cache write for read superseded by invalidation"
            );
            return Ok(false);
        }
        state
            .entries
            .insert((team_id.to_string(), key), CacheEntry::new(value));
        Ok(true)
    }
}

/// Team-scoped list/count reads through the shared cache.
pub struct InboxQueries<A: InboxApi> {
    api: Arc<A>,
    client: Arc<QueryClient>,
    team_id: String,
}

impl<A: InboxApi> Clone for InboxQueries<A> {
    fn clone(&self) -> Self {
        Self {
            api: self.api.clone(),
            client: self.client.clone(),
            team_id: self.team_id.clone(),
        }
    }
}

impl<A: InboxApi> InboxQueries<A> {
    pub fn new(api: Arc<A>, client: Arc<QueryClient>, team_id: impl Into<String>) -> Self {
        Self {
            api,
            client,
            team_id: team_id.into(),
        }
    }

    pub fn team_id(&self) -> &str {
        &self.team_id
    }

    pub fn client(&self) -> &Arc<QueryClient> {
        &self.client
    }

    pub async fn list(&self, params: &ListParams) -> Result<Arc<Vec<Message>>> {
        let key = params.cache_key(Operation::List);
        if let Some(CachedValue::Messages(messages)) = self.client.get_fresh(&self.team_id, &key)? {
            return Ok(messages);
        }
        let epoch = self.client.epoch(Operation::List)?;
        let messages = Arc::new(self.api.list(&self.team_id, params).await?);
        self.client.store(
            &self.team_id,
            key,
            CachedValue::Messages(messages.clone()),
            epoch,
        )?;
        Ok(messages)
    }

    pub async fn count(&self, params: &ListParams) -> Result<u64> {
        let key = params.cache_key(Operation::Count);
        if let Some(CachedValue::Count(count)) = self.client.get_fresh(&self.team_id, &key)? {
            return Ok(count);
        }
        let epoch = self.client.epoch(Operation::Count)?;
        let count = self.api.count(&self.team_id, params).await?;
        self.client
            .store(&self.team_id, key, CachedValue::Count(count), epoch)?;
        Ok(count)
    }
}
