//! Inbox view: the observer side of the query layer.
//!
//! A view owns the current `FilterState`, loads list and count for it, and
//! reloads whenever either operation is invalidated. Loads are split into
//! `start_load` / `apply` so a result that resolves after the filter moved
//! on is discarded instead of overwriting the newer state.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

use super::filter::FilterState;
use super::models::{Message, Operation};
use super::query::{InboxApi, InboxQueries, ListParams};
use crate::errors::Result;

#[derive(Debug, Clone)]
pub struct InboxSnapshot {
    pub filter: FilterState,
    pub messages: Arc<Vec<Message>>,
    pub count: u64,
}

/// A load result tagged with the filter generation it was started for.
#[derive(Debug)]
pub struct Loaded {
    generation: u64,
    snapshot: InboxSnapshot,
}

/// An in-flight load detached from the view.
pub struct PendingLoad<A: InboxApi> {
    queries: InboxQueries<A>,
    params: ListParams,
    filter: FilterState,
    generation: u64,
}

impl<A: InboxApi> PendingLoad<A> {
    /// Run list and count concurrently. Either may complete first.
    pub async fn resolve(self) -> Result<Loaded> {
        let (messages, count) = tokio::try_join!(
            self.queries.list(&self.params),
            self.queries.count(&self.params)
        )?;
        Ok(Loaded {
            generation: self.generation,
            snapshot: InboxSnapshot {
                filter: self.filter,
                messages,
                count,
            },
        })
    }
}

pub struct InboxView<A: InboxApi> {
    queries: InboxQueries<A>,
    filter: FilterState,
    generation: u64,
    snapshot: Option<InboxSnapshot>,
    invalidations: broadcast::Receiver<Operation>,
}

impl<A: InboxApi> InboxView<A> {
    pub fn new(queries: InboxQueries<A>, filter: FilterState) -> Self {
        let invalidations = queries.client().subscribe();
        Self {
            queries,
            filter,
            generation: 0,
            snapshot: None,
            invalidations,
        }
    }

    /// Build a view from the current URL query string.
    pub fn from_query_string(queries: InboxQueries<A>, raw: &str) -> Self {
        Self::new(queries, FilterState::decode(raw))
    }

    pub fn filter(&self) -> &FilterState {
        &self.filter
    }

    /// The URL query string for the current filter.
    pub fn query_string(&self) -> String {
        self.filter.to_query_string()
    }

    pub fn params(&self) -> ListParams {
        ListParams::from_filter(&self.filter)
    }

    pub fn snapshot(&self) -> Option<&InboxSnapshot> {
        self.snapshot.as_ref()
    }

    /// Replace the filter. Returns false when nothing changed. Any load
    /// started before a change is ignored when it resolves.
    pub fn set_filter(&mut self, filter: FilterState) -> bool {
        if filter == self.filter {
            return false;
        }
        self.filter = filter;
        self.generation += 1;
        true
    }

    /// Apply a navigation to a new query string.
    pub fn navigate(&mut self, raw: &str) -> bool {
        self.set_filter(FilterState::decode(raw))
    }

    pub fn start_load(&self) -> PendingLoad<A> {
        PendingLoad {
            queries: self.queries.clone(),
            params: self.params(),
            filter: self.filter.clone(),
            generation: self.generation,
        }
    }

    /// Accept a load result if it still matches the current filter.
    pub fn apply(&mut self, loaded: Loaded) -> bool {
        if loaded.generation != self.generation {
            tracing::debug!(
                stale_generation = loaded.generation,
                current_generation = self.generation,
                "discarding load for superseded filter"
            );
            return false;
        }
        self.snapshot = Some(loaded.snapshot);
        true
    }

    pub async fn load(&mut self) -> Result<&InboxSnapshot> {
        let loaded = self.start_load().resolve().await?;
        Ok(&*self.snapshot.insert(loaded.snapshot))
    }

    /// Wait for the next list/count invalidation, then reload. Invalidations
    /// already queued are coalesced into the same reload. Returns `None`
    /// once the query client is gone.
    pub async fn refresh_on_invalidation(&mut self) -> Result<Option<&InboxSnapshot>> {
        match self.invalidations.recv().await {
            Ok(_) | Err(RecvError::Lagged(_)) => {}
            Err(RecvError::Closed) => return Ok(None),
        }
        loop {
            match self.invalidations.try_recv() {
                Ok(_) | Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
        self.load().await.map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inbox::query::QueryClient;
    use crate::inbox::query::tests::CountingApi;
    use std::sync::atomic::Ordering;

    fn view(api: Arc<CountingApi>, raw: &str) -> InboxView<CountingApi> {
        let queries = InboxQueries::new(api, Arc::new(QueryClient::default()), "team-1");
        InboxView::from_query_string(queries, raw)
    }

    #[tokio::test]
    async fn test_load_fetches_list_and_count() {
        let api = Arc::new(CountingApi::default());
        let mut view = view(api.clone(), "?mailbox=mb");
        let snapshot = view.load().await.unwrap();
        assert_eq!(snapshot.messages.len(), 1);
        assert_eq!(snapshot.messages[0].mailbox_id, "mb");
        assert_eq!(snapshot.count, 1);
        assert_eq!(snapshot.filter.mailbox_id.as_deref(), Some("mb"));
    }

    #[tokio::test]
    async fn test_filter_change_changes_cache_key() {
        let api = Arc::new(CountingApi::default());
        let mut view = view(api.clone(), "");
        view.load().await.unwrap();
        view.load().await.unwrap();
        assert_eq!(api.list_calls.load(Ordering::SeqCst), 1);

        assert!(view.navigate("q=invoice"));
        view.load().await.unwrap();
        assert_eq!(api.list_calls.load(Ordering::SeqCst), 2);
        assert_eq!(view.query_string(), "q=invoice");
    }

    #[tokio::test]
    async fn test_same_filter_is_not_a_change() {
        let api = Arc::new(CountingApi::default());
        let mut view = view(api, "q=a&page=2");
        assert!(!view.navigate("?q=a"));
    }

    #[tokio::test]
    async fn test_result_for_superseded_filter_is_ignored() {
        let api = Arc::new(CountingApi::default());
        let mut view = view(api, "q=old");
        let pending = view.start_load();
        view.set_filter(FilterState::default().with_query("new"));

        let loaded = pending.resolve().await.unwrap();
        assert!(!view.apply(loaded));
        assert!(view.snapshot().is_none());

        let loaded = view.start_load().resolve().await.unwrap();
        assert!(view.apply(loaded));
        assert_eq!(
            view.snapshot().unwrap().filter.query.as_deref(),
            Some("new")
        );
    }

    #[tokio::test]
    async fn test_refresh_on_invalidation_refetches() {
        let api = Arc::new(CountingApi::default());
        let mut view = view(api.clone(), "");
        view.load().await.unwrap();

        let client = view.queries.client().clone();
        client.invalidate(Operation::List).unwrap();
        client.invalidate(Operation::Count).unwrap();

        let snapshot = view.refresh_on_invalidation().await.unwrap().unwrap();
        assert_eq!(snapshot.count, 2);
        assert_eq!(api.list_calls.load(Ordering::SeqCst), 2);
        assert_eq!(api.count_calls.load(Ordering::SeqCst), 2);
    }
}
