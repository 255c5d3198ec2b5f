//! Realtime invalidation listener.
//!
//! The listener is either Detached (no team known) or Attached to exactly one
//! team's change feed. Every `insert` into the watched table invalidates the
//! `list` and `count` operations by name, so every open observer re-fetches
//! whatever filter it is showing.
//!
//! Events published while a subscription is still being established are not
//! observed. Reconnection after the feed drops is left to the feed.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::models::{ChangeEvent, INBOX_MESSAGES_TABLE, Operation};
use super::query::QueryClient;
use crate::errors::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// One open change-feed connection for a single team.
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub team_id: String,
    pub events: mpsc::UnboundedReceiver<ChangeEvent>,
}

/// Per-team push notifications for row-level changes.
#[async_trait]
pub trait ChangeFeed: Send + Sync + 'static {
    async fn subscribe(&self, team_id: &str) -> Result<Subscription>;

    /// Stop delivering to `id`. Unknown ids are ignored.
    fn unsubscribe(&self, id: SubscriptionId);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerState {
    Detached,
    Attached { team_id: String },
}

struct Attachment {
    team_id: String,
    subscription_id: SubscriptionId,
    task: JoinHandle<()>,
}

/// Keeps the query cache in step with one team's change feed.
pub struct InvalidationListener<F: ChangeFeed> {
    feed: Arc<F>,
    client: Arc<QueryClient>,
    table: String,
    attachment: Option<Attachment>,
}

impl<F: ChangeFeed> InvalidationListener<F> {
    pub fn new(feed: Arc<F>, client: Arc<QueryClient>) -> Self {
        Self::with_table(feed, client, INBOX_MESSAGES_TABLE)
    }

    /// Watch inserts into `table` instead of `inbox_messages`.
    pub fn with_table(feed: Arc<F>, client: Arc<QueryClient>, table: impl Into<String>) -> Self {
        Self {
            feed,
            client,
            table: table.into(),
            attachment: None,
        }
    }

    pub fn state(&self) -> ListenerState {
        match &self.attachment {
            Some(a) => ListenerState::Attached {
                team_id: a.team_id.clone(),
            },
            None => ListenerState::Detached,
        }
    }

    /// Follow `team_id`. A change of team, including to `None`, tears the
    /// old subscription down before any new one is opened. Setting the
    /// current team again is a no-op.
    ///
    /// On subscribe failure the listener stays Detached.
    pub async fn set_team(&mut self, team_id: Option<&str>) -> Result<()> {
        let current = self.attachment.as_ref().map(|a| a.team_id.as_str());
        if current == team_id {
            return Ok(());
        }

        self.detach();

        let Some(team_id) = team_id else {
            return Ok(());
        };

        let subscription = match self.feed.subscribe(team_id).await {
            Ok(sub) => sub,
            Err(e) => {
                tracing::warn!(team_id, error = %e, "change feed subscribe failed");
                return Err(e);
            }
        };
        let subscription_id = subscription.id;
        let task = tokio::spawn(forward_invalidations(
            subscription,
            self.client.clone(),
            self.table.clone(),
        ));
        tracing::info!(team_id, subscription = subscription_id.0, "listener attached");

        self.attachment = Some(Attachment {
            team_id: team_id.to_string(),
            subscription_id,
            task,
        });
        Ok(())
    }

    /// Release the current subscription, if any. Synchronous: once this
    /// returns no further events from it reach the cache.
    pub fn detach(&mut self) {
        if let Some(attachment) = self.attachment.take() {
            attachment.task.abort();
            self.feed.unsubscribe(attachment.subscription_id);
            tracing::info!(
                team_id = %attachment.team_id,
                subscription = attachment.subscription_id.0,
                "listener detached"
            );
        }
    }
}

impl<F: ChangeFeed> Drop for InvalidationListener<F> {
    fn drop(&mut self) {
        self.detach();
    }
}

async fn forward_invalidations(mut subscription: Subscription, client: Arc<QueryClient>, table: String) {
    while let Some(event) = subscription.events.recv().await {
        if !event.is_insert_into(&table) {
            continue;
        }
        for operation in [Operation::List, Operation::Count] {
            if let Err(e) = client.invalidate(operation) {
                tracing::error!(%operation, error = %e, "failed to invalidate cached queries");
            }
        }
    }
    tracing::debug!(team_id = %subscription.team_id, "change feed closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::InboxError;
    use crate::inbox::feed::BroadcastFeed;
    use std::time::Duration;
    use tokio::sync::broadcast;
    use tokio::sync::broadcast::error::TryRecvError;

    async fn next_invalidation(rx: &mut broadcast::Receiver<Operation>) -> Operation {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for invalidation")
            .expect("invalidation channel closed")
    }

    /// Give the forwarding task a chance to run.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    struct FailingFeed;

    #[async_trait]
    impl ChangeFeed for FailingFeed {
        async fn subscribe(&self, team_id: &str) -> Result<Subscription> {
            Err(InboxError::SubscriptionFailed {
                team_id: team_id.to_string(),
                message: "refused".to_string(),
            })
        }

        fn unsubscribe(&self, _id: SubscriptionId) {}
    }

    #[tokio::test]
    async fn test_starts_detached_and_attaches_on_team() {
        let feed = Arc::new(BroadcastFeed::new());
        let mut listener = InvalidationListener::new(feed.clone(), Arc::new(QueryClient::default()));
        assert_eq!(listener.state(), ListenerState::Detached);

        listener.set_team(Some("T1")).await.unwrap();
        assert_eq!(
            listener.state(),
            ListenerState::Attached {
                team_id: "T1".to_string()
            }
        );
        assert_eq!(feed.subscriber_count("T1"), 1);
    }

    #[tokio::test]
    async fn test_insert_invalidates_list_and_count_once() {
        let feed = Arc::new(BroadcastFeed::new());
        let client = Arc::new(QueryClient::default());
        let mut rx = client.subscribe();
        let mut listener = InvalidationListener::new(feed.clone(), client);
        listener.set_team(Some("T1")).await.unwrap();

        feed.publish("T1", ChangeEvent::insert(INBOX_MESSAGES_TABLE));

        let mut seen = vec![next_invalidation(&mut rx).await, next_invalidation(&mut rx).await];
        seen.sort_by_key(|op| op.as_str());
        assert_eq!(seen, vec![Operation::Count, Operation::List]);

        settle().await;
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn test_non_insert_events_are_ignored() {
        let feed = Arc::new(BroadcastFeed::new());
        let client = Arc::new(QueryClient::default());
        let mut rx = client.subscribe();
        let mut listener = InvalidationListener::new(feed.clone(), client);
        listener.set_team(Some("T1")).await.unwrap();

        feed.publish(
            "T1",
            ChangeEvent::Update {
                table: INBOX_MESSAGES_TABLE.to_string(),
            },
        );
        feed.publish("T1", ChangeEvent::insert("webhook_deliveries"));

        settle().await;
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn test_team_change_tears_down_previous_subscription() {
        let feed = Arc::new(BroadcastFeed::new());
        let client = Arc::new(QueryClient::default());
        let mut rx = client.subscribe();
        let mut listener = InvalidationListener::new(feed.clone(), client);

        listener.set_team(Some("T1")).await.unwrap();
        listener.set_team(Some("T2")).await.unwrap();
        assert_eq!(feed.subscriber_count("T1"), 0);
        assert_eq!(feed.subscriber_count("T2"), 1);

        // T1 traffic no longer reaches the cache.
        feed.publish("T1", ChangeEvent::insert(INBOX_MESSAGES_TABLE));
        settle().await;
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));

        feed.publish("T2", ChangeEvent::insert(INBOX_MESSAGES_TABLE));
        next_invalidation(&mut rx).await;
        next_invalidation(&mut rx).await;
    }

    #[tokio::test]
    async fn test_team_change_to_none_detaches() {
        let feed = Arc::new(BroadcastFeed::new());
        let mut listener = InvalidationListener::new(feed.clone(), Arc::new(QueryClient::default()));
        listener.set_team(Some("T1")).await.unwrap();
        listener.set_team(None).await.unwrap();
        assert_eq!(listener.state(), ListenerState::Detached);
        assert_eq!(feed.subscriber_count("T1"), 0);
    }

    #[tokio::test]
    async fn test_same_team_is_a_no_op() {
        let feed = Arc::new(BroadcastFeed::new());
        let mut listener = InvalidationListener::new(feed.clone(), Arc::new(QueryClient::default()));
        listener.set_team(Some("T1")).await.unwrap();
        listener.set_team(Some("T1")).await.unwrap();
        assert_eq!(feed.subscriber_count("T1"), 1);
        assert_eq!(feed.total_subscriptions(), 1);
    }

    #[tokio::test]
    async fn test_drop_releases_subscription() {
        let feed = Arc::new(BroadcastFeed::new());
        {
            let mut listener =
                InvalidationListener::new(feed.clone(), Arc::new(QueryClient::default()));
            listener.set_team(Some("T1")).await.unwrap();
            assert_eq!(feed.subscriber_count("T1"), 1);
        }
        assert_eq!(feed.subscriber_count("T1"), 0);
    }

    #[tokio::test]
    async fn test_subscribe_failure_leaves_listener_detached() {
        let mut listener =
            InvalidationListener::new(Arc::new(FailingFeed), Arc::new(QueryClient::default()));
        let err = listener.set_team(Some("T1")).await.unwrap_err();
        assert!(matches!(err, InboxError::SubscriptionFailed { .. }));
        assert_eq!(listener.state(), ListenerState::Detached);
    }

    #[tokio::test]
    async fn test_custom_table_is_watched() {
        let feed = Arc::new(BroadcastFeed::new());
        let client = Arc::new(QueryClient::default());
        let mut rx = client.subscribe();
        let mut listener = InvalidationListener::with_table(feed.clone(), client, "emails");
        listener.set_team(Some("T1")).await.unwrap();

        feed.publish("T1", ChangeEvent::insert(INBOX_MESSAGES_TABLE));
        settle().await;
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));

        feed.publish("T1", ChangeEvent::insert("emails"));
        next_invalidation(&mut rx).await;
    }
}
