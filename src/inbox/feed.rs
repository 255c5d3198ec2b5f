//! In-process change feed.
//!
//! `BroadcastFeed` fans published events out to every open subscription for
//! the same team. The server publishes into it on insert, and both the
//! WebSocket forwarder and in-process listeners subscribe to it.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::models::ChangeEvent;
use super::realtime::{ChangeFeed, Subscription, SubscriptionId};
use crate::errors::{InboxError, Result};

struct Subscriber {
    team_id: String,
    tx: mpsc::UnboundedSender<ChangeEvent>,
}

#[derive(Default)]
pub struct BroadcastFeed {
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<SubscriptionId, Subscriber>>,
}

impl BroadcastFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `event` to every subscription for `team_id`. Returns the
    /// number of subscriptions reached. Subscriptions whose receiver is gone
    /// are pruned.
    pub fn publish(&self, team_id: &str, event: ChangeEvent) -> usize {
        let Ok(mut subscribers) = self.subscribers.lock() else {
            tracing::error!(team_id, "change feed lock poisoned; dropping event");
            return 0;
        };
        let mut delivered = 0;
        subscribers.retain(|_, sub| {
            if sub.team_id != team_id {
                return true;
            }
            match sub.tx.send(event.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(_) => false,
            }
        });
        tracing::debug!(team_id, table = event.table(), delivered, "published change event");
        delivered
    }

    pub fn subscriber_count(&self, team_id: &str) -> usize {
        self.subscribers
            .lock()
            .map(|s| s.values().filter(|sub| sub.team_id == team_id).count())
            .unwrap_or(0)
    }

    pub fn total_subscriptions(&self) -> usize {
        self.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }
}

#[async_trait]
impl ChangeFeed for BroadcastFeed {
    async fn subscribe(&self, team_id: &str) -> Result<Subscription> {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .map_err(|_| InboxError::SubscriptionFailed {
                team_id: team_id.to_string(),
                message: "feed lock poisoned".to_string(),
            })?
            .insert(
                id,
                Subscriber {
                    team_id: team_id.to_string(),
                    tx,
                },
            );
        Ok(Subscription {
            id,
            team_id: team_id.to_string(),
            events: rx,
        })
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.remove(&id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inbox::models::INBOX_MESSAGES_TABLE;

    #[tokio::test]
    async fn test_publish_reaches_only_matching_team() {
        let feed = BroadcastFeed::new();
        let mut t1 = feed.subscribe("T1").await.unwrap();
        let mut t2 = feed.subscribe("T2").await.unwrap();

        assert_eq!(feed.publish("T1", ChangeEvent::insert(INBOX_MESSAGES_TABLE)), 1);

        assert_eq!(
            t1.events.try_recv().unwrap(),
            ChangeEvent::insert(INBOX_MESSAGES_TABLE)
        );
        assert!(t2.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_multiple_subscribers_same_team() {
        let feed = BroadcastFeed::new();
        let mut a = feed.subscribe("T1").await.unwrap();
        let mut b = feed.subscribe("T1").await.unwrap();
        assert_ne!(a.id, b.id);

        assert_eq!(feed.publish("T1", ChangeEvent::insert("x")), 2);
        assert!(a.events.try_recv().is_ok());
        assert!(b.events.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let feed = BroadcastFeed::new();
        let sub = feed.subscribe("T1").await.unwrap();
        feed.unsubscribe(sub.id);
        assert_eq!(feed.subscriber_count("T1"), 0);
        assert_eq!(feed.publish("T1", ChangeEvent::insert("x")), 0);

        // Unknown ids are ignored.
        feed.unsubscribe(SubscriptionId(999));
    }

    #[tokio::test]
    async fn test_dropped_receivers_are_pruned_on_publish() {
        let feed = BroadcastFeed::new();
        let sub = feed.subscribe("T1").await.unwrap();
        drop(sub);
        assert_eq!(feed.total_subscriptions(), 1);
        assert_eq!(feed.publish("T1", ChangeEvent::insert("x")), 0);
        assert_eq!(feed.total_subscriptions(), 0);
    }
}
