//! End-to-end: a running server, the reqwest client, a shared change feed,
//! the invalidation listener and an inbox view.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use inbox_sync::inbox::client::HttpInboxApi;
use inbox_sync::inbox::feed::BroadcastFeed;
use inbox_sync::inbox::server::{ServerConfig, build_router, build_state};
use inbox_sync::inbox::{
    InboxQueries, InboxView, InvalidationListener, ListenerState, NewMessage, QueryClient,
};
use tempfile::TempDir;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as Frame;

struct Harness {
    _dir: TempDir,
    addr: std::net::SocketAddr,
    feed: Arc<BroadcastFeed>,
    api: Arc<HttpInboxApi>,
}

/// Poll `check` until it holds or five seconds pass.
async fn wait_until(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition never held");
}

async fn start() -> Harness {
    let dir = TempDir::new().unwrap();
    let config = ServerConfig {
        db_path: dir.path().join("inbox.db"),
        ..Default::default()
    };
    let feed = Arc::new(BroadcastFeed::new());
    let state = build_state(&config, feed.clone()).unwrap();
    let app = build_router(state, false);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let api = Arc::new(HttpInboxApi::new(&format!("http://{}", addr)).unwrap());
    Harness {
        _dir: dir,
        addr,
        feed,
        api,
    }
}

fn message(mailbox: &str, subject: &str, tags: &[&str]) -> NewMessage {
    NewMessage {
        mailbox_id: mailbox.to_string(),
        sender: "alice@example.com".to_string(),
        recipient: "team@example.com".to_string(),
        subject: subject.to_string(),
        body: String::new(),
        tags: tags.iter().map(|t| t.to_string()).collect(),
        received_at: None,
    }
}

#[tokio::test]
async fn test_insert_invalidates_and_view_reloads() {
    let h = start().await;
    h.api
        .insert("t1", &message("m1", "first", &[]))
        .await
        .unwrap();

    let client = Arc::new(QueryClient::default());
    let queries = InboxQueries::new(h.api.clone(), client.clone(), "t1");
    let mut view = InboxView::from_query_string(queries, "");
    let mut listener = InvalidationListener::new(h.feed.clone(), client.clone());
    listener.set_team(Some("t1")).await.unwrap();
    assert_eq!(
        listener.state(),
        ListenerState::Attached {
            team_id: "t1".to_string()
        }
    );

    let snapshot = view.load().await.unwrap();
    assert_eq!(snapshot.count, 1);
    assert_eq!(snapshot.messages.len(), 1);

    h.api
        .insert("t1", &message("m1", "second", &[]))
        .await
        .unwrap();

    let snapshot = tokio::time::timeout(Duration::from_secs(5), view.refresh_on_invalidation())
        .await
        .expect("no invalidation arrived")
        .unwrap()
        .expect("query client closed");
    assert_eq!(snapshot.count, 2);
    assert_eq!(snapshot.messages[0].subject, "second");
}

#[tokio::test]
async fn test_filtered_view_uses_url_state() {
    let h = start().await;
    h.api
        .insert("t1", &message("m1", "hello world", &["x", "y"]))
        .await
        .unwrap();
    h.api
        .insert("t1", &message("m1", "hello there", &["x"]))
        .await
        .unwrap();
    h.api
        .insert("t1", &message("m2", "hello again", &["x", "y"]))
        .await
        .unwrap();

    let queries = InboxQueries::new(h.api.clone(), Arc::new(QueryClient::default()), "t1");
    let mut view = InboxView::from_query_string(queries, "?q=hello&mailbox=m1&tags=x&tags=y");
    let snapshot = view.load().await.unwrap();
    assert_eq!(snapshot.count, 1);
    assert_eq!(snapshot.messages[0].subject, "hello world");

    assert!(view.navigate("?q=hello&tags=x"));
    let snapshot = view.load().await.unwrap();
    assert_eq!(snapshot.count, 3);
    assert_eq!(view.query_string(), "q=hello&tags=x");
}

#[tokio::test]
async fn test_switching_team_stops_old_invalidations() {
    let h = start().await;
    let client = Arc::new(QueryClient::default());
    let mut invalidations = client.subscribe();
    let mut listener = InvalidationListener::new(h.feed.clone(), client.clone());

    listener.set_team(Some("t1")).await.unwrap();
    listener.set_team(Some("t2")).await.unwrap();
    assert_eq!(h.feed.subscriber_count("t1"), 0);
    assert_eq!(h.feed.subscriber_count("t2"), 1);

    h.api
        .insert("t1", &message("m1", "old team", &[]))
        .await
        .unwrap();
    let quiet = tokio::time::timeout(Duration::from_millis(200), invalidations.recv()).await;
    assert!(quiet.is_err(), "old team still invalidates");

    h.api
        .insert("t2", &message("m1", "new team", &[]))
        .await
        .unwrap();
    let first = tokio::time::timeout(Duration::from_secs(5), invalidations.recv())
        .await
        .unwrap()
        .unwrap();
    let second = tokio::time::timeout(Duration::from_secs(5), invalidations.recv())
        .await
        .unwrap()
        .unwrap();
    assert_ne!(first, second);

    listener.set_team(None).await.unwrap();
    assert_eq!(listener.state(), ListenerState::Detached);
    assert_eq!(h.feed.total_subscriptions(), 0);
}

#[tokio::test]
async fn test_websocket_forwards_only_its_teams_inserts() {
    let h = start().await;
    let (mut t1_socket, _) = connect_async(format!("ws://{}/ws/teams/t1", h.addr))
        .await
        .unwrap();
    let (mut t2_socket, _) = connect_async(format!("ws://{}/ws/teams/t2", h.addr))
        .await
        .unwrap();
    wait_until(|| h.feed.subscriber_count("t1") == 1 && h.feed.subscriber_count("t2") == 1).await;

    h.api
        .insert("t1", &message("m1", "over the wire", &[]))
        .await
        .unwrap();

    let frame = tokio::time::timeout(Duration::from_secs(5), t1_socket.next())
        .await
        .expect("no frame for t1")
        .unwrap()
        .unwrap();
    assert_eq!(
        frame,
        Frame::text(r#"{"type":"insert","table":"inbox_messages"}"#)
    );

    let silent = tokio::time::timeout(Duration::from_millis(200), t2_socket.next()).await;
    assert!(silent.is_err(), "t2 socket received a t1 event");

    t1_socket.close(None).await.unwrap();
    wait_until(|| h.feed.subscriber_count("t1") == 0).await;
    assert_eq!(h.feed.subscriber_count("t2"), 1);

    drop(t2_socket);
    wait_until(|| h.feed.total_subscriptions() == 0).await;
}
