//! Inbox filter/state synchronization.
//!
//! ## Overview
//!
//! The inbox view keeps three things consistent: the URL query string, the
//! cached `list`/`count` results for the current filter, and a per-team
//! realtime change feed. Two triggers drive re-fetches:
//!
//! ```text
//!  filter edit ──> filter.rs (FilterState::encode) ──> new URL query
//!                        │
//!                        v
//!              query.rs  ListParams::from_filter ──> new cache key ──> fetch
//!
//!  feed insert ──> realtime.rs (InvalidationListener)
//!                        │ invalidate(List), invalidate(Count)
//!                        v
//!              query.rs  QueryClient marks stale ──> view.rs reloads
//! ```
//!
//! ## Module Map
//!
//! | Module     | Responsibility                                              |
//! |------------|-------------------------------------------------------------|
//! | `filter`   | URL query codec for `FilterState`                           |
//! | `query`    | `ListParams`, `QueryKey`, `QueryClient`, `InboxApi` trait   |
//! | `realtime` | `ChangeFeed` trait, `InvalidationListener` state machine    |
//! | `view`     | `InboxView` observer with ignore-on-resolve loads           |
//! | `models`   | `Message`, `NewMessage`, `ChangeEvent`, `Operation`         |
//! | `feed`     | `BroadcastFeed`, in-process `ChangeFeed`                    |
//! | `db`       | SQLite message store; `DbHandle` implements `InboxApi`      |
//! | `client`   | `HttpInboxApi`, reqwest implementation of `InboxApi`        |
//! | `api`      | axum handlers for list, count and insert                    |
//! | `ws`       | per-team change-feed WebSocket with ping/pong keepalive     |
//! | `server`   | `ServerConfig`, router assembly, graceful shutdown          |

pub mod api;
pub mod client;
pub mod db;
pub mod feed;
pub mod filter;
pub mod models;
pub mod query;
pub mod realtime;
pub mod server;
pub mod view;
pub mod ws;

pub use filter::FilterState;
pub use models::{ChangeEvent, Message, NewMessage, Operation};
pub use query::{InboxApi, InboxQueries, ListParams, QueryClient, QueryKey};
pub use realtime::{ChangeFeed, InvalidationListener, ListenerState, Subscription, SubscriptionId};
pub use view::{InboxSnapshot, InboxView};
