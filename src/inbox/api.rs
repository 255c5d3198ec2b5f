use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Path, RawQuery, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Serialize;

use super::db::DbHandle;
use super::feed::BroadcastFeed;
use super::filter::FilterState;
use super::models::{ChangeEvent, NewMessage, Operation};
use super::query::{InboxQueries, ListParams, QueryClient};
use super::ws;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub db: Arc<DbHandle>,
    /// List/count reads go through this cache; inserts invalidate it.
    pub queries: Arc<QueryClient>,
    pub feed: Arc<BroadcastFeed>,
    /// Table name carried in published insert events.
    pub table: String,
    pub ping_interval: Duration,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    fn team_queries(&self, team_id: String) -> InboxQueries<DbHandle> {
        InboxQueries::new(self.db.clone(), self.queries.clone(), team_id)
    }
}

#[derive(Serialize)]
pub struct CountResponse {
    pub count: u64,
}

// ── Error handling ────────────────────────────────────────────────────

pub enum ApiError {
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route(
            "/api/teams/{team_id}/messages",
            get(list_messages).post(create_message),
        )
        .route("/api/teams/{team_id}/messages/count", get(count_messages))
        .route("/ws/teams/{team_id}", get(ws::ws_handler))
        .route("/health", get(health_check))
}

/// Malformed filter params fall back to defaults instead of rejecting.
fn params_from_query(raw: Option<String>) -> ListParams {
    let state = FilterState::decode(raw.as_deref().unwrap_or_default());
    ListParams::from_filter(&state)
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn list_messages(
    State(state): State<SharedState>,
    Path(team_id): Path<String>,
    RawQuery(raw): RawQuery,
) -> Result<impl IntoResponse, ApiError> {
    let params = params_from_query(raw);
    let messages = state
        .team_queries(team_id)
        .list(&params)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(Vec::clone(&messages)))
}

async fn count_messages(
    State(state): State<SharedState>,
    Path(team_id): Path<String>,
    RawQuery(raw): RawQuery,
) -> Result<impl IntoResponse, ApiError> {
    let params = params_from_query(raw);
    let count = state
        .team_queries(team_id)
        .count(&params)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(CountResponse { count }))
}

async fn create_message(
    State(state): State<SharedState>,
    Path(team_id): Path<String>,
    Json(req): Json<NewMessage>,
) -> Result<impl IntoResponse, ApiError> {
    req.validate().map_err(ApiError::BadRequest)?;

    let team = team_id.clone();
    let message = state
        .db
        .call(move |db| db.insert_message(&team, &req))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    for operation in [Operation::List, Operation::Count] {
        if let Err(e) = state.queries.invalidate(operation) {
            tracing::warn!(%operation, error = %e, "failed to invalidate server cache");
        }
    }

    let delivered = state
        .feed
        .publish(&team_id, ChangeEvent::insert(state.table.clone()));
    tracing::info!(
        team_id = %team_id,
        message_id = message.id,
        delivered,
        "captured message"
    );

    Ok((StatusCode::CREATED, Json(message)))
}
