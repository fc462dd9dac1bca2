//! Operator HTTP surface: dead-letter inspection and replay.
//!
//! Requires the `http` feature. Uses axum for routing.
//!
//! ## Routes
//!
//! - `GET /health`: `{ "ok": true, "pending_backlog": n }`.
//! - `GET /dead-letters?event_type=&offset=&limit=`: list records.
//! - `POST /dead-letters/:id/replay`: reset the event to pending; the
//!   record stays behind as audit trail.
//! - `DELETE /dead-letters/:id`: purge a record.
//!
//! ## Example
//!
//! ```ignore
//! use outbox_relay::{admin, MemoryDeadLetterStore, MemoryStore};
//!
//! let store = MemoryStore::new();
//! let dead_letters = MemoryDeadLetterStore::new();
//!
//! // Get the router to compose with other axum routes
//! let app = admin::router(store.clone(), dead_letters.clone());
//!
//! // Or serve directly
//! admin::serve(store, dead_letters, "0.0.0.0:3000").await?;
//! ```

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use crate::dead_letter::{replay, DeadLetterFilter, DeadLetterStore};
use crate::error::OutboxError;
use crate::event::EventId;
use crate::store::OutboxStore;

struct Admin<S, D> {
    store: S,
    dead_letters: D,
}

/// Build an axum `Router` over the given stores.
pub fn router<S, D>(store: S, dead_letters: D) -> Router
where
    S: OutboxStore + 'static,
    D: DeadLetterStore + 'static,
{
    let state = Arc::new(Admin {
        store,
        dead_letters,
    });
    Router::new()
        .route("/health", get(health_handler::<S, D>))
        .route("/dead-letters", get(list_handler::<S, D>))
        .route(
            "/dead-letters/:id/replay",
            axum::routing::post(replay_handler::<S, D>),
        )
        .route(
            "/dead-letters/:id",
            axum::routing::delete(purge_handler::<S, D>),
        )
        .with_state(state)
}

/// Serve the admin surface at the given address (e.g. `"0.0.0.0:3000"`).
pub async fn serve<S, D>(store: S, dead_letters: D, addr: &str) -> Result<(), std::io::Error>
where
    S: OutboxStore + 'static,
    D: DeadLetterStore + 'static,
{
    let app = router(store, dead_letters);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await
}

#[derive(Debug, Default, Deserialize)]
struct ListParams {
    event_type: Option<String>,
    #[serde(default)]
    offset: usize,
    limit: Option<usize>,
}

async fn health_handler<S, D>(State(admin): State<Arc<Admin<S, D>>>) -> impl IntoResponse
where
    S: OutboxStore + 'static,
    D: DeadLetterStore + 'static,
{
    match admin.store.pending_backlog() {
        Ok(backlog) => (
            StatusCode::OK,
            Json(json!({ "ok": true, "pending_backlog": backlog })),
        )
            .into_response(),
        Err(err) => error_response(&err),
    }
}

async fn list_handler<S, D>(
    State(admin): State<Arc<Admin<S, D>>>,
    Query(params): Query<ListParams>,
) -> impl IntoResponse
where
    S: OutboxStore + 'static,
    D: DeadLetterStore + 'static,
{
    let mut filter = DeadLetterFilter::new().offset(params.offset);
    if let Some(event_type) = params.event_type {
        filter = filter.event_type(event_type);
    }
    if let Some(limit) = params.limit {
        filter = filter.limit(limit);
    }

    match admin.dead_letters.list(&filter) {
        Ok(records) => (StatusCode::OK, Json(json!({ "records": records }))).into_response(),
        Err(err) => error_response(&err),
    }
}

async fn replay_handler<S, D>(
    State(admin): State<Arc<Admin<S, D>>>,
    Path(id): Path<String>,
) -> impl IntoResponse
where
    S: OutboxStore + 'static,
    D: DeadLetterStore + 'static,
{
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(response) => return response,
    };

    match replay(&admin.store, &admin.dead_letters, id) {
        Ok(()) => (StatusCode::OK, Json(json!({ "replayed": id.to_string() }))).into_response(),
        Err(err) => error_response(&err),
    }
}

async fn purge_handler<S, D>(
    State(admin): State<Arc<Admin<S, D>>>,
    Path(id): Path<String>,
) -> impl IntoResponse
where
    S: OutboxStore + 'static,
    D: DeadLetterStore + 'static,
{
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(response) => return response,
    };

    match admin.dead_letters.purge(id) {
        Ok(()) => (StatusCode::OK, Json(json!({ "purged": id.to_string() }))).into_response(),
        Err(err) => error_response(&err),
    }
}

fn parse_id(raw: &str) -> Result<EventId, axum::response::Response> {
    EventId::parse(raw).map_err(|_| {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": format!("invalid event id '{raw}'") })),
        )
            .into_response()
    })
}

fn error_response(err: &OutboxError) -> axum::response::Response {
    let status = match err {
        OutboxError::NotFound(_) => StatusCode::NOT_FOUND,
        OutboxError::Conflict(_) => StatusCode::CONFLICT,
        OutboxError::Config(_) => StatusCode::BAD_REQUEST,
        OutboxError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "error": err.to_string() }))).into_response()
}
