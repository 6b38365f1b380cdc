//! Read-only HTTP JSON API over the catalog.
//!
//! Presentation only: nothing here changes an item's status or lease.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/items?status=&limit=` | List items, optionally by status |
//! | `GET`  | `/items/{id}` | One item |
//! | `POST` | `/search` | `{ "query": "...", "limit": 10 }` similarity search |
//! | `GET`  | `/stats` | Counts per status, vectors, active leases |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so browser dashboards
//! can read the API directly.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use radio_cortex_core::clock::Clock;
use radio_cortex_core::error::StoreError;
use radio_cortex_core::models::Status;
use radio_cortex_core::store::CatalogStore;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::error;

use crate::embedding::Embedder;
use crate::get::{get_item, list_items, ItemResponse};
use crate::search::{search_items, SearchResultItem};
use crate::stats::{gather_stats, StatsResponse};

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 500;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn CatalogStore>,
    pub embedder: Arc<dyn Embedder>,
    pub clock: Arc<dyn Clock>,
}

/// Build the router. Split from [`run_server`] so tests can serve it on an
/// ephemeral port.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/items", get(handle_list_items))
        .route("/items/{id}", get(handle_get_item))
        .route("/search", post(handle_search))
        .route("/stats", get(handle_stats))
        .layer(cors)
        .with_state(state)
}

/// Starts the HTTP server on `bind`. Runs until the process is terminated.
pub async fn run_server(bind: &str, state: AppState) -> anyhow::Result<()> {
    let app = router(state);

    println!("cortex API listening on http://{}", bind);

    let listener = tokio::net::TcpListener::bind(bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => not_found(err.to_string()),
            StoreError::Schema { .. } => bad_request(err.to_string()),
            other => {
                error!(error = %other, "store error while serving request");
                internal(other.to_string())
            }
        }
    }
}

fn clamp_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /items ============

#[derive(Deserialize)]
struct ListParams {
    status: Option<String>,
    limit: Option<usize>,
}

#[derive(Serialize)]
struct ListResponse {
    items: Vec<ItemResponse>,
}

async fn handle_list_items(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<ListResponse>, AppError> {
    let status = params
        .status
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<Status>())
        .transpose()
        .map_err(|e| bad_request(e.to_string()))?;

    let items = list_items(state.store.as_ref(), status, clamp_limit(params.limit)).await?;
    Ok(Json(ListResponse { items }))
}

// ============ GET /items/{id} ============

async fn handle_get_item(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ItemResponse>, AppError> {
    Ok(Json(get_item(state.store.as_ref(), &id).await?))
}

// ============ POST /search ============

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    limit: Option<usize>,
}

#[derive(Serialize)]
struct SearchResponse {
    results: Vec<SearchResultItem>,
}

async fn handle_search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, AppError> {
    if req.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    let limit = req.limit.unwrap_or(10).clamp(1, MAX_LIMIT);
    let results = search_items(state.store.as_ref(), state.embedder.as_ref(), &req.query, limit)
        .await
        .map_err(|e| match e.downcast::<StoreError>() {
            Ok(store_err) => AppError::from(store_err),
            Err(other) => internal(other.to_string()),
        })?;
    Ok(Json(SearchResponse { results }))
}

// ============ GET /stats ============

async fn handle_stats(State(state): State<AppState>) -> Result<Json<StatsResponse>, AppError> {
    let now = state.clock.now_millis();
    Ok(Json(gather_stats(state.store.as_ref(), now).await?))
}
