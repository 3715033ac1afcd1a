//! chainsync-api — read-only HTTP API over committed transfers.
//!
//! ```text
//! GET /health
//! GET /transfers/:address?page&limit
//! GET /sync-status
//! ```
//!
//! Every route is also served under `/api`.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use chainsync_core::{PageRequest, SyncError, TransferQuery};

/// Handler state. `Clone` is implemented by hand so `Q` itself need not be
/// `Clone` (or even sized).
struct ApiState<Q: ?Sized> {
    query: Arc<Q>,
}

impl<Q: ?Sized> Clone for ApiState<Q> {
    fn clone(&self) -> Self {
        Self {
            query: Arc::clone(&self.query),
        }
    }
}

/// Build the API router over `query`.
pub fn router<Q>(query: Arc<Q>) -> Router
where
    Q: TransferQuery + ?Sized + 'static,
{
    let routes = Router::new()
        .route("/health", get(health))
        .route("/transfers/:address", get(transfers::<Q>))
        .route("/sync-status", get(sync_status::<Q>));

    Router::new()
        .merge(routes.clone())
        .nest("/api", routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(ApiState { query })
}

/// Bind `addr` and serve until `shutdown` resolves.
pub async fn serve<Q, F>(addr: SocketAddr, query: Arc<Q>, shutdown: F) -> Result<(), SyncError>
where
    Q: TransferQuery + ?Sized + 'static,
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| SyncError::Config(format!("cannot bind {addr}: {e}")))?;
    info!(%addr, "read API listening");
    axum::serve(listener, router(query))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| SyncError::Connectivity(format!("api server: {e}")))
}

// ─── Handlers ─────────────────────────────────────────────────────────────────

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    }))
}

/// Raw paging parameters; anything unparsable falls back to the defaults.
#[derive(Debug, Default, Deserialize)]
struct PageParams {
    page: Option<String>,
    limit: Option<String>,
}

async fn transfers<Q>(
    State(state): State<ApiState<Q>>,
    Path(address): Path<String>,
    Query(params): Query<PageParams>,
) -> Response
where
    Q: TransferQuery + ?Sized + 'static,
{
    let page = PageRequest::clamped(
        params.page.as_deref().and_then(leading_int),
        params.limit.as_deref().and_then(leading_int),
    );
    match state
        .query
        .transfers_for_address(&address.to_ascii_lowercase(), page)
        .await
    {
        Ok(page) => Json(page).into_response(),
        Err(e) => {
            error!(error = %e, %address, "transfer query failed");
            failure("Internal Server Error")
        }
    }
}

async fn sync_status<Q>(State(state): State<ApiState<Q>>) -> Response
where
    Q: TransferQuery + ?Sized + 'static,
{
    match state.query.sync_status().await {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => {
            error!(error = %e, "sync status query failed");
            failure("Failed to fetch sync status")
        }
    }
}

fn failure(message: &str) -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": message }))).into_response()
}

/// Integer prefix of `s` (`"12abc"` → 12, `"abc"` → `None`).
fn leading_int(s: &str) -> Option<i64> {
    let s = s.trim_start();
    let (sign, digits) = match s.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, s.strip_prefix('+').unwrap_or(s)),
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    if end == 0 {
        return None;
    }
    // Saturate instead of failing on absurdly long inputs.
    let value = digits[..end].parse::<i64>().unwrap_or(i64::MAX);
    Some(sign * value)
}
