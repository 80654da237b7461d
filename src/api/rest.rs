// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// Board reads are served from the latest published snapshot; board writes are
// enqueued on the board actor and answered immediately. `/api/baccarat` is a
// direct passthrough to the snapshot source and never touches the board.
//
// CORS is permissive: the board page may be served from anywhere.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::app_state::AppState;
use crate::board::record::RecordPayload;
use crate::market_data::source::FetchError;
use crate::runtime_config::MAX_FETCH_LIMIT;
use crate::types::Interval;

// =============================================================================
// Router construction
// =============================================================================

/// Build the full router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/api/baccarat", get(baccarat))
        // ── Board ───────────────────────────────────────────────────
        .route("/api/board", get(board))
        .route("/api/board/chart", get(board_chart))
        .route("/api/board/cell/:col/:row", get(board_cell))
        .route("/api/board/refresh", post(board_refresh))
        .route("/api/board/auto-refresh", post(board_auto_refresh))
        .route("/api/board/interval", post(board_interval))
        // ── Push channel ────────────────────────────────────────────
        .route("/api/ws", get(crate::api::ws::ws_handler))
        .layer(cors)
        .with_state(state)
}

fn error_json(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({ "success": false, "error": message.into() })),
    )
        .into_response()
}

/// A stopped board actor means the process is shutting down.
fn board_unavailable(e: anyhow::Error) -> Response {
    warn!(error = %e, "board command rejected");
    error_json(StatusCode::SERVICE_UNAVAILABLE, "board is not running")
}

// =============================================================================
// Health
// =============================================================================

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.health())
}

// =============================================================================
// Snapshot passthrough
// =============================================================================

#[derive(Deserialize)]
struct BaccaratQuery {
    #[serde(default)]
    interval: Option<String>,
    /// Taken as text so that a malformed value falls back to the default.
    #[serde(default)]
    limit: Option<String>,
}

#[derive(Serialize)]
struct BaccaratResponse {
    success: bool,
    data: Vec<RecordPayload>,
    count: usize,
}

async fn baccarat(
    State(state): State<Arc<AppState>>,
    Query(query): Query<BaccaratQuery>,
) -> Response {
    let (default_limit, zone) = {
        let config = state.runtime_config.read();
        (config.fetch_limit, config.zone())
    };

    let interval = match query.interval.as_deref() {
        Some(raw) => match raw.parse::<Interval>() {
            Ok(iv) => iv,
            Err(e) => return error_json(StatusCode::BAD_REQUEST, e.to_string()),
        },
        None => Interval::default(),
    };
    let limit = query
        .limit
        .and_then(|l| l.trim().parse::<i64>().ok())
        .map(|l| l.clamp(1, MAX_FETCH_LIMIT as i64) as u32)
        .unwrap_or(default_limit);

    match state.source.fetch_with_limit(interval, limit).await {
        Ok(batch) => {
            let data: Vec<RecordPayload> =
                batch.records.iter().map(|r| r.to_payload(zone)).collect();
            Json(BaccaratResponse {
                success: true,
                count: data.len(),
                data,
            })
            .into_response()
        }
        Err(e) => {
            warn!(error = %e, %interval, limit, "snapshot passthrough failed");
            let message = match e {
                FetchError::Transport(m) | FetchError::Rejected(m) => m,
            };
            error_json(StatusCode::BAD_GATEWAY, message)
        }
    }
}

// =============================================================================
// Board reads
// =============================================================================

async fn board(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.board.snapshot())
}

async fn board_chart(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.board.snapshot().chart.clone())
}

async fn board_cell(
    State(state): State<Arc<AppState>>,
    Path((col, row)): Path<(usize, usize)>,
) -> Response {
    match state.board.snapshot().cell_detail(col, row) {
        Some(detail) => Json(detail).into_response(),
        None => error_json(StatusCode::NOT_FOUND, format!("cell {col}x{row} is empty")),
    }
}

// =============================================================================
// Board control
// =============================================================================

async fn board_refresh(State(state): State<Arc<AppState>>) -> Response {
    match state.board.reload().await {
        Ok(()) => {
            info!("board refresh requested via API");
            (
                StatusCode::ACCEPTED,
                Json(serde_json::json!({ "success": true })),
            )
                .into_response()
        }
        Err(e) => board_unavailable(e),
    }
}

#[derive(Deserialize)]
struct AutoRefreshRequest {
    enabled: bool,
}

async fn board_auto_refresh(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AutoRefreshRequest>,
) -> Response {
    match state.board.set_auto_refresh(req.enabled).await {
        Ok(()) => {
            state.runtime_config.write().auto_refresh = req.enabled;
            Json(serde_json::json!({ "success": true, "auto_refresh": req.enabled }))
                .into_response()
        }
        Err(e) => board_unavailable(e),
    }
}

#[derive(Deserialize)]
struct IntervalRequest {
    interval: String,
}

async fn board_interval(
    State(state): State<Arc<AppState>>,
    Json(req): Json<IntervalRequest>,
) -> Response {
    let interval = match req.interval.parse::<Interval>() {
        Ok(iv) => iv,
        Err(e) => return error_json(StatusCode::BAD_REQUEST, e.to_string()),
    };
    match state.board.set_interval(interval).await {
        Ok(()) => {
            state.runtime_config.write().interval = interval;
            Json(serde_json::json!({ "success": true, "interval": interval })).into_response()
        }
        Err(e) => board_unavailable(e),
    }
}
