//! HTTP tool server.
//!
//! Exposes the engine over a small JSON API suitable for agent tooling:
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/tools/search` | Hybrid/lexical/semantic search |
//! | `POST` | `/tools/reindex` | Reindex paths, inline or in the background |
//! | `POST` | `/tools/get_chunk` | Fetch one chunk by stable id |
//! | `POST` | `/tools/get_file` | Fetch all chunks of an indexed file |
//! | `GET`  | `/tools/status` | Index counts, metadata, jobs, watcher state |
//! | `GET`  | `/health` | Liveness check with version |
//!
//! Errors follow `{ "error": { "code": "...", "message": "..." } }` with the
//! engine's error kinds mapped onto status codes: invalid input → 400,
//! missing chunk/file → 404, transient lock pressure → 503, schema mismatch
//! and everything else → 500.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::engine::{Engine, SearchResponse, StatusResponse};
use crate::error::Error;
use crate::models::{ChunkDetail, FileChunks, SearchMode};

#[derive(Clone)]
struct AppState {
    engine: Arc<Engine>,
}

/// Serve until ctrl-c, then shut the engine down gracefully.
pub async fn run_server(engine: Arc<Engine>, bind: &str) -> anyhow::Result<()> {
    let state = AppState {
        engine: Arc::clone(&engine),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/tools/search", post(handle_search))
        .route("/tools/reindex", post(handle_reindex))
        .route("/tools/get_chunk", post(handle_get_chunk))
        .route("/tools/get_file", post(handle_get_file))
        .route("/tools/status", get(handle_status))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state);

    info!(bind, "tool server listening");

    let listener = tokio::net::TcpListener::bind(bind).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    engine.shutdown(Duration::from_secs(10)).await;
    Ok(())
}

// ============ Error mapping ============

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

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        let status = match &err {
            Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Schema(_) | Error::Internal(_) | Error::EmbedderUnavailable(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        AppError {
            status,
            code: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "invalid_input".to_string(),
        message: message.into(),
    }
}

// ============ POST /tools/search ============

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    top_k: Option<usize>,
    #[serde(default = "default_mode")]
    mode: String,
}

fn default_mode() -> String {
    "hybrid".to_string()
}

async fn handle_search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, AppError> {
    let mode: SearchMode = req.mode.parse().map_err(AppError::from)?;
    let response = state.engine.search(&req.query, req.top_k, mode).await?;
    Ok(Json(response))
}

// ============ POST /tools/reindex ============

#[derive(Deserialize)]
struct ReindexToolRequest {
    path: Option<PathBuf>,
    paths: Option<Vec<PathBuf>>,
    #[serde(default)]
    force: bool,
    #[serde(default = "default_prune")]
    prune_missing: bool,
    #[serde(default)]
    background: bool,
}

fn default_prune() -> bool {
    true
}

async fn handle_reindex(
    State(state): State<AppState>,
    Json(req): Json<ReindexToolRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    // Precedence: non-empty `paths`, then `path`, then the working directory.
    let paths: Vec<PathBuf> = match (req.paths, req.path) {
        (Some(paths), _) if !paths.is_empty() => paths,
        (_, Some(path)) => vec![path],
        _ => vec![std::env::current_dir().map_err(|e| bad_request(e.to_string()))?],
    };

    if req.background {
        let snapshot = state
            .engine
            .reindex_background(paths, req.force, req.prune_missing)?;
        let value = serde_json::to_value(snapshot).map_err(|e| AppError::from(Error::Internal(e.to_string())))?;
        return Ok(Json(value));
    }

    let report = state
        .engine
        .reindex(paths, req.force, req.prune_missing)
        .await?;
    let value =
        serde_json::to_value(report).map_err(|e| AppError::from(Error::Internal(e.to_string())))?;
    Ok(Json(value))
}

// ============ POST /tools/get_chunk ============

#[derive(Deserialize)]
struct GetChunkRequest {
    chunk_id: String,
}

#[derive(Serialize)]
struct GetChunkResponse {
    chunk: ChunkDetail,
}

async fn handle_get_chunk(
    State(state): State<AppState>,
    Json(req): Json<GetChunkRequest>,
) -> Result<Json<GetChunkResponse>, AppError> {
    if req.chunk_id.trim().is_empty() {
        return Err(bad_request("chunk_id must not be empty"));
    }
    let chunk = state.engine.get_chunk(&req.chunk_id).await?;
    Ok(Json(GetChunkResponse { chunk }))
}

// ============ POST /tools/get_file ============

#[derive(Deserialize)]
struct GetFileRequest {
    path: String,
}

#[derive(Serialize)]
struct GetFileResponse {
    file: FileChunks,
}

async fn handle_get_file(
    State(state): State<AppState>,
    Json(req): Json<GetFileRequest>,
) -> Result<Json<GetFileResponse>, AppError> {
    if req.path.trim().is_empty() {
        return Err(bad_request("path must not be empty"));
    }
    let file = state.engine.get_file(&req.path).await?;
    Ok(Json(GetFileResponse { file }))
}

// ============ GET /tools/status ============

async fn handle_status(
    State(state): State<AppState>,
) -> Result<Json<StatusResponse>, AppError> {
    let status = state.engine.status().await?;
    Ok(Json(status))
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
