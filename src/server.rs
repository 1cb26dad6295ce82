//! HTTP API for ingestion, task tracking, and querying.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/documents` | Submit a document; returns `202 {task_id}` |
//! | `GET`  | `/tasks/{task_id}` | Status of one ingestion task |
//! | `POST` | `/tasks/{task_id}/cancel` | Request cancellation |
//! | `POST` | `/query` | Answer a question over the stored corpus |
//! | `GET`  | `/quality/latest` | Latest gardener quality report |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! All error responses share one schema:
//!
//! ```json
//! { "error": { "code": "not_found", "message": "no task with id: ..." } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `internal` (500).
//!
//! Document submission is non-blocking: the pipeline runs on a spawned task
//! and the handler returns as soon as the task is registered. The gardener
//! loop and the task-retention cleanup loop are spawned alongside the
//! listener.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::config::Config;
use crate::gardener::GraphGardener;
use crate::graph;
use crate::llm::LlmClient;
use crate::loader::FileSource;
use crate::models::{DocumentType, ProcessingTask};
use crate::pipeline::{IngestOptions, IngestionPipeline};
use crate::query::QueryFallbackEngine;
use crate::tasks::TaskStatusTracker;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    pipeline: Arc<IngestionPipeline>,
    engine: Arc<QueryFallbackEngine>,
    pool: sqlx::SqlitePool,
}

/// Starts the HTTP server on `[server].bind` and runs until the process is
/// terminated. Also spawns the gardener loop and the task cleanup loop.
pub async fn run_server(config: &Config, pool: sqlx::SqlitePool) -> anyhow::Result<()> {
    let tracker = TaskStatusTracker::new();
    let pipeline = Arc::new(IngestionPipeline::new(
        pool.clone(),
        config.clone(),
        tracker.clone(),
    )?);
    let engine = Arc::new(QueryFallbackEngine::new(
        pool.clone(),
        config.retrieval.clone(),
        &config.embedding,
        LlmClient::from_config(&config.llm)
            .map_err(|e| anyhow::anyhow!("LLM client init failed: {}", e))?,
    )?);

    let gardener_llm = LlmClient::from_config(&config.llm)
        .map_err(|e| anyhow::anyhow!("LLM client init failed: {}", e))?;
    let gardener = GraphGardener::new(pool.clone(), config.gardener.clone(), gardener_llm);
    tokio::spawn(gardener.run_loop());

    let retention = Duration::from_secs(config.tasks.retention_secs);
    let cleanup_tracker = tracker.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(600));
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = cleanup_tracker.cleanup(retention);
            if removed > 0 {
                info!(removed, "expired terminal tasks removed");
            }
        }
    });

    let state = AppState {
        pipeline,
        engine,
        pool,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = router(state).layer(cors);

    let bind_addr = config.server.bind.clone();
    info!(addr = %bind_addr, "server listening");
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/documents", post(handle_submit_document))
        .route("/tasks/{task_id}", get(handle_task_status))
        .route("/tasks/{task_id}/cancel", post(handle_task_cancel))
        .route("/query", post(handle_query))
        .route("/quality/latest", get(handle_quality_latest))
        .route("/health", get(handle_health))
        .with_state(state)
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

// ============ POST /documents ============

#[derive(Deserialize)]
struct SubmitRequest {
    file_name: String,
    content: String,
    /// Optional type override, skipping classification.
    #[serde(default)]
    force_type: Option<String>,
    /// Run structural validation on extracted controls (default true).
    #[serde(default = "default_true")]
    validate: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Serialize)]
struct SubmitResponse {
    task_id: String,
}

/// Spools the upload, registers a task, and spawns the pipeline. The
/// response carries only the task id; progress is polled via
/// `GET /tasks/{task_id}`.
async fn handle_submit_document(
    State(state): State<AppState>,
    Json(req): Json<SubmitRequest>,
) -> Result<(StatusCode, Json<SubmitResponse>), AppError> {
    if req.file_name.trim().is_empty() {
        return Err(bad_request("file_name must not be empty"));
    }
    if req.content.is_empty() {
        return Err(bad_request("content must not be empty"));
    }
    let force_type = match &req.force_type {
        Some(s) => Some(
            DocumentType::parse(s)
                .ok_or_else(|| bad_request(format!("unknown document type: {}", s)))?,
        ),
        None => None,
    };

    let source = FileSource::spool(&req.file_name, req.content.as_bytes())
        .map_err(|e| internal(e.to_string()))?;
    let options = IngestOptions {
        force_type,
        validate: req.validate,
    };

    let task_id = state.pipeline.register_task();
    let pipeline = state.pipeline.clone();
    let spawned_id = task_id.clone();
    tokio::spawn(async move {
        // Terminal state and error payload are recorded by the pipeline.
        let _ = pipeline.run(&spawned_id, source, options).await;
    });

    Ok((StatusCode::ACCEPTED, Json(SubmitResponse { task_id })))
}

// ============ GET /tasks/{task_id} ============

#[derive(Serialize)]
struct TaskResponse {
    task_id: String,
    status: String,
    progress: f64,
    current_operation: String,
    metadata: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl From<ProcessingTask> for TaskResponse {
    fn from(task: ProcessingTask) -> Self {
        Self {
            task_id: task.task_id,
            status: task.state.as_str().to_string(),
            progress: task.progress,
            current_operation: task.current_operation,
            metadata: task.metadata,
            error: task.error,
        }
    }
}

async fn handle_task_status(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<TaskResponse>, AppError> {
    state
        .pipeline
        .tracker()
        .get(&task_id)
        .map(|task| Json(TaskResponse::from(task)))
        .ok_or_else(|| not_found(format!("no task with id: {}", task_id)))
}

async fn handle_task_cancel(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    if state.pipeline.tracker().request_cancel(&task_id) {
        Ok(Json(serde_json::json!({ "cancelled": true })))
    } else {
        Err(not_found(format!(
            "no cancellable task with id: {}",
            task_id
        )))
    }
}

// ============ POST /query ============

#[derive(Deserialize)]
struct QueryRequest {
    text: String,
    #[serde(default = "default_true")]
    use_cache: bool,
}

async fn handle_query(
    State(state): State<AppState>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<crate::models::QueryAnswer>, AppError> {
    if req.text.trim().is_empty() {
        return Err(bad_request("text must not be empty"));
    }
    let answer = state.engine.answer(&req.text, req.use_cache).await;
    Ok(Json(answer))
}

// ============ GET /quality/latest ============

async fn handle_quality_latest(
    State(state): State<AppState>,
) -> Result<Json<crate::models::QualityReport>, AppError> {
    let report = graph::latest_quality_report(&state.pool)
        .await
        .map_err(|e| internal(e.to_string()))?;
    report
        .map(Json)
        .ok_or_else(|| not_found("no quality report yet"))
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
