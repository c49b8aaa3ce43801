use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use common::{
    ClaimRequest, ClaimResponse, ErrorResponse, FarmError, JobInfo, JobRequest, JobResults,
    NodeMetrics, NodeRegisterRequest, NodeRegisterResponse, SubmitOutcome, SubmitResultQuery,
    SubmitResultResponse, TaskAssignmentRequest, TaskAssignmentResponse, TaskView,
};
use std::sync::{MutexGuard, PoisonError};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::state::{AppState, NodeMeta};

/// Tamaño máximo de un resultado subido por un nodo.
const MAX_RESULT_BYTES: usize = 512 * 1024 * 1024;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/jobs", post(create_job).get(list_jobs))
        .route("/api/v1/jobs/:id", get(get_job))
        .route("/api/v1/jobs/:id/tasks", get(get_job_tasks))
        .route("/api/v1/jobs/:id/results", get(get_job_results))
        .route("/api/v1/nodes", get(list_nodes))
        .route("/api/v1/nodes/register", post(register_node))
        .route("/api/v1/tasks/next", post(claim_task))
        .route(
            "/api/v1/tasks/:id/result",
            post(submit_result).layer(DefaultBodyLimit::max(MAX_RESULT_BYTES)),
        )
        .route("/api/v1/tasks/release", post(release_claim))
        .route("/api/v1/tasks/heartbeat", post(claim_heartbeat))
        .route("/api/v1/tasks/:id/ignore", post(ignore_task))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Error de la API: un `FarmError` con su código HTTP.
pub struct ApiError(FarmError);

impl From<FarmError> for ApiError {
    fn from(e: FarmError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            FarmError::TaskNotFound(_) | FarmError::JobNotFound(_) => StatusCode::NOT_FOUND,
            FarmError::TaskIgnored(_)
            | FarmError::StaleClaim { .. }
            | FarmError::DuplicateCompletion(_)
            | FarmError::RaceOnClaim(_)
            | FarmError::MissingPayload(_)
            | FarmError::NoResultLocation { .. } => StatusCode::CONFLICT,
            FarmError::InvalidJob(_) | FarmError::MalformedPayload { .. } => {
                StatusCode::BAD_REQUEST
            }
            FarmError::StorageFailure(_) | FarmError::Serde(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = ErrorResponse {
            error: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

fn nodes(state: &AppState) -> MutexGuard<'_, std::collections::HashMap<String, NodeMeta>> {
    state.nodes.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Corre `f` fuera del executor: el scheduler toma locks de tareas y escribe
/// en disco con fsync.
async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> common::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let out = tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| FarmError::StorageFailure(std::io::Error::other(e)))??;
    Ok(out)
}

/* ---------------- handlers HTTP ---------------- */

async fn health() -> &'static str {
    "ok"
}

// Crea un job y una tarea de render por frame
async fn create_job(
    State(state): State<AppState>,
    Json(req): Json<JobRequest>,
) -> Result<Json<JobInfo>, ApiError> {
    let scheduler = state.scheduler.clone();
    let job = blocking(move || scheduler.create_job(req)).await?;
    Ok(Json(job))
}

async fn list_jobs(State(state): State<AppState>) -> Json<Vec<JobInfo>> {
    Json(state.scheduler.jobs())
}

async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobInfo>, ApiError> {
    Ok(Json(state.scheduler.job(&id)?))
}

async fn get_job_tasks(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<TaskView>>, ApiError> {
    let scheduler = state.scheduler.clone();
    Ok(Json(blocking(move || scheduler.tasks_for_job(&id)).await?))
}

// Lista los archivos de resultado de un job
async fn get_job_results(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobResults>, ApiError> {
    let scheduler = state.scheduler.clone();
    Ok(Json(blocking(move || scheduler.job_results(&id)).await?))
}

// Registra un nodo nuevo
async fn register_node(
    State(state): State<AppState>,
    Json(req): Json<NodeRegisterRequest>,
) -> Json<NodeRegisterResponse> {
    let node_id = uuid::Uuid::new_v4().to_string();
    let meta = NodeMeta::new(req.hostname, req.max_concurrency);

    info!(
        "nodo registrado: {} ({}, max_concurrency={})",
        node_id, meta.hostname, meta.max_concurrency
    );
    nodes(&state).insert(node_id.clone(), meta);

    Json(NodeRegisterResponse { node_id })
}

async fn list_nodes(State(state): State<AppState>) -> Json<Vec<NodeMetrics>> {
    let now = Utc::now();
    let snapshot: Vec<(String, NodeMeta)> = nodes(&state)
        .iter()
        .map(|(id, meta)| (id.clone(), meta.clone()))
        .collect();

    let mut out: Vec<NodeMetrics> = snapshot
        .into_iter()
        .map(|(node_id, meta)| NodeMetrics {
            active_claims: state.scheduler.active_claims_for(&node_id) as u32,
            node_id,
            hostname: meta.hostname,
            max_concurrency: meta.max_concurrency,
            registered_at: meta.registered_at,
            last_seen_secs_ago: (now - meta.last_seen).num_seconds(),
            tasks_completed: meta.tasks_completed,
        })
        .collect();
    out.sort_by_key(|m| m.registered_at);

    Json(out)
}

// Entrega la siguiente tarea asignable (si hay y si el nodo tiene lugar)
async fn claim_task(
    State(state): State<AppState>,
    Json(req): Json<TaskAssignmentRequest>,
) -> Result<Json<TaskAssignmentResponse>, ApiError> {
    let max_for_node = {
        let mut nodes = nodes(&state);
        match nodes.get_mut(&req.node_id) {
            Some(meta) => {
                meta.last_seen = Utc::now();
                meta.max_concurrency
            }
            None => 1,
        }
    };

    let active = state.scheduler.active_claims_for(&req.node_id);
    if active as u32 >= max_for_node {
        info!(
            "nodo {} pidió tarea pero ya tiene {}/{} en vuelo",
            req.node_id, active, max_for_node
        );
        return Ok(Json(TaskAssignmentResponse { task: None }));
    }

    let scheduler = state.scheduler.clone();
    let task = blocking(move || Ok(scheduler.claim_next(&req.node_id))).await?;
    Ok(Json(TaskAssignmentResponse { task }))
}

// El nodo sube los bytes del resultado
async fn submit_result(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    Query(query): Query<SubmitResultQuery>,
    body: Bytes,
) -> Result<Json<SubmitResultResponse>, ApiError> {
    let scheduler = state.scheduler.clone();
    let node_id = query.node_id.clone();
    let tid = task_id.clone();

    let resp = blocking(move || scheduler.submit_result(&tid, &node_id, &body))
        .await
        .map_err(|e| {
            warn!(
                "resultado de la tarea {} (nodo {}) rechazado: {}",
                task_id, query.node_id, e.0
            );
            e
        })?;

    if let Some(meta) = nodes(&state).get_mut(&query.node_id) {
        meta.last_seen = Utc::now();
        if resp.outcome == SubmitOutcome::Accepted {
            meta.tasks_completed += 1;
        }
    }

    Ok(Json(resp))
}

async fn release_claim(
    State(state): State<AppState>,
    Json(req): Json<ClaimRequest>,
) -> Result<Json<ClaimResponse>, ApiError> {
    let scheduler = state.scheduler.clone();
    let ok = blocking(move || scheduler.release_claim(&req.task_id, &req.node_id)).await?;
    Ok(Json(ClaimResponse { ok }))
}

// Heartbeat de un claim en curso; 409 si el claim ya no existe
async fn claim_heartbeat(
    State(state): State<AppState>,
    Json(req): Json<ClaimRequest>,
) -> Result<Json<ClaimResponse>, ApiError> {
    if let Some(meta) = nodes(&state).get_mut(&req.node_id) {
        meta.last_seen = Utc::now();
    }
    let scheduler = state.scheduler.clone();
    blocking(move || scheduler.heartbeat(&req.task_id, &req.node_id)).await?;
    Ok(Json(ClaimResponse { ok: true }))
}

async fn ignore_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<TaskView>, ApiError> {
    let scheduler = state.scheduler.clone();
    let view = blocking(move || {
        scheduler.set_ignored(&task_id)?;
        scheduler.task_view(&task_id)
    })
    .await?;
    Ok(Json(view))
}
