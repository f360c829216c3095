//! Storage-endpoint, background-task, and queue administration surface.
//! Thin orchestration over
//! `imgtag_core::storage::admin`, `imgtag_core::background`, and
//! `imgtag_core::queue::QueueHandle` — none of these handlers touch SQL
//! or object-store clients directly, matching how `web/image.rs` sits
//! over `ingest`/`search`/`update`.

use crate::error::AppError;
use crate::AppState;
use axum::extract::{Path, Query, State};
use axum::Json;
use imgtag_core::models::{EndpointId, EndpointRole, StorageEndpoint, StorageProvider, TaskStatus};
use imgtag_core::storage::admin::{self, DeletionImpact, EndpointPatch};
use imgtag_core::{background, db::NewEndpoint};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// `StorageEndpoint` minus `access_key_id`/`secret_access_key` — callers
/// only ever learn whether credentials are set, never their value.
#[derive(Serialize)]
pub struct EndpointResponse {
    pub id: EndpointId,
    pub name: String,
    pub provider: &'static str,
    pub endpoint_url: Option<String>,
    pub region: String,
    pub bucket_name: String,
    pub path_style: bool,
    pub path_prefix: String,
    pub has_credentials: bool,
    pub public_url_prefix: Option<String>,
    pub role: &'static str,
    pub is_enabled: bool,
    pub is_default_upload: bool,
    pub auto_sync_enabled: bool,
    pub sync_from_endpoint_id: Option<EndpointId>,
    pub read_priority: i32,
    pub read_weight: i32,
    pub is_healthy: bool,
}

impl From<StorageEndpoint> for EndpointResponse {
    fn from(e: StorageEndpoint) -> Self {
        Self {
            id: e.id,
            name: e.name,
            provider: match e.provider {
                StorageProvider::Local => "local",
                StorageProvider::S3 => "s3",
            },
            endpoint_url: e.endpoint_url,
            region: e.region,
            bucket_name: e.bucket_name,
            path_style: e.path_style,
            path_prefix: e.path_prefix,
            has_credentials: e.access_key_id.is_some() && e.secret_access_key.is_some(),
            public_url_prefix: e.public_url_prefix,
            role: match e.role {
                EndpointRole::Primary => "primary",
                EndpointRole::Mirror => "mirror",
                EndpointRole::Backup => "backup",
            },
            is_enabled: e.is_enabled,
            is_default_upload: e.is_default_upload,
            auto_sync_enabled: e.auto_sync_enabled,
            sync_from_endpoint_id: e.sync_from_endpoint_id,
            read_priority: e.read_priority,
            read_weight: e.read_weight,
            is_healthy: e.is_healthy,
        }
    }
}

pub async fn list_endpoints(State(state): State<AppState>) -> Result<Json<Vec<EndpointResponse>>, AppError> {
    let endpoints = state.db.list_endpoints().await?;
    Ok(Json(endpoints.into_iter().map(EndpointResponse::from).collect()))
}

#[derive(Deserialize)]
pub struct CreateEndpointBody {
    pub name: String,
    pub provider: String,
    pub endpoint_url: Option<String>,
    pub region: Option<String>,
    pub bucket_name: String,
    pub path_style: Option<bool>,
    pub path_prefix: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub public_url_prefix: Option<String>,
    pub role: Option<String>,
    pub read_priority: Option<i32>,
    pub read_weight: Option<i32>,
}

pub async fn create_endpoint(
    State(state): State<AppState>,
    Json(body): Json<CreateEndpointBody>,
) -> Result<Json<EndpointResponse>, AppError> {
    let provider = match body.provider.as_str() {
        "s3" => StorageProvider::S3,
        "local" => StorageProvider::Local,
        other => return Err(AppError::BadRequest(format!("unknown provider {other}"))),
    };
    let role = match body.role.as_deref() {
        Some("mirror") => EndpointRole::Mirror,
        Some("backup") => EndpointRole::Backup,
        _ => EndpointRole::Primary,
    };

    let new = NewEndpoint {
        name: body.name,
        provider,
        endpoint_url: body.endpoint_url,
        region: body.region.unwrap_or_else(|| "auto".to_string()),
        bucket_name: body.bucket_name,
        path_style: body.path_style.unwrap_or(true),
        path_prefix: body.path_prefix.unwrap_or_default(),
        access_key_id: body.access_key_id,
        secret_access_key: body.secret_access_key,
        public_url_prefix: body.public_url_prefix,
        role,
        read_priority: body.read_priority.unwrap_or(100),
        read_weight: body.read_weight.unwrap_or(1),
    };

    let id = state.db.create_endpoint(&new).await?;
    let created = state
        .db
        .get_endpoint(id)
        .await?
        .ok_or_else(|| AppError::Core(imgtag_core::CoreError::not_found(format!("endpoint {id} not found"))))?;
    Ok(Json(created.into()))
}

pub async fn update_endpoint(
    State(state): State<AppState>,
    Path(id): Path<EndpointId>,
    Json(patch): Json<EndpointPatch>,
) -> Result<Json<EndpointResponse>, AppError> {
    let updated = admin::update_endpoint(&state.db, id, patch).await?;
    Ok(Json(updated.into()))
}

#[derive(Deserialize, Default)]
pub struct DeleteEndpointParams {
    pub force: Option<bool>,
}

pub async fn delete_endpoint(
    State(state): State<AppState>,
    Path(id): Path<EndpointId>,
    Query(params): Query<DeleteEndpointParams>,
) -> Result<axum::http::StatusCode, AppError> {
    admin::delete_endpoint(&state.db, id, params.force.unwrap_or(false)).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

pub async fn set_default_upload(
    State(state): State<AppState>,
    Path(id): Path<EndpointId>,
) -> Result<axum::http::StatusCode, AppError> {
    state.db.set_default_upload(id).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

pub async fn test_connection(
    State(state): State<AppState>,
    Path(id): Path<EndpointId>,
) -> Result<axum::http::StatusCode, AppError> {
    let endpoint = state
        .db
        .get_endpoint(id)
        .await?
        .ok_or_else(|| AppError::Core(imgtag_core::CoreError::not_found(format!("endpoint {id} not found"))))?;
    admin::test_connection(&state.storage, &endpoint).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

pub async fn deletion_impact(
    State(state): State<AppState>,
    Path(id): Path<EndpointId>,
) -> Result<Json<DeletionImpact>, AppError> {
    Ok(Json(admin::deletion_impact(&state.db, id).await?))
}

#[derive(Deserialize)]
pub struct StartSyncBody {
    pub source_endpoint_id: EndpointId,
    pub target_endpoint_id: EndpointId,
    pub image_ids: Option<Vec<i64>>,
    pub force_overwrite: Option<bool>,
}

#[derive(Serialize)]
pub struct TaskIdsResponse {
    pub task_ids: Vec<Uuid>,
}

/// Enqueues the sync batches, then spawns each one to run to completion
/// in the background — the admin surface is async, polling
/// `get_task_progress` for status.
pub async fn start_sync(
    State(state): State<AppState>,
    Json(body): Json<StartSyncBody>,
) -> Result<Json<TaskIdsResponse>, AppError> {
    let task_ids = background::sync::enqueue(
        &state.db,
        body.source_endpoint_id,
        body.target_endpoint_id,
        body.image_ids,
        body.force_overwrite.unwrap_or(false),
    )
    .await?;

    for task_id in &task_ids {
        tokio::spawn(background::run_task(state.db.clone(), state.storage.clone(), *task_id));
    }

    Ok(Json(TaskIdsResponse { task_ids }))
}

#[derive(Deserialize)]
pub struct UnlinkBody {
    pub endpoint_id: EndpointId,
    pub delete_files: Option<bool>,
}

#[derive(Serialize)]
pub struct TaskIdResponse {
    pub task_id: Uuid,
}

pub async fn start_unlink(
    State(state): State<AppState>,
    Json(body): Json<UnlinkBody>,
) -> Result<Json<TaskIdResponse>, AppError> {
    let task_id = background::unlink::enqueue(&state.db, body.endpoint_id, body.delete_files.unwrap_or(false)).await?;
    tokio::spawn(background::run_task(state.db.clone(), state.storage.clone(), task_id));
    Ok(Json(TaskIdResponse { task_id }))
}

#[derive(Deserialize)]
pub struct HardDeleteBody {
    pub endpoint_id: EndpointId,
    pub confirm: bool,
    pub confirm_name: String,
}

pub async fn start_hard_delete(
    State(state): State<AppState>,
    Json(body): Json<HardDeleteBody>,
) -> Result<Json<TaskIdResponse>, AppError> {
    let task_id =
        background::delete::enqueue(&state.db, body.endpoint_id, body.confirm, &body.confirm_name).await?;
    tokio::spawn(background::run_task(state.db.clone(), state.storage.clone(), task_id));
    Ok(Json(TaskIdResponse { task_id }))
}

/// Cancels a sync/unlink/delete task that hasn't finished. This
/// only prevents *new* per-item work from starting — any in-flight item
/// the task already spawned is allowed to complete.
pub async fn cancel_task(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
) -> Result<axum::http::StatusCode, AppError> {
    let task = state
        .db
        .get_task(task_id)
        .await?
        .ok_or_else(|| AppError::Core(imgtag_core::CoreError::not_found(format!("task {task_id} not found"))))?;
    if matches!(task.status, TaskStatus::Pending | TaskStatus::Processing) {
        state.db.update_status(task_id, TaskStatus::Cancelled, None, None).await?;
    }
    Ok(axum::http::StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
pub struct TaskResponse {
    pub id: Uuid,
    pub task_type: &'static str,
    pub status: &'static str,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

pub async fn get_task_progress(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
) -> Result<Json<TaskResponse>, AppError> {
    let task = state
        .db
        .get_task(task_id)
        .await?
        .ok_or_else(|| AppError::Core(imgtag_core::CoreError::not_found(format!("task {task_id} not found"))))?;
    Ok(Json(TaskResponse {
        id: task.id,
        task_type: task.task_type.as_str(),
        status: task.status.as_str(),
        result: task.result,
        error: task.error,
    }))
}

#[derive(Serialize)]
pub struct QueueStatusResponse {
    pub running: bool,
    pub by_type: Vec<QueueTypeStatus>,
}

#[derive(Serialize)]
pub struct QueueTypeStatus {
    pub task_type: &'static str,
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
    pub cancelled: i64,
}

pub async fn queue_status(State(state): State<AppState>) -> Result<Json<QueueStatusResponse>, AppError> {
    let rows = state.queue.status().await?;
    Ok(Json(QueueStatusResponse {
        running: state.queue.is_running(),
        by_type: rows
            .into_iter()
            .map(|(task_type, pending, processing, completed, failed, cancelled)| QueueTypeStatus {
                task_type: task_type.as_str(),
                pending,
                processing,
                completed,
                failed,
                cancelled,
            })
            .collect(),
    }))
}

pub async fn queue_start(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    let reset = state.queue.start().await?;
    Ok(Json(serde_json::json!({ "reset_stuck_tasks": reset })))
}

pub async fn queue_stop(State(state): State<AppState>) -> Result<axum::http::StatusCode, AppError> {
    state.queue.stop().await;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

pub async fn queue_clear_pending(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    let cleared = state.queue.clear_pending().await?;
    Ok(Json(serde_json::json!({ "cleared": cleared })))
}

pub async fn queue_clear_completed(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    let cleared = state.queue.clear_completed().await?;
    Ok(Json(serde_json::json!({ "cleared": cleared })))
}

pub async fn queue_retry(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
) -> Result<axum::http::StatusCode, AppError> {
    let retried = state.queue.retry(task_id).await?;
    if retried {
        Ok(axum::http::StatusCode::NO_CONTENT)
    } else {
        Ok(axum::http::StatusCode::NOT_FOUND)
    }
}
