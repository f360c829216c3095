//! Shared framework for long-running storage tasks: a `TaskProgress`
//! aggregate, semaphore-bounded concurrency, and periodic checkpoint writes
//! to the owning `tasks` row. `sync`/`unlink`/`delete` build their
//! specializations on top of this.

pub mod delete;
pub mod sync;
pub mod unlink;

use crate::db::{Database, DbError};
use crate::models::{EndpointId, TaskStatus, TaskType};
use crate::queue::payload;
use crate::storage::{StorageError, StorageRegistry};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum BackgroundError {
    #[error("database error: {0}")]
    Db(#[from] DbError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("endpoint {0} already has an active storage task")]
    EndpointBusy(EndpointId),

    #[error("endpoint {0} not found")]
    EndpointNotFound(EndpointId),

    #[error("hard delete requires explicit confirmation")]
    ConfirmationRequired,

    #[error("hard delete is only supported for non-local endpoints")]
    LocalEndpointNotDeletable,

    #[error("malformed task payload: {0}")]
    BadPayload(#[from] serde_json::Error),
}

/// Task types the endpoint-exclusion guard considers "active" against an
/// endpoint: a sync/unlink/delete already running on it blocks a new one.
pub const STORAGE_TASK_TYPES: [TaskType; 3] = [
    TaskType::StorageSync,
    TaskType::StorageUnlink,
    TaskType::StorageDelete,
];

/// Caps how many failures get recorded verbatim in `tasks.result`; past
/// this the count keeps growing but the list stops, so a run over a huge
/// fleet can't blow up the row.
const MAX_FAILED_ITEMS: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedItem {
    pub id: i64,
    pub error: String,
}

/// `total`/`success`/`failed`/`failed_items` are the names the API layer's
/// task-status endpoint surfaces directly; `extra` carries specialization-
/// specific fields (batch index, orphans deleted, bytes freed) without
/// widening this struct per specialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskProgress {
    pub total: u64,
    pub success: u64,
    pub failed: u64,
    pub failed_items: Vec<FailedItem>,
    pub extra: serde_json::Value,
}

impl TaskProgress {
    pub fn new(total: u64) -> Self {
        Self {
            total,
            success: 0,
            failed: 0,
            failed_items: Vec::new(),
            extra: serde_json::json!({}),
        }
    }

    pub fn record_success(&mut self) {
        self.success += 1;
    }

    pub fn record_failure(&mut self, id: i64, error: String) {
        self.failed += 1;
        if self.failed_items.len() < MAX_FAILED_ITEMS {
            self.failed_items.push(FailedItem { id, error });
        }
    }

    pub fn done(&self) -> u64 {
        self.success + self.failed
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).expect("TaskProgress always serializes")
    }
}

/// Writes `progress` to `task_id`'s row every `interval` completed items —
/// called after every item, cheap to call unconditionally since it no-ops
/// between intervals.
pub async fn checkpoint(
    db: &Database,
    task_id: Uuid,
    progress: &TaskProgress,
    interval: u64,
) -> Result<(), DbError> {
    if progress.done() % interval == 0 {
        db.checkpoint_progress(task_id, &progress.to_json()).await?;
    }
    Ok(())
}

/// Enforces the endpoint-exclusion invariant before a new sync/unlink/
/// delete task is allowed to start on `endpoint_id`.
pub async fn ensure_endpoint_free(db: &Database, endpoint_id: EndpointId) -> Result<(), BackgroundError> {
    let active = db.get_active_for_endpoint(endpoint_id, &STORAGE_TASK_TYPES).await?;
    if !active.is_empty() {
        return Err(BackgroundError::EndpointBusy(endpoint_id));
    }
    Ok(())
}

/// Runs one already-enqueued `storage_sync`/`storage_unlink`/`storage_delete`
/// task to completion and persists its final `completed`/`failed` status —
/// the admin surface's `start-sync`/`unlink-with-progress`/
/// `hard-delete-with-progress` endpoints spawn this and return the task id
/// immediately, polling `tasks` (via `get-sync-progress`) for the
/// checkpointed `TaskProgress` this writes along the way.
pub async fn run_task(db: Arc<Database>, storage: Arc<StorageRegistry>, task_id: Uuid) {
    let task = match db.get_task(task_id).await {
        Ok(Some(t)) => t,
        Ok(None) => {
            tracing::error!(%task_id, "run_task: task row vanished before it could run");
            return;
        }
        Err(e) => {
            tracing::error!(%task_id, error = %e, "run_task: failed to load task row");
            return;
        }
    };

    let result = dispatch(&db, &storage, task_id, task.task_type, &task.payload).await;

    match result {
        Ok(progress) => {
            if let Err(e) = db
                .update_status(task_id, TaskStatus::Completed, Some(&progress.to_json()), None)
                .await
            {
                tracing::error!(%task_id, error = %e, "failed to persist storage task completion");
            }
        }
        Err(e) => {
            tracing::warn!(%task_id, error = %e, "storage task failed");
            if let Err(db_err) = db
                .update_status(task_id, TaskStatus::Failed, None, Some(&e.to_string()))
                .await
            {
                tracing::error!(%task_id, error = %db_err, "failed to persist storage task failure");
            }
        }
    }
}

async fn dispatch(
    db: &Database,
    storage: &StorageRegistry,
    task_id: Uuid,
    task_type: TaskType,
    raw_payload: &serde_json::Value,
) -> Result<TaskProgress, BackgroundError> {
    if let Err(e) = db.update_status(task_id, TaskStatus::Processing, None, None).await {
        tracing::error!(%task_id, error = %e, "failed to mark storage task processing");
    }

    match task_type {
        TaskType::StorageSync => {
            let p = payload::from_json(raw_payload)?;
            sync::run_batch(db, storage, task_id, &p).await
        }
        TaskType::StorageUnlink => {
            let p = payload::from_json(raw_payload)?;
            unlink::run(db, storage, task_id, &p).await
        }
        TaskType::StorageDelete => {
            let p = payload::from_json(raw_payload)?;
            delete::run(db, storage, task_id, &p).await
        }
        other => Err(BackgroundError::Db(DbError::Invariant(format!(
            "{other:?} is not a storage background task"
        )))),
    }
}

/// Opportunistic sweep used by an auto-mirror loop: finds pending
/// `sync_status` locations and attempts each, independent of the
/// `storage_sync` task queue.
pub async fn process_pending(
    db: &Database,
    storage: &StorageRegistry,
    limit: i64,
) -> Result<TaskProgress, BackgroundError> {
    sync::process_pending(db, storage, limit).await
}
