//! Endpoint-to-endpoint sync: copies each image's object across endpoints
//! one at a time, plus an opportunistic sweep over locations already
//! marked pending-sync that the auto-mirror loop leaves behind.

use super::{checkpoint, ensure_endpoint_free, BackgroundError, TaskProgress};
use crate::db::Database;
use crate::models::{EndpointId, ImageId, StorageEndpoint, TaskType};
use crate::queue::payload::{self, StorageSyncPayload};
use crate::storage::StorageRegistry;
use std::sync::Arc;
use tokio::sync::Semaphore;
use uuid::Uuid;

/// Sub-task size: a sync over N images enqueues `ceil(N / BATCH_SIZE)`
/// `storage_sync` tasks rather than one, so the UI can show per-batch
/// progress and a worker failure only loses one batch's work.
pub const BATCH_SIZE: usize = 500;
const CONCURRENCY: usize = 8;
const CHECKPOINT_INTERVAL: u64 = 100;

/// Splits `image_ids` (or every image currently on the source endpoint,
/// when `None`) into `BATCH_SIZE` chunks and enqueues one `storage_sync`
/// task per chunk.
pub async fn enqueue(
    db: &Database,
    source_endpoint_id: EndpointId,
    target_endpoint_id: EndpointId,
    image_ids: Option<Vec<ImageId>>,
    force_overwrite: bool,
) -> Result<Vec<Uuid>, BackgroundError> {
    ensure_endpoint_free(db, target_endpoint_id).await?;

    let image_ids = match image_ids {
        Some(ids) => ids,
        None => db.get_image_ids_by_endpoint(source_endpoint_id).await?,
    };

    let chunks: Vec<Vec<ImageId>> = if image_ids.is_empty() {
        vec![Vec::new()]
    } else {
        image_ids.chunks(BATCH_SIZE).map(|c| c.to_vec()).collect()
    };
    let total_batches = chunks.len() as u32;
    let mut task_ids = Vec::with_capacity(chunks.len());

    for (i, chunk) in chunks.into_iter().enumerate() {
        let payload = StorageSyncPayload {
            source_endpoint_id,
            target_endpoint_id,
            image_ids: Some(chunk),
            force_overwrite,
            batch_index: i as u32,
            total_batches,
        };
        task_ids.push(
            db.create_task(TaskType::StorageSync, &payload::to_json(&payload))
                .await?,
        );
    }

    Ok(task_ids)
}

/// Runs one `storage_sync` batch to completion: for each image, copies the
/// source endpoint's object to the target (skipping when the target
/// already has it and `force_overwrite` is false) and upserts the target
/// location. Checkpoints progress every `CHECKPOINT_INTERVAL` images.
pub async fn run_batch(
    db: &Database,
    storage: &StorageRegistry,
    task_id: Uuid,
    payload: &StorageSyncPayload,
) -> Result<TaskProgress, BackgroundError> {
    let source = db
        .get_endpoint(payload.source_endpoint_id)
        .await?
        .ok_or(BackgroundError::EndpointNotFound(payload.source_endpoint_id))?;
    let target = db
        .get_endpoint(payload.target_endpoint_id)
        .await?
        .ok_or(BackgroundError::EndpointNotFound(payload.target_endpoint_id))?;

    let image_ids = payload.image_ids.clone().unwrap_or_default();
    let mut progress = TaskProgress::new(image_ids.len() as u64);
    progress.extra = serde_json::json!({
        "batch_index": payload.batch_index,
        "total_batches": payload.total_batches,
    });

    let semaphore = Arc::new(Semaphore::new(CONCURRENCY));
    let mut handles = Vec::with_capacity(image_ids.len());

    for image_id in image_ids {
        let semaphore = semaphore.clone();
        let db = db.clone();
        let storage = storage.clone();
        let source = source.clone();
        let target = target.clone();
        let force_overwrite = payload.force_overwrite;

        handles.push(tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore is never closed");
            let result = sync_one(&db, &storage, &source, &target, image_id, force_overwrite).await;
            (image_id, result)
        }));
    }

    for handle in handles {
        let (image_id, result) = handle.await.expect("sync worker task never panics");
        match result {
            Ok(()) => progress.record_success(),
            Err(e) => progress.record_failure(image_id, e.to_string()),
        }
        checkpoint(db, task_id, &progress, CHECKPOINT_INTERVAL).await?;
    }

    Ok(progress)
}

async fn sync_one(
    db: &Database,
    storage: &StorageRegistry,
    source: &StorageEndpoint,
    target: &StorageEndpoint,
    image_id: ImageId,
    force_overwrite: bool,
) -> Result<(), BackgroundError> {
    let location = db
        .get_location_by_image_and_endpoint(image_id, source.id)
        .await?
        .ok_or_else(|| BackgroundError::EndpointNotFound(source.id))?;

    if !force_overwrite && storage.exists(target, &location.object_key).await? {
        db.upsert_synced_location(image_id, target.id, &location.object_key).await?;
        return Ok(());
    }

    storage.copy_between_endpoints(source, target, &location.object_key, force_overwrite).await?;
    db.upsert_synced_location(image_id, target.id, &location.object_key).await?;
    Ok(())
}

/// The opportunistic "process pending locations" pass the auto-mirror loop
/// runs: finds `sync_status='pending'` rows and attempts each, marking
/// success/failure individually rather than failing the whole sweep.
pub async fn process_pending(db: &Database, storage: &StorageRegistry, limit: i64) -> Result<TaskProgress, BackgroundError> {
    let pending = db.get_pending_sync(limit).await?;
    let endpoints = db.list_endpoints().await?;
    let mut progress = TaskProgress::new(pending.len() as u64);

    for location in pending {
        let Some(endpoint) = endpoints.iter().find(|e| e.id == location.endpoint_id) else {
            progress.record_failure(location.id, format!("endpoint {} missing", location.endpoint_id));
            continue;
        };

        let outcome = sync_into(db, storage, endpoint, &location.object_key, location.image_id).await;
        match outcome {
            Ok(()) => {
                db.mark_location_synced(location.id).await?;
                progress.record_success();
            }
            Err(e) => {
                db.mark_location_failed(location.id, &e.to_string()).await?;
                progress.record_failure(location.id, e.to_string());
            }
        }
    }

    Ok(progress)
}

async fn sync_into(
    db: &Database,
    storage: &StorageRegistry,
    endpoint: &StorageEndpoint,
    object_key: &str,
    image_id: ImageId,
) -> Result<(), BackgroundError> {
    if storage.exists(endpoint, object_key).await? {
        return Ok(());
    }

    let other_locations = db.get_locations_by_image(image_id).await?;
    let endpoints = db.list_enabled_healthy_endpoints().await?;
    let source = other_locations
        .iter()
        .filter(|l| l.endpoint_id != endpoint.id && l.sync_status == crate::models::SyncStatus::Synced)
        .find_map(|l| endpoints.iter().find(|e| e.id == l.endpoint_id))
        .ok_or_else(|| BackgroundError::EndpointNotFound(endpoint.id))?;

    let bytes = storage.download(source, object_key).await?;
    storage.upload(endpoint, object_key, &bytes).await?;
    Ok(())
}
