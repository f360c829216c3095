//! Endpoint unlink: removes an endpoint's location
//! associations, optionally deleting the physical objects first, and — when
//! deleting files — removes any image that becomes an orphan (no locations
//! left anywhere) as a completion step.

use super::{checkpoint, ensure_endpoint_free, BackgroundError, TaskProgress};
use crate::db::Database;
use crate::models::{EndpointId, TaskType};
use crate::queue::payload::{self, StorageUnlinkPayload};
use crate::storage::StorageRegistry;
use std::sync::Arc;
use tokio::sync::Semaphore;
use uuid::Uuid;

const CONCURRENCY: usize = 8;
const CHECKPOINT_INTERVAL: u64 = 100;

pub async fn enqueue(
    db: &Database,
    endpoint_id: EndpointId,
    delete_files: bool,
) -> Result<Uuid, BackgroundError> {
    ensure_endpoint_free(db, endpoint_id).await?;
    let payload = StorageUnlinkPayload { endpoint_id, delete_files };
    Ok(db.create_task(TaskType::StorageUnlink, &payload::to_json(&payload)).await?)
}

pub async fn run(
    db: &Database,
    storage: &StorageRegistry,
    task_id: Uuid,
    payload: &StorageUnlinkPayload,
) -> Result<TaskProgress, BackgroundError> {
    let endpoint = db
        .get_endpoint(payload.endpoint_id)
        .await?
        .ok_or(BackgroundError::EndpointNotFound(payload.endpoint_id))?;

    let image_ids = db.get_image_ids_by_endpoint(payload.endpoint_id).await?;
    let locations_by_image = db.get_locations_by_image_ids(&image_ids).await?;

    // An image orphans only when the endpoint being unlinked is its last
    // location — computed before any rows are deleted.
    let orphans: Vec<_> = image_ids
        .iter()
        .copied()
        .filter(|id| locations_by_image.get(id).is_none_or(|locs| locs.len() <= 1))
        .collect();

    let mut progress = TaskProgress::new(image_ids.len() as u64);

    if payload.delete_files {
        let semaphore = Arc::new(Semaphore::new(CONCURRENCY));
        let mut handles = Vec::with_capacity(image_ids.len());

        for image_id in &image_ids {
            let Some(locs) = locations_by_image.get(image_id) else { continue };
            let Some(location) = locs.iter().find(|l| l.endpoint_id == payload.endpoint_id) else {
                continue;
            };
            let semaphore = semaphore.clone();
            let storage = storage.clone();
            let endpoint = endpoint.clone();
            let object_key = location.object_key.clone();
            let image_id = *image_id;

            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore is never closed");
                (image_id, storage.delete(&endpoint, &object_key).await)
            }));
        }

        for handle in handles {
            let (image_id, result) = handle.await.expect("unlink worker task never panics");
            match result {
                Ok(()) => progress.record_success(),
                Err(e) => progress.record_failure(image_id, e.to_string()),
            }
            checkpoint(db, task_id, &progress, CHECKPOINT_INTERVAL).await?;
        }
    } else {
        progress.success = progress.total;
    }

    db.delete_locations_by_endpoint(payload.endpoint_id).await?;

    if payload.delete_files {
        for orphan in &orphans {
            db.delete_image(*orphan).await?;
        }
    }

    progress.extra = serde_json::json!({ "orphans_deleted": if payload.delete_files { orphans.len() } else { 0 } });
    Ok(progress)
}
