//! Hard delete: for non-local endpoints only. Deletes
//! every physical object the endpoint's locations reference, then removes
//! the location rows. The double confirmation (boolean flag plus a literal
//! confirm string matching the endpoint name) is enforced at `enqueue` —
//! the one entry point the API layer calls — so a stray internal caller
//! can never skip it.

use super::{checkpoint, ensure_endpoint_free, BackgroundError, TaskProgress};
use crate::db::Database;
use crate::models::{EndpointId, StorageProvider, TaskType};
use crate::queue::payload::{self, StorageDeletePayload};
use crate::storage::StorageRegistry;
use std::sync::Arc;
use tokio::sync::Semaphore;
use uuid::Uuid;

const CONCURRENCY: usize = 8;
const CHECKPOINT_INTERVAL: u64 = 100;

pub async fn enqueue(
    db: &Database,
    endpoint_id: EndpointId,
    confirm: bool,
    confirm_name: &str,
) -> Result<Uuid, BackgroundError> {
    if !confirm {
        return Err(BackgroundError::ConfirmationRequired);
    }

    let endpoint = db
        .get_endpoint(endpoint_id)
        .await?
        .ok_or(BackgroundError::EndpointNotFound(endpoint_id))?;

    if endpoint.provider == StorageProvider::Local {
        return Err(BackgroundError::LocalEndpointNotDeletable);
    }
    if confirm_name != endpoint.name {
        return Err(BackgroundError::ConfirmationRequired);
    }

    ensure_endpoint_free(db, endpoint_id).await?;

    let payload = StorageDeletePayload { endpoint_id };
    Ok(db.create_task(TaskType::StorageDelete, &payload::to_json(&payload)).await?)
}

pub async fn run(
    db: &Database,
    storage: &StorageRegistry,
    task_id: Uuid,
    payload: &StorageDeletePayload,
) -> Result<TaskProgress, BackgroundError> {
    let endpoint = db
        .get_endpoint(payload.endpoint_id)
        .await?
        .ok_or(BackgroundError::EndpointNotFound(payload.endpoint_id))?;

    if endpoint.provider == StorageProvider::Local {
        return Err(BackgroundError::LocalEndpointNotDeletable);
    }

    let image_ids = db.get_image_ids_by_endpoint(payload.endpoint_id).await?;
    let locations_by_image = db.get_locations_by_image_ids(&image_ids).await?;
    let object_keys: Vec<(i64, String)> = locations_by_image
        .values()
        .flatten()
        .filter(|l| l.endpoint_id == payload.endpoint_id)
        .map(|l| (l.id, l.object_key.clone()))
        .collect();

    let mut progress = TaskProgress::new(object_keys.len() as u64);
    let semaphore = Arc::new(Semaphore::new(CONCURRENCY));
    let mut handles = Vec::with_capacity(object_keys.len());

    for (location_id, object_key) in object_keys {
        let semaphore = semaphore.clone();
        let storage = storage.clone();
        let endpoint = endpoint.clone();

        handles.push(tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore is never closed");
            (location_id, storage.delete(&endpoint, &object_key).await)
        }));
    }

    for handle in handles {
        let (location_id, result) = handle.await.expect("delete worker task never panics");
        match result {
            Ok(()) => progress.record_success(),
            Err(e) => progress.record_failure(location_id, e.to_string()),
        }
        checkpoint(db, task_id, &progress, CHECKPOINT_INTERVAL).await?;
    }

    db.delete_locations_by_endpoint(payload.endpoint_id).await?;

    Ok(progress)
}
