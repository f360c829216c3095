//! Endpoint administration surface: the update/delete/test-connection/
//! deletion-impact contracts that sit above the plain CRUD in
//! `db::endpoints` — frozen-field rules on update, a force-acknowledgement
//! flag on delete, and a "unique vs shared" deletion-impact count.

use crate::db::{Database, DbError};
use crate::models::{EndpointId, StorageEndpoint};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EndpointAdminError {
    #[error("database error: {0}")]
    Db(#[from] DbError),

    #[error("storage error: {0}")]
    Storage(#[from] super::StorageError),

    #[error("endpoint {0} not found")]
    NotFound(EndpointId),

    #[error("endpoint {0} has existing locations; bucket_name/path_prefix are frozen")]
    PathFrozen(EndpointId),

    #[error("endpoint {0} has {1} associated location(s); delete requires force=true")]
    ForceRequired(EndpointId, i64),
}

/// Patch for `PATCH /endpoints/{id}`. `bucket_name`/`path_prefix` are only
/// honored when the endpoint currently has zero locations.
#[derive(Debug, Default, Deserialize)]
pub struct EndpointPatch {
    pub name: Option<String>,
    pub endpoint_url: Option<String>,
    pub region: Option<String>,
    pub bucket_name: Option<String>,
    pub path_style: Option<bool>,
    pub path_prefix: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub public_url_prefix: Option<String>,
    pub is_enabled: Option<bool>,
    pub auto_sync_enabled: Option<bool>,
    pub sync_from_endpoint_id: Option<EndpointId>,
    pub read_priority: Option<i32>,
    pub read_weight: Option<i32>,
}

pub async fn update_endpoint(
    db: &Database,
    id: EndpointId,
    patch: EndpointPatch,
) -> Result<StorageEndpoint, EndpointAdminError> {
    let existing = db
        .get_endpoint(id)
        .await?
        .ok_or(EndpointAdminError::NotFound(id))?;

    if patch.bucket_name.is_some() || patch.path_prefix.is_some() {
        let count = db.count_locations_by_endpoint(id).await?;
        if count > 0 {
            return Err(EndpointAdminError::PathFrozen(id));
        }
    }

    let merged = StorageEndpoint {
        name: patch.name.unwrap_or(existing.name),
        endpoint_url: patch.endpoint_url.or(existing.endpoint_url),
        region: patch.region.unwrap_or(existing.region),
        bucket_name: patch.bucket_name.unwrap_or(existing.bucket_name),
        path_style: patch.path_style.unwrap_or(existing.path_style),
        path_prefix: patch.path_prefix.unwrap_or(existing.path_prefix),
        access_key_id: patch.access_key_id.or(existing.access_key_id),
        secret_access_key: patch.secret_access_key.or(existing.secret_access_key),
        public_url_prefix: patch.public_url_prefix.or(existing.public_url_prefix),
        is_enabled: patch.is_enabled.unwrap_or(existing.is_enabled),
        auto_sync_enabled: patch.auto_sync_enabled.unwrap_or(existing.auto_sync_enabled),
        sync_from_endpoint_id: patch.sync_from_endpoint_id.or(existing.sync_from_endpoint_id),
        read_priority: patch.read_priority.unwrap_or(existing.read_priority),
        read_weight: patch.read_weight.unwrap_or(existing.read_weight),
        ..existing
    };

    db.update_endpoint_row(&merged).await?;
    Ok(merged)
}

/// `force` acknowledges deleting an endpoint that still has locations —
/// callers are otherwise directed to unlink first.
pub async fn delete_endpoint(
    db: &Database,
    id: EndpointId,
    force: bool,
) -> Result<(), EndpointAdminError> {
    if !force {
        let count = db.count_locations_by_endpoint(id).await?;
        if count > 0 {
            return Err(EndpointAdminError::ForceRequired(id, count));
        }
    } else {
        db.delete_locations_by_endpoint(id).await?;
    }

    db.delete_endpoint(id).await?;
    Ok(())
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct DeletionImpact {
    /// Images whose only location is this endpoint — deleting it (with
    /// `delete_files`) removes these image rows too.
    pub unique_images: u64,
    /// Images with at least one other location — survive endpoint removal.
    pub shared_images: u64,
}

pub async fn deletion_impact(db: &Database, endpoint_id: EndpointId) -> Result<DeletionImpact, DbError> {
    let image_ids = db.get_image_ids_by_endpoint(endpoint_id).await?;
    let locations = db.get_locations_by_image_ids(&image_ids).await?;

    let mut unique_images = 0u64;
    let mut shared_images = 0u64;
    for id in &image_ids {
        match locations.get(id).map(|l| l.len()).unwrap_or(0) {
            0 | 1 => unique_images += 1,
            _ => shared_images += 1,
        }
    }

    Ok(DeletionImpact { unique_images, shared_images })
}

/// Probes that an endpoint is reachable and writable: for S3-compatible
/// backends, upload then delete a throwaway key; for local, confirm the
/// directory exists and is writable.
pub async fn test_connection(
    storage: &super::StorageRegistry,
    endpoint: &StorageEndpoint,
) -> Result<(), EndpointAdminError> {
    let probe_key = format!("__probe__/{}.txt", uuid::Uuid::new_v4());
    storage.upload(endpoint, &probe_key, b"probe").await?;
    storage.delete(endpoint, &probe_key).await?;
    Ok(())
}
