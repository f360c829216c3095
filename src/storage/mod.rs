//! Multi-endpoint storage orchestration.
//!
//! A registry of pluggable endpoints (local filesystem or S3-compatible)
//! addressed by content hash, with read fan-out and weighted endpoint
//! selection: `generate_object_key`,
//! `get_full_object_key`, `_apply_path_prefix`, `_build_url`,
//! `upload_to_endpoint`/`download_from_endpoint`, and the
//! priority-then-weight endpoint selection in `_select_by_weight`.

pub mod admin;
mod local;
mod s3;

pub use local::LocalStore;
pub use s3::S3Store;

use crate::models::{ImageLocation, StorageEndpoint, StorageProvider};
use async_trait::async_trait;
use rand::Rng;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),
    #[error("s3 error: {0}")]
    S3(#[from] object_store::Error),
    #[error("invalid object key: {0}")]
    InvalidKey(String),
    #[error("endpoint {0} has no configured credentials")]
    MissingCredentials(EndpointId),
}

use crate::models::EndpointId;

/// Per-endpoint blob operations. One implementor per `StorageProvider`.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn upload(&self, object_key: &str, bytes: &[u8]) -> Result<(), StorageError>;
    async fn download(&self, object_key: &str) -> Result<Vec<u8>, StorageError>;
    async fn exists(&self, object_key: &str) -> Result<bool, StorageError>;
    async fn delete(&self, object_key: &str) -> Result<(), StorageError>;
}

/// Derives the hash-sharded object key: `{hash[0:2]}/{hash[2:4]}/{hash}.{ext}`.
/// Pure function; the same hash always yields the same key.
pub fn derive_object_key(file_hash: &str, extension: &str) -> String {
    let ext = extension.trim_start_matches('.');
    format!(
        "{}/{}/{file_hash}.{ext}",
        &file_hash[0..2.min(file_hash.len())],
        &file_hash[2..4.min(file_hash.len())],
    )
}

/// Prefixes `object_key` with an optional category code, as a separate
/// directory segment, mirroring `get_full_object_key`.
pub fn full_object_key(object_key: &str, category_code: Option<&str>) -> String {
    match category_code {
        Some(code) if !code.is_empty() => format!("{code}/{object_key}"),
        _ => object_key.to_string(),
    }
}

/// Prepends `endpoint.path_prefix` to `object_key`, the way every actual
/// storage call (upload/download/exists/delete) and `build_url` must
/// before touching an endpoint — `object_key` as stored on
/// `ImageLocation` never includes it, since the same image can sit under
/// different prefixes on different endpoints.
pub fn apply_path_prefix(object_key: &str, path_prefix: &str) -> String {
    let trimmed = path_prefix.trim_matches('/');
    if trimmed.is_empty() {
        object_key.to_string()
    } else {
        format!("{trimmed}/{object_key}")
    }
}

/// Builds the public URL for an object under `endpoint`, following the
/// `public_url_prefix` > local-route > endpoint_url priority from
/// `_build_url`.
pub fn build_url(endpoint: &StorageEndpoint, object_key: &str) -> String {
    let bucket = if endpoint.bucket_name.is_empty() {
        "uploads"
    } else {
        &endpoint.bucket_name
    };
    let full_path = apply_path_prefix(object_key, &endpoint.path_prefix);

    if let Some(prefix) = endpoint.public_url_prefix.as_deref().filter(|p| !p.is_empty()) {
        let prefix = prefix.trim_end_matches('/');
        return match endpoint.provider {
            StorageProvider::Local => format!("{prefix}/data/{bucket}/{full_path}"),
            StorageProvider::S3 => format!("{prefix}/{bucket}/{full_path}"),
        };
    }

    match endpoint.provider {
        StorageProvider::Local => format!("/data/{bucket}/{full_path}"),
        StorageProvider::S3 => match endpoint.endpoint_url.as_deref() {
            Some(base) if !bucket.is_empty() => {
                format!("{}/{bucket}/{full_path}", base.trim_end_matches('/'))
            }
            _ => String::new(),
        },
    }
}

/// Picks a read location among `locations`, restricted to enabled+healthy
/// endpoints in `endpoint_map`, via lowest `read_priority` then a weighted
/// random choice among ties on `read_weight`. Mirrors `_select_by_weight`.
pub fn pick_read_location<'a>(
    locations: &'a [ImageLocation],
    endpoints: &[StorageEndpoint],
) -> Option<(&'a ImageLocation, &'a StorageEndpoint)> {
    let endpoint_for = |endpoint_id: EndpointId| {
        endpoints
            .iter()
            .find(|e| e.id == endpoint_id && e.is_enabled && e.is_healthy)
    };

    let mut valid: Vec<(&ImageLocation, &StorageEndpoint)> = locations
        .iter()
        .filter_map(|loc| endpoint_for(loc.endpoint_id).map(|ep| (loc, ep)))
        .collect();

    if valid.is_empty() {
        return None;
    }

    valid.sort_by_key(|(_, ep)| ep.read_priority);
    let best_priority = valid[0].1.read_priority;
    let top_tier: Vec<_> = valid
        .into_iter()
        .filter(|(_, ep)| ep.read_priority == best_priority)
        .collect();

    if top_tier.len() == 1 {
        return Some(top_tier[0]);
    }

    let weights: Vec<i32> = top_tier.iter().map(|(_, ep)| ep.read_weight.max(0)).collect();
    let total: i32 = weights.iter().sum();

    if total == 0 {
        let idx = rand::rng().random_range(0..top_tier.len());
        return Some(top_tier[idx]);
    }

    let mut pick = rand::rng().random_range(0..total);
    for (i, w) in weights.iter().enumerate() {
        if pick < *w {
            return Some(top_tier[i]);
        }
        pick -= w;
    }
    top_tier.last().copied()
}

/// Resolves a concrete `ObjectStore` implementation for an endpoint.
pub fn open_endpoint(endpoint: &StorageEndpoint, base_dir: &std::path::Path) -> Box<dyn ObjectStore> {
    match endpoint.provider {
        StorageProvider::Local => Box::new(LocalStore::new(base_dir, &endpoint.bucket_name)),
        StorageProvider::S3 => Box::new(S3Store::from_endpoint(endpoint)),
    }
}

/// Opens endpoints on demand rather than holding one long-lived client
/// per endpoint — endpoints are mutable admin-managed rows (credentials,
/// bucket, role can change), so the registry is a thin factory, not a
/// cache. `base_dir` roots every `local`-provider endpoint.
#[derive(Clone)]
pub struct StorageRegistry {
    base_dir: std::path::PathBuf,
}

impl StorageRegistry {
    pub fn new(base_dir: std::path::PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn open(&self, endpoint: &StorageEndpoint) -> Box<dyn ObjectStore> {
        open_endpoint(endpoint, &self.base_dir)
    }

    /// The object key a storage call or `build_url` should actually use:
    /// `object_key` as stored plus this endpoint's `path_prefix`.
    pub fn resolved_key(&self, endpoint: &StorageEndpoint, object_key: &str) -> String {
        apply_path_prefix(object_key, &endpoint.path_prefix)
    }

    pub async fn upload(
        &self,
        endpoint: &StorageEndpoint,
        object_key: &str,
        bytes: &[u8],
    ) -> Result<(), StorageError> {
        self.open(endpoint)
            .upload(&self.resolved_key(endpoint, object_key), bytes)
            .await
    }

    pub async fn download(
        &self,
        endpoint: &StorageEndpoint,
        object_key: &str,
    ) -> Result<Vec<u8>, StorageError> {
        self.open(endpoint)
            .download(&self.resolved_key(endpoint, object_key))
            .await
    }

    pub async fn exists(
        &self,
        endpoint: &StorageEndpoint,
        object_key: &str,
    ) -> Result<bool, StorageError> {
        self.open(endpoint)
            .exists(&self.resolved_key(endpoint, object_key))
            .await
    }

    pub async fn delete(
        &self,
        endpoint: &StorageEndpoint,
        object_key: &str,
    ) -> Result<(), StorageError> {
        self.open(endpoint)
            .delete(&self.resolved_key(endpoint, object_key))
            .await
    }

    /// Downloads from `source` and uploads to `target` under the same
    /// `object_key` (each endpoint applies its own `path_prefix`),
    /// skipping the copy when the target already has it and
    /// `force_overwrite` is false.
    pub async fn copy_between_endpoints(
        &self,
        source: &StorageEndpoint,
        target: &StorageEndpoint,
        object_key: &str,
        force_overwrite: bool,
    ) -> Result<(), StorageError> {
        if !force_overwrite && self.exists(target, object_key).await? {
            return Ok(());
        }
        let bytes = self.download(source, object_key).await?;
        self.upload(target, object_key, &bytes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_key_is_hash_sharded() {
        let key = derive_object_key("abcd1234ef567890abcd1234ef567890", "jpg");
        assert_eq!(key, "ab/cd/abcd1234ef567890abcd1234ef567890.jpg");
    }

    #[test]
    fn full_key_adds_category_prefix() {
        assert_eq!(
            full_object_key("ab/cd/hash.jpg", Some("cats")),
            "cats/ab/cd/hash.jpg"
        );
        assert_eq!(full_object_key("ab/cd/hash.jpg", None), "ab/cd/hash.jpg");
    }

    #[test]
    fn build_url_prefers_public_prefix() {
        let mut endpoint = local_endpoint();
        endpoint.public_url_prefix = Some("https://cdn.example.com".to_string());
        assert_eq!(
            build_url(&endpoint, "ab/cd/hash.jpg"),
            "https://cdn.example.com/data/uploads/ab/cd/hash.jpg"
        );
    }

    #[test]
    fn build_url_local_route_without_prefix() {
        let endpoint = local_endpoint();
        assert_eq!(build_url(&endpoint, "ab/cd/hash.jpg"), "/data/uploads/ab/cd/hash.jpg");
    }

    fn local_endpoint() -> StorageEndpoint {
        StorageEndpoint {
            id: 1,
            name: "local".to_string(),
            provider: StorageProvider::Local,
            endpoint_url: None,
            region: String::new(),
            bucket_name: "uploads".to_string(),
            path_style: true,
            path_prefix: String::new(),
            access_key_id: None,
            secret_access_key: None,
            public_url_prefix: None,
            role: crate::models::EndpointRole::Primary,
            is_enabled: true,
            is_default_upload: true,
            auto_sync_enabled: false,
            sync_from_endpoint_id: None,
            read_priority: 0,
            read_weight: 1,
            is_healthy: true,
            last_health_check: None,
            health_check_error: None,
        }
    }
}
