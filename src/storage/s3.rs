//! S3-compatible backend via the `object_store` crate, covering AWS S3
//! and path-style-compatible alternatives (R2, MinIO). Grounded in
//! `_upload_s3`/`_download_s3`/`_s3_file_exists`/`_delete_s3` in
//! `storage_service.py`: same bucket/region/path-style/credential fields,
//! same object-key addressing.

use super::{ObjectStore, StorageError};
use crate::models::StorageEndpoint;
use async_trait::async_trait;
use bytes::Bytes;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore as _;
use std::sync::Arc;

#[derive(Clone)]
pub struct S3Store {
    inner: Arc<dyn object_store::ObjectStore>,
}

impl S3Store {
    pub fn from_endpoint(endpoint: &StorageEndpoint) -> Self {
        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(&endpoint.bucket_name)
            .with_virtual_hosted_style_request(!endpoint.path_style);

        if !endpoint.region.is_empty() {
            builder = builder.with_region(&endpoint.region);
        }
        if let Some(url) = endpoint.endpoint_url.as_deref() {
            builder = builder.with_endpoint(url);
        }
        if let (Some(key), Some(secret)) = (&endpoint.access_key_id, &endpoint.secret_access_key) {
            builder = builder.with_access_key_id(key).with_secret_access_key(secret);
        }

        let store = builder
            .build()
            .expect("endpoint credentials validated before construction");

        Self { inner: Arc::new(store) }
    }

    fn path(object_key: &str) -> Result<ObjectPath, StorageError> {
        ObjectPath::parse(object_key).map_err(|e| StorageError::InvalidKey(e.to_string()))
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn upload(&self, object_key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let path = Self::path(object_key)?;
        self.inner
            .put(&path, Bytes::copy_from_slice(bytes).into())
            .await?;
        Ok(())
    }

    async fn download(&self, object_key: &str) -> Result<Vec<u8>, StorageError> {
        let path = Self::path(object_key)?;
        let result = self.inner.get(&path).await.map_err(|e| match e {
            object_store::Error::NotFound { .. } => StorageError::NotFound(object_key.to_string()),
            other => StorageError::S3(other),
        })?;
        let bytes = result.bytes().await?;
        Ok(bytes.to_vec())
    }

    async fn exists(&self, object_key: &str) -> Result<bool, StorageError> {
        let path = Self::path(object_key)?;
        match self.inner.head(&path).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(StorageError::S3(e)),
        }
    }

    async fn delete(&self, object_key: &str) -> Result<(), StorageError> {
        let path = Self::path(object_key)?;
        match self.inner.delete(&path).await {
            Ok(()) => Ok(()),
            Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(StorageError::S3(e)),
        }
    }
}
