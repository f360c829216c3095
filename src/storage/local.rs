//! Local filesystem backend: upload/download/exists/delete built on plain
//! `fs::create_dir_all` + `fs::read`/`fs::remove_file`.

use super::{ObjectStore, StorageError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct LocalStore {
    /// `base_dir/bucket`, the root every object key is resolved under.
    root: PathBuf,
}

impl LocalStore {
    pub fn new(base_dir: &Path, bucket: &str) -> Self {
        let bucket = if bucket.is_empty() { "uploads" } else { bucket };
        let root = if Path::new(bucket).is_absolute() {
            PathBuf::from(bucket)
        } else {
            base_dir.join(bucket)
        };
        Self { root }
    }

    fn resolve(&self, object_key: &str) -> Result<PathBuf, StorageError> {
        if object_key.contains("..") {
            return Err(StorageError::InvalidKey(object_key.to_string()));
        }
        Ok(self.root.join(object_key))
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    async fn upload(&self, object_key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let path = self.resolve(object_key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;
        Ok(())
    }

    async fn download(&self, object_key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.resolve(object_key)?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => StorageError::NotFound(object_key.to_string()),
                _ => StorageError::Io(e),
            })
    }

    async fn exists(&self, object_key: &str) -> Result<bool, StorageError> {
        let path = self.resolve(object_key)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    async fn delete(&self, object_key: &str) -> Result<(), StorageError> {
        let path = self.resolve(object_key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn roundtrips_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path(), "uploads");
        store.upload("ab/cd/hash.jpg", b"hello").await.unwrap();
        assert!(store.exists("ab/cd/hash.jpg").await.unwrap());
        assert_eq!(store.download("ab/cd/hash.jpg").await.unwrap(), b"hello");
        store.delete("ab/cd/hash.jpg").await.unwrap();
        assert!(!store.exists("ab/cd/hash.jpg").await.unwrap());
    }

    #[tokio::test]
    async fn delete_missing_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path(), "uploads");
        store.delete("missing.jpg").await.unwrap();
    }

    #[tokio::test]
    async fn rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path(), "uploads");
        let err = store.upload("../escape.jpg", b"x").await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey(_)));
    }
}
