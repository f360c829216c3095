//! Endpoint registry: at most one default-upload endpoint, at most one
//! backup-role endpoint, endpoint id=1 (local) undeletable.

use super::{Database, DbError, get_timestamp_opt};
use crate::dialect::{CurrentDialect, CurrentRow, Dialect};
use crate::models::{EndpointId, EndpointRole, StorageEndpoint, StorageProvider};
use sqlx::{FromRow, Row};

impl FromRow<'_, CurrentRow> for StorageEndpoint {
    fn from_row(row: &CurrentRow) -> Result<Self, sqlx::Error> {
        let provider: String = row.try_get("provider")?;
        let role: String = row.try_get("role")?;

        Ok(StorageEndpoint {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            provider: match provider.as_str() {
                "s3" => StorageProvider::S3,
                _ => StorageProvider::Local,
            },
            endpoint_url: row.try_get("endpoint_url")?,
            region: row.try_get("region")?,
            bucket_name: row.try_get("bucket_name")?,
            path_style: row.try_get("path_style")?,
            path_prefix: row.try_get("path_prefix")?,
            access_key_id: row.try_get("access_key_id")?,
            secret_access_key: row.try_get("secret_access_key")?,
            public_url_prefix: row.try_get("public_url_prefix")?,
            role: match role.as_str() {
                "mirror" => EndpointRole::Mirror,
                "backup" => EndpointRole::Backup,
                _ => EndpointRole::Primary,
            },
            is_enabled: row.try_get("is_enabled")?,
            is_default_upload: row.try_get("is_default_upload")?,
            auto_sync_enabled: row.try_get("auto_sync_enabled")?,
            sync_from_endpoint_id: row.try_get("sync_from_endpoint_id")?,
            read_priority: row.try_get("read_priority")?,
            read_weight: row.try_get("read_weight")?,
            is_healthy: row.try_get("is_healthy")?,
            last_health_check: get_timestamp_opt(row, "last_health_check")?,
            health_check_error: row.try_get("health_check_error")?,
        })
    }
}

pub struct NewEndpoint {
    pub name: String,
    pub provider: StorageProvider,
    pub endpoint_url: Option<String>,
    pub region: String,
    pub bucket_name: String,
    pub path_style: bool,
    pub path_prefix: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub public_url_prefix: Option<String>,
    pub role: EndpointRole,
    pub read_priority: i32,
    pub read_weight: i32,
}

fn role_str(role: EndpointRole) -> &'static str {
    match role {
        EndpointRole::Primary => "primary",
        EndpointRole::Mirror => "mirror",
        EndpointRole::Backup => "backup",
    }
}

fn provider_str(p: StorageProvider) -> &'static str {
    match p {
        StorageProvider::Local => "local",
        StorageProvider::S3 => "s3",
    }
}

impl Database {
    pub async fn create_endpoint(&self, new: &NewEndpoint) -> Result<EndpointId, DbError> {
        if new.role == EndpointRole::Backup && self.has_backup_endpoint().await? {
            return Err(DbError::Conflict(
                "an endpoint with role=backup already exists".to_string(),
            ));
        }

        let sql = format!(
            "INSERT INTO storage_endpoints \
             (name, provider, endpoint_url, region, bucket_name, path_style, path_prefix, \
              access_key_id, secret_access_key, public_url_prefix, role, read_priority, read_weight) \
             VALUES ({}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}) RETURNING id",
            CurrentDialect::placeholder(1),
            CurrentDialect::placeholder(2),
            CurrentDialect::placeholder(3),
            CurrentDialect::placeholder(4),
            CurrentDialect::placeholder(5),
            CurrentDialect::placeholder(6),
            CurrentDialect::placeholder(7),
            CurrentDialect::placeholder(8),
            CurrentDialect::placeholder(9),
            CurrentDialect::placeholder(10),
            CurrentDialect::placeholder(11),
            CurrentDialect::placeholder(12),
            CurrentDialect::placeholder(13),
        );

        self.retry(|| async {
            sqlx::query_scalar(&sql)
                .bind(&new.name)
                .bind(provider_str(new.provider))
                .bind(&new.endpoint_url)
                .bind(&new.region)
                .bind(&new.bucket_name)
                .bind(new.path_style)
                .bind(&new.path_prefix)
                .bind(&new.access_key_id)
                .bind(&new.secret_access_key)
                .bind(&new.public_url_prefix)
                .bind(role_str(new.role))
                .bind(new.read_priority)
                .bind(new.read_weight)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| DbError::QueryFailed {
                    operation: "create_endpoint",
                    sql: sql.clone(),
                    source: e,
                })
        })
        .await
    }

    pub async fn get_endpoint(&self, id: EndpointId) -> Result<Option<StorageEndpoint>, DbError> {
        let sql = format!(
            "SELECT * FROM storage_endpoints WHERE id = {}",
            CurrentDialect::placeholder(1)
        );

        self.retry(|| async {
            sqlx::query_as(&sql)
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| DbError::QueryFailed {
                    operation: "get_endpoint",
                    sql: sql.clone(),
                    source: e,
                })
        })
        .await
    }

    /// Resolves the `local`-provider endpoint `build_url`'s `/data/{bucket}/...`
    /// route embeds, the inverse lookup `serve_file` needs to turn that route
    /// back into an `ObjectStore`. Picks the lowest-id match if more than one
    /// local endpoint happens to share a `bucket_name` (only `name` is
    /// unique, `bucket_name` is not).
    pub async fn get_local_endpoint_by_bucket(
        &self,
        bucket_name: &str,
    ) -> Result<Option<StorageEndpoint>, DbError> {
        let sql = format!(
            "SELECT * FROM storage_endpoints WHERE provider = 'local' AND bucket_name = {} \
             ORDER BY id ASC LIMIT 1",
            CurrentDialect::placeholder(1)
        );

        self.retry(|| async {
            sqlx::query_as(&sql)
                .bind(bucket_name)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| DbError::QueryFailed {
                    operation: "get_local_endpoint_by_bucket",
                    sql: sql.clone(),
                    source: e,
                })
        })
        .await
    }

    pub async fn list_endpoints(&self) -> Result<Vec<StorageEndpoint>, DbError> {
        let sql = "SELECT * FROM storage_endpoints ORDER BY read_priority ASC, id ASC".to_string();

        self.retry(|| async {
            sqlx::query_as(&sql)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| DbError::QueryFailed {
                    operation: "list_endpoints",
                    sql: sql.clone(),
                    source: e,
                })
        })
        .await
    }

    pub async fn list_enabled_healthy_endpoints(&self) -> Result<Vec<StorageEndpoint>, DbError> {
        let sql = "SELECT * FROM storage_endpoints WHERE is_enabled = true AND is_healthy = true"
            .to_string();

        self.retry(|| async {
            sqlx::query_as(&sql)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| DbError::QueryFailed {
                    operation: "list_enabled_healthy_endpoints",
                    sql: sql.clone(),
                    source: e,
                })
        })
        .await
    }

    pub async fn has_backup_endpoint(&self) -> Result<bool, DbError> {
        let sql = "SELECT COUNT(*) FROM storage_endpoints WHERE role = 'backup'".to_string();

        let count: i64 = self
            .retry(|| async {
                sqlx::query_scalar(&sql)
                    .fetch_one(&self.pool)
                    .await
                    .map_err(|e| DbError::QueryFailed {
                        operation: "has_backup_endpoint",
                        sql: sql.clone(),
                        source: e,
                    })
            })
            .await?;

        Ok(count > 0)
    }

    /// Atomically clears `is_default_upload` on every endpoint, then sets
    /// it on `id`, inside one transaction.
    pub async fn set_default_upload(&self, id: EndpointId) -> Result<(), DbError> {
        self.retry(|| async {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| DbError::TransactionFailed { source: e })?;

            let clear = "UPDATE storage_endpoints SET is_default_upload = false";
            sqlx::query(clear)
                .execute(&mut *tx)
                .await
                .map_err(|e| DbError::QueryFailed {
                    operation: "set_default_upload.clear",
                    sql: clear.to_string(),
                    source: e,
                })?;

            let set = format!(
                "UPDATE storage_endpoints SET is_default_upload = true WHERE id = {}",
                CurrentDialect::placeholder(1)
            );
            sqlx::query(&set)
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(|e| DbError::QueryFailed {
                    operation: "set_default_upload.set",
                    sql: set.clone(),
                    source: e,
                })?;

            tx.commit()
                .await
                .map_err(|e| DbError::TransactionFailed { source: e })
        })
        .await
    }

    pub async fn get_default_upload_endpoint(&self) -> Result<Option<StorageEndpoint>, DbError> {
        let sql = "SELECT * FROM storage_endpoints WHERE is_default_upload = true LIMIT 1"
            .to_string();

        let explicit: Option<StorageEndpoint> = self
            .retry(|| async {
                sqlx::query_as(&sql)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(|e| DbError::QueryFailed {
                        operation: "get_default_upload_endpoint",
                        sql: sql.clone(),
                        source: e,
                    })
            })
            .await?;

        if explicit.is_some() {
            return Ok(explicit);
        }

        // Falls back to the first enabled endpoint, matching
        // `storage_service.py::get_default_upload_endpoint`.
        let fallback_sql =
            "SELECT * FROM storage_endpoints WHERE is_enabled = true ORDER BY id ASC LIMIT 1"
                .to_string();

        self.retry(|| async {
            sqlx::query_as(&fallback_sql)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| DbError::QueryFailed {
                    operation: "get_default_upload_endpoint.fallback",
                    sql: fallback_sql.clone(),
                    source: e,
                })
        })
        .await
    }

    /// Full-row update used by `storage::admin::update_endpoint` once it
    /// has validated the frozen-field rule; writes every mutable column.
    pub async fn update_endpoint_row(&self, endpoint: &StorageEndpoint) -> Result<(), DbError> {
        let sql = format!(
            "UPDATE storage_endpoints SET name = {}, endpoint_url = {}, region = {}, \
             bucket_name = {}, path_style = {}, path_prefix = {}, access_key_id = {}, \
             secret_access_key = {}, public_url_prefix = {}, is_enabled = {}, \
             auto_sync_enabled = {}, sync_from_endpoint_id = {}, read_priority = {}, \
             read_weight = {} WHERE id = {}",
            CurrentDialect::placeholder(1),
            CurrentDialect::placeholder(2),
            CurrentDialect::placeholder(3),
            CurrentDialect::placeholder(4),
            CurrentDialect::placeholder(5),
            CurrentDialect::placeholder(6),
            CurrentDialect::placeholder(7),
            CurrentDialect::placeholder(8),
            CurrentDialect::placeholder(9),
            CurrentDialect::placeholder(10),
            CurrentDialect::placeholder(11),
            CurrentDialect::placeholder(12),
            CurrentDialect::placeholder(13),
            CurrentDialect::placeholder(14),
            CurrentDialect::placeholder(15),
        );

        self.retry(|| async {
            sqlx::query(&sql)
                .bind(&endpoint.name)
                .bind(&endpoint.endpoint_url)
                .bind(&endpoint.region)
                .bind(&endpoint.bucket_name)
                .bind(endpoint.path_style)
                .bind(&endpoint.path_prefix)
                .bind(&endpoint.access_key_id)
                .bind(&endpoint.secret_access_key)
                .bind(&endpoint.public_url_prefix)
                .bind(endpoint.is_enabled)
                .bind(endpoint.auto_sync_enabled)
                .bind(endpoint.sync_from_endpoint_id)
                .bind(endpoint.read_priority)
                .bind(endpoint.read_weight)
                .bind(endpoint.id)
                .execute(&self.pool)
                .await
                .map_err(|e| DbError::QueryFailed {
                    operation: "update_endpoint_row",
                    sql: sql.clone(),
                    source: e,
                })
        })
        .await?;

        Ok(())
    }

    pub async fn delete_endpoint(&self, id: EndpointId) -> Result<(), DbError> {
        if id == crate::models::StorageEndpoint::LOCAL_ID {
            return Err(DbError::Invariant(
                "endpoint id=1 (local) cannot be deleted".to_string(),
            ));
        }

        let sql = format!(
            "DELETE FROM storage_endpoints WHERE id = {}",
            CurrentDialect::placeholder(1)
        );

        self.retry(|| async {
            sqlx::query(&sql)
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(|e| DbError::QueryFailed {
                    operation: "delete_endpoint",
                    sql: sql.clone(),
                    source: e,
                })
        })
        .await?;

        Ok(())
    }

    pub async fn mark_endpoint_health(
        &self,
        id: EndpointId,
        healthy: bool,
        error: Option<&str>,
    ) -> Result<(), DbError> {
        let sql = format!(
            "UPDATE storage_endpoints SET is_healthy = {}, health_check_error = {}, \
             last_health_check = {} WHERE id = {}",
            CurrentDialect::placeholder(1),
            CurrentDialect::placeholder(2),
            CurrentDialect::placeholder(3),
            CurrentDialect::placeholder(4),
        );

        self.retry(|| async {
            sqlx::query(&sql)
                .bind(healthy)
                .bind(error)
                .bind(chrono::Utc::now().to_rfc3339())
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(|e| DbError::QueryFailed {
                    operation: "mark_endpoint_health",
                    sql: sql.clone(),
                    source: e,
                })
        })
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::test_support::get_db;

    #[tokio::test]
    async fn resolves_seeded_local_endpoint_by_bucket_name() {
        let db = get_db().await;
        let found = db.get_local_endpoint_by_bucket("default").await.unwrap();
        assert_eq!(found.map(|e| e.id), Some(1));
    }

    #[tokio::test]
    async fn bucket_lookup_misses_are_none() {
        let db = get_db().await;
        assert!(db.get_local_endpoint_by_bucket("no-such-bucket").await.unwrap().is_none());
    }
}
