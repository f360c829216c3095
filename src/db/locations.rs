//! Location index: `get_by_image_ids` (batch, avoids N+1), `get_pending_sync`,
//! `mark_synced`/`mark_failed`, `count_by_image`/`count_by_endpoint`.

use super::{Database, DbError, get_timestamp, get_timestamp_opt};
use crate::dialect::{CurrentDialect, CurrentRow, Dialect};
use crate::models::{EndpointId, ImageId, ImageLocation, SyncStatus};
use sqlx::{FromRow, Row};
use std::collections::HashMap;

impl FromRow<'_, CurrentRow> for ImageLocation {
    fn from_row(row: &CurrentRow) -> Result<Self, sqlx::Error> {
        let sync_status: String = row.try_get("sync_status")?;

        Ok(ImageLocation {
            id: row.try_get("id")?,
            image_id: row.try_get("image_id")?,
            endpoint_id: row.try_get("endpoint_id")?,
            object_key: row.try_get("object_key")?,
            is_primary: row.try_get("is_primary")?,
            sync_status: match sync_status.as_str() {
                "synced" => SyncStatus::Synced,
                "failed" => SyncStatus::Failed,
                _ => SyncStatus::Pending,
            },
            sync_error: row.try_get("sync_error")?,
            synced_at: get_timestamp_opt(row, "synced_at")?,
            created_at: get_timestamp(row, "created_at")?,
        })
    }
}

fn sync_status_str(s: SyncStatus) -> &'static str {
    match s {
        SyncStatus::Pending => "pending",
        SyncStatus::Synced => "synced",
        SyncStatus::Failed => "failed",
    }
}

impl Database {
    pub async fn create_location(
        &self,
        image_id: ImageId,
        endpoint_id: EndpointId,
        object_key: &str,
        is_primary: bool,
        sync_status: SyncStatus,
    ) -> Result<i64, DbError> {
        let sql = format!(
            "INSERT INTO image_locations (image_id, endpoint_id, object_key, is_primary, sync_status, synced_at) \
             VALUES ({}, {}, {}, {}, {}, {}) RETURNING id",
            CurrentDialect::placeholder(1),
            CurrentDialect::placeholder(2),
            CurrentDialect::placeholder(3),
            CurrentDialect::placeholder(4),
            CurrentDialect::placeholder(5),
            CurrentDialect::placeholder(6),
        );

        let synced_at = matches!(sync_status, SyncStatus::Synced)
            .then(|| chrono::Utc::now().to_rfc3339());

        self.retry(|| async {
            sqlx::query_scalar(&sql)
                .bind(image_id)
                .bind(endpoint_id)
                .bind(object_key)
                .bind(is_primary)
                .bind(sync_status_str(sync_status))
                .bind(&synced_at)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| DbError::QueryFailed {
                    operation: "create_location",
                    sql: sql.clone(),
                    source: e,
                })
        })
        .await
    }

    pub async fn get_locations_by_image(
        &self,
        image_id: ImageId,
    ) -> Result<Vec<ImageLocation>, DbError> {
        let sql = format!(
            "SELECT * FROM image_locations WHERE image_id = {}",
            CurrentDialect::placeholder(1)
        );

        self.retry(|| async {
            sqlx::query_as(&sql)
                .bind(image_id)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| DbError::QueryFailed {
                    operation: "get_locations_by_image",
                    sql: sql.clone(),
                    source: e,
                })
        })
        .await
    }

    /// Batch lookup across many images in one query, grouped by image id —
    /// the Rust counterpart of `image_location_repository.get_by_image_ids`.
    pub async fn get_locations_by_image_ids(
        &self,
        image_ids: &[ImageId],
    ) -> Result<HashMap<ImageId, Vec<ImageLocation>>, DbError> {
        if image_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let placeholders = crate::dialect::placeholder_list::<CurrentDialect>(1, image_ids.len());
        let sql = format!("SELECT * FROM image_locations WHERE image_id IN {placeholders}");

        let rows: Vec<ImageLocation> = self
            .retry(|| async {
                let mut q = sqlx::query_as(&sql);
                for id in image_ids {
                    q = q.bind(id);
                }
                q.fetch_all(&self.pool)
                    .await
                    .map_err(|e| DbError::QueryFailed {
                        operation: "get_locations_by_image_ids",
                        sql: sql.clone(),
                        source: e,
                    })
            })
            .await?;

        let mut grouped: HashMap<ImageId, Vec<ImageLocation>> = HashMap::new();
        for loc in rows {
            grouped.entry(loc.image_id).or_default().push(loc);
        }
        Ok(grouped)
    }

    pub async fn get_primary_location(
        &self,
        image_id: ImageId,
    ) -> Result<Option<ImageLocation>, DbError> {
        let sql = format!(
            "SELECT * FROM image_locations WHERE image_id = {} AND is_primary = true",
            CurrentDialect::placeholder(1)
        );

        self.retry(|| async {
            sqlx::query_as(&sql)
                .bind(image_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| DbError::QueryFailed {
                    operation: "get_primary_location",
                    sql: sql.clone(),
                    source: e,
                })
        })
        .await
    }

    /// Every distinct image id with a location on `endpoint_id` — the
    /// "every image currently on the source endpoint" case `storage_sync`
    /// falls back to when no explicit `image_ids` subset is given.
    pub async fn get_image_ids_by_endpoint(
        &self,
        endpoint_id: EndpointId,
    ) -> Result<Vec<ImageId>, DbError> {
        let sql = format!(
            "SELECT DISTINCT image_id FROM image_locations WHERE endpoint_id = {}",
            CurrentDialect::placeholder(1)
        );

        self.retry(|| async {
            sqlx::query_scalar(&sql)
                .bind(endpoint_id)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| DbError::QueryFailed {
                    operation: "get_image_ids_by_endpoint",
                    sql: sql.clone(),
                    source: e,
                })
        })
        .await
    }

    pub async fn get_location_by_image_and_endpoint(
        &self,
        image_id: ImageId,
        endpoint_id: EndpointId,
    ) -> Result<Option<ImageLocation>, DbError> {
        let sql = format!(
            "SELECT * FROM image_locations WHERE image_id = {} AND endpoint_id = {}",
            CurrentDialect::placeholder(1),
            CurrentDialect::placeholder(2),
        );

        self.retry(|| async {
            sqlx::query_as(&sql)
                .bind(image_id)
                .bind(endpoint_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| DbError::QueryFailed {
                    operation: "get_location_by_image_and_endpoint",
                    sql: sql.clone(),
                    source: e,
                })
        })
        .await
    }

    /// Creates the location if the image has none yet on `endpoint_id`,
    /// otherwise marks the existing one synced — the "upsert the location
    /// with `synced_at`" step of a sync run, idempotent across retries.
    pub async fn upsert_synced_location(
        &self,
        image_id: ImageId,
        endpoint_id: EndpointId,
        object_key: &str,
    ) -> Result<(), DbError> {
        match self.get_location_by_image_and_endpoint(image_id, endpoint_id).await? {
            Some(existing) => self.mark_location_synced(existing.id).await,
            None => {
                self.create_location(image_id, endpoint_id, object_key, false, SyncStatus::Synced)
                    .await?;
                Ok(())
            }
        }
    }

    pub async fn get_pending_sync(&self, limit: i64) -> Result<Vec<ImageLocation>, DbError> {
        let sql = format!(
            "SELECT * FROM image_locations WHERE sync_status = 'pending' ORDER BY created_at ASC LIMIT {}",
            CurrentDialect::placeholder(1)
        );

        self.retry(|| async {
            sqlx::query_as(&sql)
                .bind(limit)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| DbError::QueryFailed {
                    operation: "get_pending_sync",
                    sql: sql.clone(),
                    source: e,
                })
        })
        .await
    }

    pub async fn mark_location_synced(&self, id: i64) -> Result<(), DbError> {
        let sql = format!(
            "UPDATE image_locations SET sync_status = 'synced', sync_error = NULL, synced_at = {} \
             WHERE id = {}",
            CurrentDialect::placeholder(1),
            CurrentDialect::placeholder(2),
        );

        self.retry(|| async {
            sqlx::query(&sql)
                .bind(chrono::Utc::now().to_rfc3339())
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(|e| DbError::QueryFailed {
                    operation: "mark_location_synced",
                    sql: sql.clone(),
                    source: e,
                })
        })
        .await?;

        Ok(())
    }

    pub async fn mark_location_failed(&self, id: i64, error: &str) -> Result<(), DbError> {
        let sql = format!(
            "UPDATE image_locations SET sync_status = 'failed', sync_error = {} WHERE id = {}",
            CurrentDialect::placeholder(1),
            CurrentDialect::placeholder(2),
        );

        self.retry(|| async {
            sqlx::query(&sql)
                .bind(error)
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(|e| DbError::QueryFailed {
                    operation: "mark_location_failed",
                    sql: sql.clone(),
                    source: e,
                })
        })
        .await?;

        Ok(())
    }

    pub async fn count_locations_by_image(&self, image_id: ImageId) -> Result<i64, DbError> {
        let sql = format!(
            "SELECT COUNT(*) FROM image_locations WHERE image_id = {}",
            CurrentDialect::placeholder(1)
        );

        self.retry(|| async {
            sqlx::query_scalar(&sql)
                .bind(image_id)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| DbError::QueryFailed {
                    operation: "count_locations_by_image",
                    sql: sql.clone(),
                    source: e,
                })
        })
        .await
    }

    pub async fn count_locations_by_endpoint(&self, endpoint_id: EndpointId) -> Result<i64, DbError> {
        let sql = format!(
            "SELECT COUNT(*) FROM image_locations WHERE endpoint_id = {}",
            CurrentDialect::placeholder(1)
        );

        self.retry(|| async {
            sqlx::query_scalar(&sql)
                .bind(endpoint_id)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| DbError::QueryFailed {
                    operation: "count_locations_by_endpoint",
                    sql: sql.clone(),
                    source: e,
                })
        })
        .await
    }

    /// Soft-scoped delete of every location row for an endpoint. Returns
    /// the number removed.
    pub async fn delete_locations_by_endpoint(&self, endpoint_id: EndpointId) -> Result<u64, DbError> {
        let sql = format!(
            "DELETE FROM image_locations WHERE endpoint_id = {}",
            CurrentDialect::placeholder(1)
        );

        let res = self
            .retry(|| async {
                sqlx::query(&sql)
                    .bind(endpoint_id)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| DbError::QueryFailed {
                        operation: "delete_locations_by_endpoint",
                        sql: sql.clone(),
                        source: e,
                    })
            })
            .await?;

        Ok(res.rows_affected())
    }

    /// Streams locations for an endpoint in bounded pages (default 1000),
    /// bounding memory for large fleets — the Rust counterpart of
    /// `iter_by_endpoint`'s async-generator batching.
    pub async fn iter_by_endpoint_page(
        &self,
        endpoint_id: EndpointId,
        batch_size: i64,
        offset: i64,
    ) -> Result<Vec<ImageLocation>, DbError> {
        let sql = format!(
            "SELECT * FROM image_locations WHERE endpoint_id = {} ORDER BY id ASC LIMIT {} OFFSET {}",
            CurrentDialect::placeholder(1),
            CurrentDialect::placeholder(2),
            CurrentDialect::placeholder(3),
        );

        self.retry(|| async {
            sqlx::query_as(&sql)
                .bind(endpoint_id)
                .bind(batch_size)
                .bind(offset)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| DbError::QueryFailed {
                    operation: "iter_by_endpoint_page",
                    sql: sql.clone(),
                    source: e,
                })
        })
        .await
    }
}
