use super::{Database, DbError, get_timestamp};
use crate::dialect::{CurrentDialect, CurrentRow, Dialect};
use crate::models::{Image, ImageId};
use chrono::Utc;
use sqlx::{FromRow, Row};

impl FromRow<'_, CurrentRow> for Image {
    // `embedding` is deliberately not hydrated here: pgvector's wire type
    // only round-trips through the `pgvector` crate's own `FromRow`
    // support, and the sqlite schema has no such column at all. Callers
    // needing the vector fetch it explicitly via a dedicated query.
    fn from_row(row: &CurrentRow) -> Result<Self, sqlx::Error> {
        Ok(Image {
            id: row.try_get("id")?,
            file_hash: row.try_get("file_hash")?,
            file_type: row.try_get("file_type")?,
            file_size_mb: row.try_get("file_size_mb")?,
            width: row.try_get("width")?,
            height: row.try_get("height")?,
            description: row.try_get("description")?,
            embedding: None,
            original_url: row.try_get("original_url")?,
            uploaded_by: row.try_get("uploaded_by")?,
            is_public: row.try_get("is_public")?,
            created_at: get_timestamp(row, "created_at")?,
            updated_at: get_timestamp(row, "updated_at")?,
        })
    }
}

pub struct NewImage {
    pub file_hash: String,
    pub file_type: String,
    pub file_size_mb: f64,
    pub width: i32,
    pub height: i32,
    pub original_url: Option<String>,
    pub uploaded_by: Option<i64>,
    pub is_public: bool,
}

impl Database {
    pub async fn insert_image(&self, new: &NewImage) -> Result<ImageId, DbError> {
        let sql = format!(
            "INSERT INTO images (file_hash, file_type, file_size_mb, width, height, \
             original_url, uploaded_by, is_public) VALUES ({}, {}, {}, {}, {}, {}, {}, {}) \
             RETURNING id",
            CurrentDialect::placeholder(1),
            CurrentDialect::placeholder(2),
            CurrentDialect::placeholder(3),
            CurrentDialect::placeholder(4),
            CurrentDialect::placeholder(5),
            CurrentDialect::placeholder(6),
            CurrentDialect::placeholder(7),
            CurrentDialect::placeholder(8),
        );

        self.retry(|| async {
            sqlx::query_scalar(&sql)
                .bind(&new.file_hash)
                .bind(&new.file_type)
                .bind(new.file_size_mb)
                .bind(new.width)
                .bind(new.height)
                .bind(&new.original_url)
                .bind(new.uploaded_by)
                .bind(new.is_public)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| DbError::QueryFailed {
                    operation: "insert_image",
                    sql: sql.clone(),
                    source: e,
                })
        })
        .await
    }

    pub async fn get_image(&self, id: ImageId) -> Result<Option<Image>, DbError> {
        let sql = format!(
            "SELECT * FROM images WHERE id = {}",
            CurrentDialect::placeholder(1)
        );

        self.retry(|| async {
            sqlx::query_as(&sql)
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| DbError::QueryFailed {
                    operation: "get_image",
                    sql: sql.clone(),
                    source: e,
                })
        })
        .await
    }

    /// Batch-hydrates images by id in a single query, avoiding the N+1
    /// pattern the search planner and location index both need to avoid.
    pub async fn get_images_by_ids(&self, ids: &[ImageId]) -> Result<Vec<Image>, DbError> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        let placeholders = crate::dialect::placeholder_list::<CurrentDialect>(1, ids.len());
        let sql = format!("SELECT * FROM images WHERE id IN {placeholders}");

        self.retry(|| async {
            let mut q = sqlx::query_as(&sql);
            for id in ids {
                q = q.bind(id);
            }
            q.fetch_all(&self.pool)
                .await
                .map_err(|e| DbError::QueryFailed {
                    operation: "get_images_by_ids",
                    sql: sql.clone(),
                    source: e,
                })
        })
        .await
    }

    pub async fn update_description(
        &self,
        id: ImageId,
        description: &str,
    ) -> Result<(), DbError> {
        let sql = format!(
            "UPDATE images SET description = {}, updated_at = {} WHERE id = {}",
            CurrentDialect::placeholder(1),
            CurrentDialect::placeholder(2),
            CurrentDialect::placeholder(3),
        );

        self.retry(|| async {
            sqlx::query(&sql)
                .bind(description)
                .bind(Utc::now().to_rfc3339())
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(|e| DbError::QueryFailed {
                    operation: "update_description",
                    sql: sql.clone(),
                    source: e,
                })
        })
        .await?;

        Ok(())
    }

    /// Persists an embedding vector as a native `vector` column. Used
    /// whenever the `postgres` feature is enabled — vector search itself
    /// still requires it, but this write path is exercised regardless of
    /// whether `sqlite` is also compiled in.
    #[cfg(feature = "postgres")]
    pub async fn update_embedding(
        &self,
        id: ImageId,
        embedding: &[f32],
    ) -> Result<(), DbError> {
        let sql = format!(
            "UPDATE images SET embedding = {}, updated_at = {} WHERE id = {}",
            CurrentDialect::placeholder(1),
            CurrentDialect::placeholder(2),
            CurrentDialect::placeholder(3),
        );

        self.retry(|| async {
            sqlx::query(&sql)
                .bind(pgvector::Vector::from(embedding.to_vec()))
                .bind(Utc::now().to_rfc3339())
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(|e| DbError::QueryFailed {
                    operation: "update_embedding",
                    sql: sql.clone(),
                    source: e,
                })
        })
        .await?;

        Ok(())
    }

    /// Persists an embedding vector as a JSON-encoded `TEXT` column — the
    /// sqlite schema has no native vector type, so `rebuild_vector`/
    /// `analyze_image` task bodies still have somewhere to write under the
    /// default feature set. Never used for scoring: `Dialect::supports_vector_search`
    /// is false for sqlite, so search falls back to tag/filter scoring only.
    #[cfg(not(feature = "postgres"))]
    pub async fn update_embedding(
        &self,
        id: ImageId,
        embedding: &[f32],
    ) -> Result<(), DbError> {
        let sql = format!(
            "UPDATE images SET embedding = {}, updated_at = {} WHERE id = {}",
            CurrentDialect::placeholder(1),
            CurrentDialect::placeholder(2),
            CurrentDialect::placeholder(3),
        );

        let encoded = serde_json::to_string(embedding).expect("f32 vec always serializes");

        self.retry(|| async {
            sqlx::query(&sql)
                .bind(&encoded)
                .bind(Utc::now().to_rfc3339())
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(|e| DbError::QueryFailed {
                    operation: "update_embedding",
                    sql: sql.clone(),
                    source: e,
                })
        })
        .await?;

        Ok(())
    }

    pub async fn update_is_public(&self, id: ImageId, is_public: bool) -> Result<(), DbError> {
        let sql = format!(
            "UPDATE images SET is_public = {}, updated_at = {} WHERE id = {}",
            CurrentDialect::placeholder(1),
            CurrentDialect::placeholder(2),
            CurrentDialect::placeholder(3),
        );

        self.retry(|| async {
            sqlx::query(&sql)
                .bind(is_public)
                .bind(Utc::now().to_rfc3339())
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(|e| DbError::QueryFailed {
                    operation: "update_is_public",
                    sql: sql.clone(),
                    source: e,
                })
        })
        .await?;

        Ok(())
    }

    pub async fn delete_image(&self, id: ImageId) -> Result<(), DbError> {
        let sql = format!(
            "DELETE FROM images WHERE id = {}",
            CurrentDialect::placeholder(1)
        );

        self.retry(|| async {
            sqlx::query(&sql)
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(|e| DbError::QueryFailed {
                    operation: "delete_image",
                    sql: sql.clone(),
                    source: e,
                })
        })
        .await?;

        Ok(())
    }

    /// True when more than one image row shares `file_hash` — used by the
    /// duplicates-only search filter.
    pub async fn has_duplicate_hash(&self, file_hash: &str) -> Result<bool, DbError> {
        let sql = format!(
            "SELECT COUNT(*) FROM images WHERE file_hash = {}",
            CurrentDialect::placeholder(1)
        );

        let count: i64 = self
            .retry(|| async {
                sqlx::query_scalar(&sql)
                    .bind(file_hash)
                    .fetch_one(&self.pool)
                    .await
                    .map_err(|e| DbError::QueryFailed {
                        operation: "has_duplicate_hash",
                        sql: sql.clone(),
                        source: e,
                    })
            })
            .await?;

        Ok(count > 1)
    }
}
