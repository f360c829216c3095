//! Persistence layer. `Database` wraps a `sqlx::Pool<Db>` behind the
//! dialect abstraction; every write path goes through `retry`, a fixed
//! 3-attempt/300ms-backoff wrapper that also covers queue claim
//! contention. Repository methods are split per entity.

mod endpoints;
mod images;
mod locations;
mod tags;
mod tasks;

use crate::dialect::Db;
use chrono::{DateTime, Utc};
use sqlx::Row;
use std::str::FromStr;
use thiserror::Error;

pub type Pool = sqlx::Pool<Db>;

#[cfg(all(feature = "sqlite", not(feature = "postgres")))]
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("migrations/sqlite");

#[cfg(all(feature = "postgres", not(feature = "sqlite")))]
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("migrations/postgres");

#[derive(Debug, Clone)]
pub struct Database {
    pub pool: Pool,
}

impl Database {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), sqlx::Error> {
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }

    /// Vector dimension migration: when the configured embedding
    /// dimension no longer matches the `images.embedding` column, drops the
    /// ivfflat index, widens/narrows the column via `ALTER COLUMN ... USING
    /// ARRAY_FILL(0, ARRAY[D])::vector(D)` (every existing embedding becomes
    /// a zero-vector of the new length rather than being rejected by the
    /// cast), then recreates the index with `vector_cosine_ops` and
    /// `lists = 100`. Callers must rebuild their `Database`/pool afterward —
    /// this only runs the DDL, it does not reconnect anything, since a
    /// connection pool has no handle back to the `Database` that owns it to
    /// invalidate in place.
    #[cfg(all(feature = "postgres", not(feature = "sqlite")))]
    pub async fn resize_embedding_dimension(&self, new_dimensions: usize) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await.map_err(|source| DbError::TransactionFailed { source })?;

        sqlx::query("DROP INDEX IF EXISTS idx_images_embedding")
            .execute(&mut *tx)
            .await
            .map_err(|e| DbError::QueryFailed {
                operation: "resize_embedding_dimension.drop_index",
                sql: "DROP INDEX IF EXISTS idx_images_embedding".to_string(),
                source: e,
            })?;

        let alter_sql = format!(
            "ALTER TABLE images ALTER COLUMN embedding TYPE vector({new_dimensions}) \
             USING ARRAY_FILL(0, ARRAY[{new_dimensions}])::vector({new_dimensions})"
        );
        sqlx::query(&alter_sql)
            .execute(&mut *tx)
            .await
            .map_err(|e| DbError::QueryFailed {
                operation: "resize_embedding_dimension.alter_column",
                sql: alter_sql.clone(),
                source: e,
            })?;

        sqlx::query(
            "CREATE INDEX idx_images_embedding ON images \
             USING ivfflat (embedding vector_cosine_ops) WITH (lists = 100)",
        )
        .execute(&mut *tx)
        .await
        .map_err(|e| DbError::QueryFailed {
            operation: "resize_embedding_dimension.create_index",
            sql: "CREATE INDEX idx_images_embedding ...".to_string(),
            source: e,
        })?;

        tx.commit().await.map_err(|source| DbError::TransactionFailed { source })?;
        Ok(())
    }

    /// Retries a fallible operation up to 3 times with a fixed 300ms
    /// backoff, if the underlying error is classified as transient.
    pub(crate) async fn retry<F, Fut, T>(&self, mut op: F) -> Result<T, DbError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, DbError>>,
    {
        let max_retries = 3;
        for attempt in 0..max_retries {
            match op().await {
                Ok(v) => return Ok(v),
                Err(ref e) if e.is_retryable() && attempt + 1 < max_retries => {
                    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
        unreachable!("retry loop returns before exceeding max_retries")
    }
}

#[derive(Debug, Error)]
pub enum DbError {
    #[error("query failed during {operation}: sql={sql} source={source}")]
    QueryFailed {
        operation: &'static str,
        sql: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("transaction failed: {source}")]
    TransactionFailed {
        #[source]
        source: sqlx::Error,
    },

    #[error("invariant violated: {0}")]
    Invariant(String),

    /// A business-rule rejection the caller can act on (second backup
    /// endpoint, deleting the local endpoint) as opposed to `Invariant`,
    /// which signals state the schema itself should have prevented.
    #[error("conflict: {0}")]
    Conflict(String),
}

impl DbError {
    pub(crate) fn is_retryable(&self) -> bool {
        let retryable = |e: &sqlx::Error| {
            matches!(e, sqlx::Error::Io(_))
                || matches!(e, sqlx::Error::Protocol(_))
                || matches!(e, sqlx::Error::PoolTimedOut)
        };

        match self {
            DbError::QueryFailed { source, .. } => retryable(source),
            DbError::TransactionFailed { source } => retryable(source),
            DbError::Invariant(_) | DbError::Conflict(_) => false,
        }
    }
}

pub(crate) fn parse_rfc3339(s: &str) -> DateTime<Utc> {
    DateTime::from_str(s)
        .unwrap_or_else(|_| DateTime::parse_from_rfc2822(s).unwrap().with_timezone(&Utc))
}

/// Reads a timestamp column that sqlx may hand back as either a native
/// `DateTime<Utc>` (Postgres) or a `TEXT` string (SQLite).
pub(crate) fn get_timestamp(
    row: &crate::dialect::CurrentRow,
    col: &str,
) -> Result<DateTime<Utc>, sqlx::Error> {
    #[cfg(all(feature = "postgres", not(feature = "sqlite")))]
    {
        row.try_get::<DateTime<Utc>, _>(col)
    }
    #[cfg(all(feature = "sqlite", not(feature = "postgres")))]
    {
        let s: String = row.try_get(col)?;
        Ok(parse_rfc3339(&s))
    }
}

pub(crate) fn get_timestamp_opt(
    row: &crate::dialect::CurrentRow,
    col: &str,
) -> Result<Option<DateTime<Utc>>, sqlx::Error> {
    #[cfg(all(feature = "postgres", not(feature = "sqlite")))]
    {
        row.try_get::<Option<DateTime<Utc>>, _>(col)
    }
    #[cfg(all(feature = "sqlite", not(feature = "postgres")))]
    {
        let s: Option<String> = row.try_get(col)?;
        Ok(s.map(|s| parse_rfc3339(&s)))
    }
}

pub use endpoints::*;
pub use images::*;
pub use locations::*;
pub use tags::*;
pub use tasks::*;
