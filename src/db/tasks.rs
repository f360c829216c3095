//! Job queue persistence: the claim query (`claim_next_task`,
//! `FOR UPDATE SKIP LOCKED` on Postgres), startup recovery
//! (`reset_stuck_tasks`), and the per-image exclusivity guard
//! (`has_pending_for_image`).

use super::{Database, DbError, get_timestamp, get_timestamp_opt};
use crate::dialect::{CurrentDialect, CurrentRow, Dialect};
use crate::models::{ImageId, Task, TaskStatus, TaskType};
use sqlx::Row;
use uuid::Uuid;

fn get_task_id(row: &CurrentRow) -> Result<Uuid, sqlx::Error> {
    #[cfg(all(feature = "postgres", not(feature = "sqlite")))]
    {
        row.try_get("id")
    }
    #[cfg(all(feature = "sqlite", not(feature = "postgres")))]
    {
        let s: String = row.try_get("id")?;
        Uuid::parse_str(&s).map_err(|e| sqlx::Error::Decode(Box::new(e)))
    }
}

fn get_json(row: &CurrentRow, col: &str) -> Result<serde_json::Value, sqlx::Error> {
    #[cfg(all(feature = "postgres", not(feature = "sqlite")))]
    {
        row.try_get(col)
    }
    #[cfg(all(feature = "sqlite", not(feature = "postgres")))]
    {
        let s: String = row.try_get(col)?;
        serde_json::from_str(&s).map_err(|e| sqlx::Error::Decode(Box::new(e)))
    }
}

fn get_json_opt(row: &CurrentRow, col: &str) -> Result<Option<serde_json::Value>, sqlx::Error> {
    #[cfg(all(feature = "postgres", not(feature = "sqlite")))]
    {
        row.try_get(col)
    }
    #[cfg(all(feature = "sqlite", not(feature = "postgres")))]
    {
        let s: Option<String> = row.try_get(col)?;
        s.map(|s| serde_json::from_str(&s).map_err(|e| sqlx::Error::Decode(Box::new(e))))
            .transpose()
    }
}

fn row_to_task(row: &CurrentRow) -> Result<Task, sqlx::Error> {
    let task_type: String = row.try_get("task_type")?;
    let status: String = row.try_get("status")?;

    Ok(Task {
        id: get_task_id(row)?,
        task_type: task_type.parse().unwrap_or(TaskType::AnalyzeImage),
        status: status.parse().unwrap_or(TaskStatus::Pending),
        payload: get_json(row, "payload")?,
        result: get_json_opt(row, "result")?,
        error: row.try_get("error")?,
        created_at: get_timestamp(row, "created_at")?,
        updated_at: get_timestamp(row, "updated_at")?,
        completed_at: get_timestamp_opt(row, "completed_at")?,
    })
}

fn bind_json(payload: &serde_json::Value) -> String {
    payload.to_string()
}

fn task_types_list(task_types: &[TaskType]) -> String {
    task_types
        .iter()
        .map(|t| format!("'{}'", t.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

impl Database {
    /// Inserts a new pending task. `payload` is stored as JSONB on Postgres
    /// and as serialized text on SQLite.
    pub async fn create_task(
        &self,
        task_type: TaskType,
        payload: &serde_json::Value,
    ) -> Result<Uuid, DbError> {
        let id = Uuid::new_v4();

        #[cfg(all(feature = "postgres", not(feature = "sqlite")))]
        let sql = format!(
            "INSERT INTO tasks (id, task_type, status, payload) VALUES ({}, {}, 'pending', {}::jsonb)",
            CurrentDialect::placeholder(1),
            CurrentDialect::placeholder(2),
            CurrentDialect::placeholder(3),
        );
        #[cfg(all(feature = "sqlite", not(feature = "postgres")))]
        let sql = format!(
            "INSERT INTO tasks (id, task_type, status, payload) VALUES ({}, {}, 'pending', {})",
            CurrentDialect::placeholder(1),
            CurrentDialect::placeholder(2),
            CurrentDialect::placeholder(3),
        );

        self.retry(|| async {
            let q = sqlx::query(&sql);
            #[cfg(all(feature = "postgres", not(feature = "sqlite")))]
            let q = q.bind(id);
            #[cfg(all(feature = "sqlite", not(feature = "postgres")))]
            let q = q.bind(id.to_string());

            q.bind(task_type.as_str())
                .bind(bind_json(payload))
                .execute(&self.pool)
                .await
                .map_err(|e| DbError::QueryFailed {
                    operation: "create_task",
                    sql: sql.clone(),
                    source: e,
                })
        })
        .await?;

        Ok(id)
    }

    pub async fn get_task(&self, id: Uuid) -> Result<Option<Task>, DbError> {
        let sql = format!(
            "SELECT * FROM tasks WHERE id = {}",
            CurrentDialect::placeholder(1)
        );

        let row = self
            .retry(|| async {
                let q = sqlx::query(&sql);
                #[cfg(all(feature = "postgres", not(feature = "sqlite")))]
                let q = q.bind(id);
                #[cfg(all(feature = "sqlite", not(feature = "postgres")))]
                let q = q.bind(id.to_string());

                q.fetch_optional(&self.pool)
                    .await
                    .map_err(|e| DbError::QueryFailed {
                        operation: "get_task",
                        sql: sql.clone(),
                        source: e,
                    })
            })
            .await?;

        row.as_ref()
            .map(row_to_task)
            .transpose()
            .map_err(|e| DbError::QueryFailed {
                operation: "get_task.decode",
                sql: sql.clone(),
                source: e,
            })
    }

    pub async fn update_status(
        &self,
        id: Uuid,
        status: TaskStatus,
        result: Option<&serde_json::Value>,
        error: Option<&str>,
    ) -> Result<(), DbError> {
        let completed_at = matches!(status, TaskStatus::Completed | TaskStatus::Failed)
            .then(|| chrono::Utc::now().to_rfc3339());

        #[cfg(all(feature = "postgres", not(feature = "sqlite")))]
        let sql = format!(
            "UPDATE tasks SET status = {}, result = {}::jsonb, error = {}, \
             completed_at = {}, updated_at = {} WHERE id = {}",
            CurrentDialect::placeholder(1),
            CurrentDialect::placeholder(2),
            CurrentDialect::placeholder(3),
            CurrentDialect::placeholder(4),
            CurrentDialect::placeholder(5),
            CurrentDialect::placeholder(6),
        );
        #[cfg(all(feature = "sqlite", not(feature = "postgres")))]
        let sql = format!(
            "UPDATE tasks SET status = {}, result = {}, error = {}, \
             completed_at = {}, updated_at = {} WHERE id = {}",
            CurrentDialect::placeholder(1),
            CurrentDialect::placeholder(2),
            CurrentDialect::placeholder(3),
            CurrentDialect::placeholder(4),
            CurrentDialect::placeholder(5),
            CurrentDialect::placeholder(6),
        );

        self.retry(|| async {
            let q = sqlx::query(&sql)
                .bind(status.as_str())
                .bind(result.map(bind_json))
                .bind(error)
                .bind(&completed_at)
                .bind(chrono::Utc::now().to_rfc3339());
            #[cfg(all(feature = "postgres", not(feature = "sqlite")))]
            let q = q.bind(id);
            #[cfg(all(feature = "sqlite", not(feature = "postgres")))]
            let q = q.bind(id.to_string());

            q.execute(&self.pool)
                .await
                .map_err(|e| DbError::QueryFailed {
                    operation: "update_status",
                    sql: sql.clone(),
                    source: e,
                })
        })
        .await?;

        Ok(())
    }

    /// Lists tasks, optionally filtered by status, newest first, with a
    /// total count for pagination.
    pub async fn get_tasks(
        &self,
        status: Option<TaskStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Task>, i64), DbError> {
        let (where_sql, bind_status) = match status {
            Some(s) => (
                format!("WHERE status = {}", CurrentDialect::placeholder(1)),
                Some(s.as_str()),
            ),
            None => (String::new(), None),
        };

        let count_sql = format!("SELECT COUNT(*) FROM tasks {where_sql}");
        let total: i64 = self
            .retry(|| async {
                let mut q = sqlx::query_scalar(&count_sql);
                if let Some(s) = bind_status {
                    q = q.bind(s);
                }
                q.fetch_one(&self.pool)
                    .await
                    .map_err(|e| DbError::QueryFailed {
                        operation: "get_tasks.count",
                        sql: count_sql.clone(),
                        source: e,
                    })
            })
            .await?;

        let (limit_idx, offset_idx) = if bind_status.is_some() { (2, 3) } else { (1, 2) };
        let list_sql = format!(
            "SELECT * FROM tasks {where_sql} ORDER BY created_at DESC LIMIT {} OFFSET {}",
            CurrentDialect::placeholder(limit_idx),
            CurrentDialect::placeholder(offset_idx),
        );

        let rows = self
            .retry(|| async {
                let mut q = sqlx::query(&list_sql);
                if let Some(s) = bind_status {
                    q = q.bind(s);
                }
                q = q.bind(limit).bind(offset);
                q.fetch_all(&self.pool)
                    .await
                    .map_err(|e| DbError::QueryFailed {
                        operation: "get_tasks.list",
                        sql: list_sql.clone(),
                        source: e,
                    })
            })
            .await?;

        let tasks = rows
            .iter()
            .map(row_to_task)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| DbError::QueryFailed {
                operation: "get_tasks.decode",
                sql: list_sql.clone(),
                source: e,
            })?;

        Ok((tasks, total))
    }

    /// Every pending or processing task, used for startup recovery before
    /// `reset_stuck_tasks` runs.
    pub async fn get_pending_and_processing(&self, limit: i64) -> Result<Vec<Task>, DbError> {
        let sql = format!(
            "SELECT * FROM tasks WHERE status IN ('pending', 'processing') \
             ORDER BY created_at ASC LIMIT {}",
            CurrentDialect::placeholder(1)
        );

        let rows = self
            .retry(|| async {
                sqlx::query(&sql)
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await
                    .map_err(|e| DbError::QueryFailed {
                        operation: "get_pending_and_processing",
                        sql: sql.clone(),
                        source: e,
                    })
            })
            .await?;

        rows.iter()
            .map(row_to_task)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| DbError::QueryFailed {
                operation: "get_pending_and_processing.decode",
                sql: sql.clone(),
                source: e,
            })
    }

    /// Any pending/processing task that targets `endpoint_id` via
    /// `payload.endpoint_id`, among the given task types — the
    /// best-effort endpoint-exclusion guard background storage tasks use
    /// before starting a sync/unlink/delete run.
    pub async fn get_active_for_endpoint(
        &self,
        endpoint_id: i64,
        task_types: &[TaskType],
    ) -> Result<Vec<Task>, DbError> {
        let types = task_types_list(task_types);

        #[cfg(all(feature = "postgres", not(feature = "sqlite")))]
        let sql = format!(
            "SELECT * FROM tasks WHERE status IN ('pending', 'processing') \
             AND task_type IN ({types}) AND (payload->>'endpoint_id')::bigint = {}",
            CurrentDialect::placeholder(1)
        );
        #[cfg(all(feature = "sqlite", not(feature = "postgres")))]
        let sql = format!(
            "SELECT * FROM tasks WHERE status IN ('pending', 'processing') \
             AND task_type IN ({types}) AND json_extract(payload, '$.endpoint_id') = {}",
            CurrentDialect::placeholder(1)
        );

        let rows = self
            .retry(|| async {
                sqlx::query(&sql)
                    .bind(endpoint_id)
                    .fetch_all(&self.pool)
                    .await
                    .map_err(|e| DbError::QueryFailed {
                        operation: "get_active_for_endpoint",
                        sql: sql.clone(),
                        source: e,
                    })
            })
            .await?;

        rows.iter()
            .map(row_to_task)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| DbError::QueryFailed {
                operation: "get_active_for_endpoint.decode",
                sql: sql.clone(),
                source: e,
            })
    }

    /// Claims the oldest pending task among `task_types` and marks it
    /// processing, atomically. Postgres uses `FOR UPDATE SKIP LOCKED` so
    /// concurrent workers never contend on the same row; SQLite has no
    /// comparable row lock, so a single `UPDATE ... RETURNING` inside a
    /// transaction is used instead, relying on SQLite's single-writer model
    /// to serialize it.
    #[cfg(all(feature = "postgres", not(feature = "sqlite")))]
    pub async fn claim_next_task(&self, task_types: &[TaskType]) -> Result<Option<Task>, DbError> {
        let types = task_types_list(task_types);

        self.retry(|| async {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| DbError::TransactionFailed { source: e })?;

            let select_sql = format!(
                "SELECT id FROM tasks WHERE status = 'pending' AND task_type IN ({types}) \
                 ORDER BY created_at ASC LIMIT 1 FOR UPDATE SKIP LOCKED"
            );
            let claimed_id: Option<Uuid> = sqlx::query_scalar(&select_sql)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| DbError::QueryFailed {
                    operation: "claim_next_task.select",
                    sql: select_sql.clone(),
                    source: e,
                })?;

            let Some(claimed_id) = claimed_id else {
                tx.commit()
                    .await
                    .map_err(|e| DbError::TransactionFailed { source: e })?;
                return Ok(None);
            };

            let update_sql =
                "UPDATE tasks SET status = 'processing', updated_at = now() WHERE id = $1 RETURNING *";
            let row = sqlx::query(update_sql)
                .bind(claimed_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| DbError::QueryFailed {
                    operation: "claim_next_task.update",
                    sql: update_sql.to_string(),
                    source: e,
                })?;

            tx.commit()
                .await
                .map_err(|e| DbError::TransactionFailed { source: e })?;

            row_to_task(&row)
                .map(Some)
                .map_err(|e| DbError::QueryFailed {
                    operation: "claim_next_task.decode",
                    sql: update_sql.to_string(),
                    source: e,
                })
        })
        .await
    }

    #[cfg(all(feature = "sqlite", not(feature = "postgres")))]
    pub async fn claim_next_task(&self, task_types: &[TaskType]) -> Result<Option<Task>, DbError> {
        let types = task_types_list(task_types);

        self.retry(|| async {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| DbError::TransactionFailed { source: e })?;

            let select_sql = format!(
                "SELECT id FROM tasks WHERE status = 'pending' AND task_type IN ({types}) \
                 ORDER BY created_at ASC LIMIT 1"
            );
            let claimed_id: Option<String> = sqlx::query_scalar(&select_sql)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| DbError::QueryFailed {
                    operation: "claim_next_task.select",
                    sql: select_sql.clone(),
                    source: e,
                })?;

            let Some(claimed_id) = claimed_id else {
                tx.commit()
                    .await
                    .map_err(|e| DbError::TransactionFailed { source: e })?;
                return Ok(None);
            };

            let update_sql = "UPDATE tasks SET status = 'processing', updated_at = ? WHERE id = ?";
            sqlx::query(update_sql)
                .bind(chrono::Utc::now().to_rfc3339())
                .bind(&claimed_id)
                .execute(&mut *tx)
                .await
                .map_err(|e| DbError::QueryFailed {
                    operation: "claim_next_task.update",
                    sql: update_sql.to_string(),
                    source: e,
                })?;

            let fetch_sql = "SELECT * FROM tasks WHERE id = ?";
            let row = sqlx::query(fetch_sql)
                .bind(&claimed_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| DbError::QueryFailed {
                    operation: "claim_next_task.fetch",
                    sql: fetch_sql.to_string(),
                    source: e,
                })?;

            tx.commit()
                .await
                .map_err(|e| DbError::TransactionFailed { source: e })?;

            row_to_task(&row)
                .map(Some)
                .map_err(|e| DbError::QueryFailed {
                    operation: "claim_next_task.decode",
                    sql: fetch_sql.to_string(),
                    source: e,
                })
        })
        .await
    }

    /// Resets any `processing` row older than `stuck_minutes` back to
    /// `pending`, run once at startup before workers claim anything.
    pub async fn reset_stuck_tasks(
        &self,
        task_types: &[TaskType],
        stuck_minutes: i64,
    ) -> Result<u64, DbError> {
        let types = task_types_list(task_types);

        #[cfg(all(feature = "postgres", not(feature = "sqlite")))]
        let sql = format!(
            "UPDATE tasks SET status = 'pending' WHERE status = 'processing' \
             AND task_type IN ({types}) AND updated_at < now() - interval '1 minute' * {}",
            CurrentDialect::placeholder(1)
        );
        #[cfg(all(feature = "sqlite", not(feature = "postgres")))]
        let sql = format!(
            "UPDATE tasks SET status = 'pending' WHERE status = 'processing' \
             AND task_type IN ({types}) AND updated_at < datetime('now', {} || ' minutes')",
            CurrentDialect::placeholder(1)
        );

        #[cfg(all(feature = "sqlite", not(feature = "postgres")))]
        let bound = format!("-{stuck_minutes}");
        #[cfg(all(feature = "postgres", not(feature = "sqlite")))]
        let bound = stuck_minutes;

        let res = self
            .retry(|| async {
                sqlx::query(&sql)
                    .bind(&bound)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| DbError::QueryFailed {
                        operation: "reset_stuck_tasks",
                        sql: sql.clone(),
                        source: e,
                    })
            })
            .await?;

        Ok(res.rows_affected())
    }

    /// True when a pending or processing task already targets `image_id`
    /// among `task_types` — the per-image exclusivity guard for
    /// `analyze_image`/`rebuild_vector`.
    pub async fn has_pending_for_image(
        &self,
        image_id: ImageId,
        task_types: &[TaskType],
    ) -> Result<bool, DbError> {
        let types = task_types_list(task_types);

        #[cfg(all(feature = "postgres", not(feature = "sqlite")))]
        let sql = format!(
            "SELECT COUNT(*) FROM tasks WHERE status IN ('pending', 'processing') \
             AND task_type IN ({types}) AND (payload->>'image_id')::bigint = {}",
            CurrentDialect::placeholder(1)
        );
        #[cfg(all(feature = "sqlite", not(feature = "postgres")))]
        let sql = format!(
            "SELECT COUNT(*) FROM tasks WHERE status IN ('pending', 'processing') \
             AND task_type IN ({types}) AND json_extract(payload, '$.image_id') = {}",
            CurrentDialect::placeholder(1)
        );

        let count: i64 = self
            .retry(|| async {
                sqlx::query_scalar(&sql)
                    .bind(image_id)
                    .fetch_one(&self.pool)
                    .await
                    .map_err(|e| DbError::QueryFailed {
                        operation: "has_pending_for_image",
                        sql: sql.clone(),
                        source: e,
                    })
            })
            .await?;

        Ok(count > 0)
    }

    pub async fn get_stats_by_type(
        &self,
        task_types: &[TaskType],
    ) -> Result<Vec<(TaskType, i64, i64, i64, i64, i64)>, DbError> {
        let types = task_types_list(task_types);
        let sql = format!(
            "SELECT task_type, \
             SUM(CASE WHEN status = 'pending' THEN 1 ELSE 0 END) AS pending, \
             SUM(CASE WHEN status = 'processing' THEN 1 ELSE 0 END) AS processing, \
             SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END) AS completed, \
             SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END) AS failed, \
             SUM(CASE WHEN status = 'cancelled' THEN 1 ELSE 0 END) AS cancelled \
             FROM tasks WHERE task_type IN ({types}) GROUP BY task_type"
        );

        let rows = self
            .retry(|| async {
                sqlx::query(&sql)
                    .fetch_all(&self.pool)
                    .await
                    .map_err(|e| DbError::QueryFailed {
                        operation: "get_stats_by_type",
                        sql: sql.clone(),
                        source: e,
                    })
            })
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let t: String = row.try_get("task_type").unwrap();
                (
                    t.parse().unwrap_or(TaskType::AnalyzeImage),
                    row.try_get("pending").unwrap_or(0),
                    row.try_get("processing").unwrap_or(0),
                    row.try_get("completed").unwrap_or(0),
                    row.try_get("failed").unwrap_or(0),
                    row.try_get("cancelled").unwrap_or(0),
                )
            })
            .collect())
    }

    pub async fn delete_by_status(&self, status: TaskStatus) -> Result<u64, DbError> {
        let sql = format!(
            "DELETE FROM tasks WHERE status = {}",
            CurrentDialect::placeholder(1)
        );

        let res = self
            .retry(|| async {
                sqlx::query(&sql)
                    .bind(status.as_str())
                    .execute(&self.pool)
                    .await
                    .map_err(|e| DbError::QueryFailed {
                        operation: "delete_by_status",
                        sql: sql.clone(),
                        source: e,
                    })
            })
            .await?;

        Ok(res.rows_affected())
    }

    pub async fn get_recent_completed(&self, limit: i64) -> Result<Vec<Task>, DbError> {
        let sql = format!(
            "SELECT * FROM tasks WHERE status = 'completed' ORDER BY completed_at DESC LIMIT {}",
            CurrentDialect::placeholder(1)
        );

        let rows = self
            .retry(|| async {
                sqlx::query(&sql)
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await
                    .map_err(|e| DbError::QueryFailed {
                        operation: "get_recent_completed",
                        sql: sql.clone(),
                        source: e,
                    })
            })
            .await?;

        rows.iter()
            .map(row_to_task)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| DbError::QueryFailed {
                operation: "get_recent_completed.decode",
                sql: sql.clone(),
                source: e,
            })
    }

    /// Deletes completed/failed/cancelled tasks older than `days`.
    pub async fn cleanup_old_tasks(&self, days: i64) -> Result<u64, DbError> {
        #[cfg(all(feature = "postgres", not(feature = "sqlite")))]
        let sql = format!(
            "DELETE FROM tasks WHERE status IN ('completed', 'failed', 'cancelled') \
             AND updated_at < now() - interval '1 day' * {}",
            CurrentDialect::placeholder(1)
        );
        #[cfg(all(feature = "sqlite", not(feature = "postgres")))]
        let sql = format!(
            "DELETE FROM tasks WHERE status IN ('completed', 'failed', 'cancelled') \
             AND updated_at < datetime('now', {} || ' days')",
            CurrentDialect::placeholder(1)
        );

        #[cfg(all(feature = "sqlite", not(feature = "postgres")))]
        let bound = format!("-{days}");
        #[cfg(all(feature = "postgres", not(feature = "sqlite")))]
        let bound = days;

        let res = self
            .retry(|| async {
                sqlx::query(&sql)
                    .bind(&bound)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| DbError::QueryFailed {
                        operation: "cleanup_old_tasks",
                        sql: sql.clone(),
                        source: e,
                    })
            })
            .await?;

        Ok(res.rows_affected())
    }

    /// Updates only `result` and `updated_at`, leaving `status` (and so
    /// `completed_at`) untouched — the periodic progress write a long
    /// background task makes while it is still `processing`.
    pub async fn checkpoint_progress(
        &self,
        id: Uuid,
        result: &serde_json::Value,
    ) -> Result<(), DbError> {
        #[cfg(all(feature = "postgres", not(feature = "sqlite")))]
        let sql = format!(
            "UPDATE tasks SET result = {}::jsonb, updated_at = {} WHERE id = {}",
            CurrentDialect::placeholder(1),
            CurrentDialect::placeholder(2),
            CurrentDialect::placeholder(3),
        );
        #[cfg(all(feature = "sqlite", not(feature = "postgres")))]
        let sql = format!(
            "UPDATE tasks SET result = {}, updated_at = {} WHERE id = {}",
            CurrentDialect::placeholder(1),
            CurrentDialect::placeholder(2),
            CurrentDialect::placeholder(3),
        );

        self.retry(|| async {
            let q = sqlx::query(&sql)
                .bind(bind_json(result))
                .bind(chrono::Utc::now().to_rfc3339());
            #[cfg(all(feature = "postgres", not(feature = "sqlite")))]
            let q = q.bind(id);
            #[cfg(all(feature = "sqlite", not(feature = "postgres")))]
            let q = q.bind(id.to_string());

            q.execute(&self.pool)
                .await
                .map_err(|e| DbError::QueryFailed {
                    operation: "checkpoint_progress",
                    sql: sql.clone(),
                    source: e,
                })
        })
        .await?;

        Ok(())
    }

    pub async fn batch_delete_tasks(&self, ids: &[Uuid]) -> Result<u64, DbError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let placeholders = crate::dialect::placeholder_list::<CurrentDialect>(1, ids.len());
        let sql = format!("DELETE FROM tasks WHERE id IN {placeholders}");

        let res = self
            .retry(|| async {
                let mut q = sqlx::query(&sql);
                for id in ids {
                    #[cfg(all(feature = "postgres", not(feature = "sqlite")))]
                    {
                        q = q.bind(id);
                    }
                    #[cfg(all(feature = "sqlite", not(feature = "postgres")))]
                    {
                        q = q.bind(id.to_string());
                    }
                }
                q.execute(&self.pool)
                    .await
                    .map_err(|e| DbError::QueryFailed {
                        operation: "batch_delete_tasks",
                        sql: sql.clone(),
                        source: e,
                    })
            })
            .await?;

        Ok(res.rows_affected())
    }
}
