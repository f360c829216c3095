//! Vocabulary and association management: `get_or_create`,
//! `get_categories`/`get_resolutions`, `set_image_tags`/
//! `set_image_tags_by_ids` (two deliberately-divergent diff
//! strategies — see DESIGN.md), `batch_add_tags_to_images`/
//! `batch_replace_tags_for_images`.

use super::{Database, DbError, get_timestamp};
use crate::dialect::{CurrentDialect, CurrentRow, Dialect};
use crate::models::{ImageId, ImageTagView, Tag, TagId, TagLevel, TagSource, UserId};
use sqlx::{FromRow, Row};

impl FromRow<'_, CurrentRow> for Tag {
    fn from_row(row: &CurrentRow) -> Result<Self, sqlx::Error> {
        let level: i16 = row.try_get("level")?;
        let source: String = row.try_get("source")?;

        Ok(Tag {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            level: TagLevel(level),
            source: source.parse().unwrap_or(TagSource::System),
            description: row.try_get("description")?,
            sort_order: row.try_get("sort_order")?,
            usage_count: row.try_get("usage_count")?,
            created_at: get_timestamp(row, "created_at")?,
            updated_at: get_timestamp(row, "updated_at")?,
        })
    }
}

/// Renders `count` single-column VALUES rows starting at bind index
/// `start`, e.g. `($1),($2),($3)` — the shape `batch_add_tags_to_images`
/// needs for its two `VALUES (...) AS t(id)` subqueries, distinct from
/// `placeholder_list`'s single-tuple `IN (...)` shape.
fn values_rows<D: Dialect>(start: usize, count: usize) -> String {
    (0..count)
        .map(|i| format!("({})", D::placeholder(start + i)))
        .collect::<Vec<_>>()
        .join(",")
}

impl Database {
    /// Returns the existing tag named `name` regardless of its level, or
    /// creates a new level-2 tag if none exists. Levels 0/1 are never
    /// auto-created here. Races on level-2 creation are resolved with
    /// `ON CONFLICT DO NOTHING` followed by a re-read.
    pub async fn resolve_tag(&self, name: &str, source: TagSource) -> Result<Tag, DbError> {
        if let Some(existing) = self.get_tag_by_name(name).await? {
            return Ok(existing);
        }

        let insert = format!(
            "INSERT INTO tags (name, level, source) VALUES ({}, {}, {}) ON CONFLICT (name) DO NOTHING",
            CurrentDialect::placeholder(1),
            CurrentDialect::placeholder(2),
            CurrentDialect::placeholder(3),
        );

        self.retry(|| async {
            sqlx::query(&insert)
                .bind(name)
                .bind(TagLevel::NORMAL.0)
                .bind(source.as_str())
                .execute(&self.pool)
                .await
                .map_err(|e| DbError::QueryFailed {
                    operation: "resolve_tag.insert",
                    sql: insert.clone(),
                    source: e,
                })
        })
        .await?;

        self.get_tag_by_name(name)
            .await?
            .ok_or_else(|| DbError::Invariant(format!("tag {name} missing after insert-or-get")))
    }

    pub async fn get_tag_by_name(&self, name: &str) -> Result<Option<Tag>, DbError> {
        let sql = format!(
            "SELECT * FROM tags WHERE name = {}",
            CurrentDialect::placeholder(1)
        );

        self.retry(|| async {
            sqlx::query_as(&sql)
                .bind(name)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| DbError::QueryFailed {
                    operation: "get_tag_by_name",
                    sql: sql.clone(),
                    source: e,
                })
        })
        .await
    }

    pub async fn get_tag_by_id(&self, id: TagId) -> Result<Option<Tag>, DbError> {
        let sql = format!(
            "SELECT * FROM tags WHERE id = {}",
            CurrentDialect::placeholder(1)
        );

        self.retry(|| async {
            sqlx::query_as(&sql)
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| DbError::QueryFailed {
                    operation: "get_tag_by_id",
                    sql: sql.clone(),
                    source: e,
                })
        })
        .await
    }

    pub async fn get_categories(&self) -> Result<Vec<Tag>, DbError> {
        self.get_tags_by_level(TagLevel::CATEGORY).await
    }

    pub async fn get_resolutions(&self) -> Result<Vec<Tag>, DbError> {
        self.get_tags_by_level(TagLevel::RESOLUTION).await
    }

    async fn get_tags_by_level(&self, level: TagLevel) -> Result<Vec<Tag>, DbError> {
        let sql = format!(
            "SELECT * FROM tags WHERE level = {} ORDER BY sort_order ASC",
            CurrentDialect::placeholder(1)
        );

        self.retry(|| async {
            sqlx::query_as(&sql)
                .bind(level.0)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| DbError::QueryFailed {
                    operation: "get_tags_by_level",
                    sql: sql.clone(),
                    source: e,
                })
        })
        .await
    }

    pub async fn get_tags_for_image(&self, image_id: ImageId) -> Result<Vec<ImageTagView>, DbError> {
        let sql = format!(
            "SELECT t.id AS tag_id, t.name, t.level, it.source FROM image_tags it \
             JOIN tags t ON t.id = it.tag_id WHERE it.image_id = {} ORDER BY it.sort_order ASC",
            CurrentDialect::placeholder(1)
        );

        let rows = self
            .retry(|| async {
                sqlx::query(&sql)
                    .bind(image_id)
                    .fetch_all(&self.pool)
                    .await
                    .map_err(|e| DbError::QueryFailed {
                        operation: "get_tags_for_image",
                        sql: sql.clone(),
                        source: e,
                    })
            })
            .await?;

        rows.into_iter()
            .map(|row| {
                let level: i16 = row.try_get("level").map_err(|e| DbError::QueryFailed {
                    operation: "get_tags_for_image.row",
                    sql: sql.clone(),
                    source: e,
                })?;
                let source: String = row.try_get("source").map_err(|e| DbError::QueryFailed {
                    operation: "get_tags_for_image.row",
                    sql: sql.clone(),
                    source: e,
                })?;
                Ok(ImageTagView {
                    tag_id: row.try_get("tag_id").map_err(|e| DbError::QueryFailed {
                        operation: "get_tags_for_image.row",
                        sql: sql.clone(),
                        source: e,
                    })?,
                    name: row.try_get("name").map_err(|e| DbError::QueryFailed {
                        operation: "get_tags_for_image.row",
                        sql: sql.clone(),
                        source: e,
                    })?,
                    level: TagLevel(level),
                    source: source.parse().unwrap_or(TagSource::Ai),
                })
            })
            .collect()
    }

    /// Batch-hydrates tag associations for a set of images in one query,
    /// grouped by `image_id` — the plural counterpart to
    /// `get_tags_for_image`, needed so the search planner can hydrate
    /// result-page tags without one query per row.
    pub async fn get_tags_for_images(
        &self,
        image_ids: &[ImageId],
    ) -> Result<std::collections::HashMap<ImageId, Vec<ImageTagView>>, DbError> {
        if image_ids.is_empty() {
            return Ok(Default::default());
        }

        let placeholders = crate::dialect::placeholder_list::<CurrentDialect>(1, image_ids.len());
        let sql = format!(
            "SELECT it.image_id, t.id AS tag_id, t.name, t.level, it.source FROM image_tags it \
             JOIN tags t ON t.id = it.tag_id WHERE it.image_id IN {placeholders} \
             ORDER BY it.image_id, it.sort_order ASC"
        );

        let rows = self
            .retry(|| async {
                let mut q = sqlx::query(&sql);
                for id in image_ids {
                    q = q.bind(id);
                }
                q.fetch_all(&self.pool)
                    .await
                    .map_err(|e| DbError::QueryFailed {
                        operation: "get_tags_for_images",
                        sql: sql.clone(),
                        source: e,
                    })
            })
            .await?;

        let mut by_image: std::collections::HashMap<ImageId, Vec<ImageTagView>> = Default::default();
        for row in rows {
            let image_id: ImageId = row.try_get("image_id").unwrap();
            let level: i16 = row.try_get("level").unwrap();
            let source: String = row.try_get("source").unwrap();
            by_image.entry(image_id).or_default().push(ImageTagView {
                tag_id: row.try_get("tag_id").unwrap(),
                name: row.try_get("name").unwrap(),
                level: TagLevel(level),
                source: source.parse().unwrap_or(TagSource::Ai),
            });
        }
        Ok(by_image)
    }

    /// Associates every id in `tag_ids` with every id in `image_ids` in a
    /// single statement (a cross join of the two value lists), skipping
    /// pairs that already exist. `added_by` is recorded on every new row,
    /// so the caller's ownership check must happen before this is called —
    /// this is a bulk primitive, not an authorization boundary.
    pub async fn batch_add_tags_to_images(
        &self,
        image_ids: &[ImageId],
        tag_ids: &[TagId],
        source: TagSource,
        added_by: Option<UserId>,
    ) -> Result<u64, DbError> {
        if image_ids.is_empty() || tag_ids.is_empty() {
            return Ok(0);
        }

        let image_values = values_rows::<CurrentDialect>(1, image_ids.len());
        let tag_start = image_ids.len() + 1;
        let tag_values = values_rows::<CurrentDialect>(tag_start, tag_ids.len());
        let source_ph = CurrentDialect::placeholder(tag_start + tag_ids.len());
        let added_by_ph = CurrentDialect::placeholder(tag_start + tag_ids.len() + 1);

        let sql = format!(
            "INSERT INTO image_tags (image_id, tag_id, source, added_by) \
             SELECT img.id, tg.id, {source_ph}, {added_by_ph} FROM \
             (VALUES {image_values}) AS img(id) \
             CROSS JOIN (VALUES {tag_values}) AS tg(id) \
             ON CONFLICT (image_id, tag_id) DO NOTHING"
        );

        let affected = self
            .retry(|| async {
                let mut q = sqlx::query(&sql);
                for id in image_ids {
                    q = q.bind(id);
                }
                for id in tag_ids {
                    q = q.bind(id);
                }
                q = q.bind(source.as_str()).bind(added_by);
                q.execute(&self.pool)
                    .await
                    .map_err(|e| DbError::QueryFailed {
                        operation: "batch_add_tags_to_images",
                        sql: sql.clone(),
                        source: e,
                    })
            })
            .await?;

        Ok(affected.rows_affected())
    }

    /// Replaces every level-2 association on each image in `image_ids`
    /// with `tag_ids`, in two statements (wipe, then bulk insert) rather
    /// than per-image `set_image_tags_by_ids` calls — the O(1)-round-trip
    /// batch path for multi-select tag edits.
    pub async fn batch_replace_tags_for_images(
        &self,
        image_ids: &[ImageId],
        tag_ids: &[TagId],
        source: TagSource,
        added_by: Option<UserId>,
    ) -> Result<(), DbError> {
        if image_ids.is_empty() {
            return Ok(());
        }

        let placeholders = crate::dialect::placeholder_list::<CurrentDialect>(1, image_ids.len());
        let delete_sql = format!(
            "DELETE FROM image_tags WHERE image_id IN {placeholders} AND tag_id IN \
             (SELECT id FROM tags WHERE level = 2)"
        );

        self.retry(|| async {
            let mut q = sqlx::query(&delete_sql);
            for id in image_ids {
                q = q.bind(id);
            }
            q.execute(&self.pool)
                .await
                .map_err(|e| DbError::QueryFailed {
                    operation: "batch_replace_tags_for_images.delete",
                    sql: delete_sql.clone(),
                    source: e,
                })
        })
        .await?;

        if tag_ids.is_empty() {
            return Ok(());
        }

        self.batch_add_tags_to_images(image_ids, tag_ids, source, added_by)
            .await?;
        Ok(())
    }

    /// Batch lookup of tag name → id for a set of desired names, used by
    /// `set_image_tags` to diff without one query per name.
    pub async fn get_tag_ids_by_names(
        &self,
        names: &[&str],
    ) -> Result<std::collections::HashMap<String, TagId>, DbError> {
        if names.is_empty() {
            return Ok(Default::default());
        }

        let placeholders = crate::dialect::placeholder_list::<CurrentDialect>(1, names.len());
        let sql = format!("SELECT id, name FROM tags WHERE name IN {placeholders}");

        let rows = self
            .retry(|| async {
                let mut q = sqlx::query(&sql);
                for n in names {
                    q = q.bind(n);
                }
                q.fetch_all(&self.pool)
                    .await
                    .map_err(|e| DbError::QueryFailed {
                        operation: "get_tag_ids_by_names",
                        sql: sql.clone(),
                        source: e,
                    })
            })
            .await?;

        let mut map = std::collections::HashMap::new();
        for row in rows {
            let id: TagId = row.try_get("id").unwrap();
            let name: String = row.try_get("name").unwrap();
            map.insert(name, id);
        }
        Ok(map)
    }

    pub async fn add_image_tag(
        &self,
        image_id: ImageId,
        tag_id: TagId,
        source: TagSource,
        added_by: Option<UserId>,
    ) -> Result<(), DbError> {
        let sql = format!(
            "INSERT INTO image_tags (image_id, tag_id, source, added_by) VALUES ({}, {}, {}, {}) \
             ON CONFLICT (image_id, tag_id) DO NOTHING",
            CurrentDialect::placeholder(1),
            CurrentDialect::placeholder(2),
            CurrentDialect::placeholder(3),
            CurrentDialect::placeholder(4),
        );

        self.retry(|| async {
            sqlx::query(&sql)
                .bind(image_id)
                .bind(tag_id)
                .bind(source.as_str())
                .bind(added_by)
                .execute(&self.pool)
                .await
                .map_err(|e| DbError::QueryFailed {
                    operation: "add_image_tag",
                    sql: sql.clone(),
                    source: e,
                })
        })
        .await?;

        Ok(())
    }

    pub async fn remove_image_tag(&self, image_id: ImageId, tag_id: TagId) -> Result<(), DbError> {
        let sql = format!(
            "DELETE FROM image_tags WHERE image_id = {} AND tag_id = {}",
            CurrentDialect::placeholder(1),
            CurrentDialect::placeholder(2),
        );

        self.retry(|| async {
            sqlx::query(&sql)
                .bind(image_id)
                .bind(tag_id)
                .execute(&self.pool)
                .await
                .map_err(|e| DbError::QueryFailed {
                    operation: "remove_image_tag",
                    sql: sql.clone(),
                    source: e,
                })
        })
        .await?;

        Ok(())
    }

    /// Deletes only level-2/`source='ai'` associations for an image —
    /// the name-based diff path's removal scope (`set_image_tags`).
    pub async fn remove_ai_normal_tags(&self, image_id: ImageId) -> Result<(), DbError> {
        let sql = format!(
            "DELETE FROM image_tags WHERE image_id = {} AND source = 'ai' AND tag_id IN \
             (SELECT id FROM tags WHERE level = 2)",
            CurrentDialect::placeholder(1)
        );

        self.retry(|| async {
            sqlx::query(&sql)
                .bind(image_id)
                .execute(&self.pool)
                .await
                .map_err(|e| DbError::QueryFailed {
                    operation: "remove_ai_normal_tags",
                    sql: sql.clone(),
                    source: e,
                })
        })
        .await?;

        Ok(())
    }

    /// Deletes all level-2 associations regardless of source — the
    /// id-based diff path's (intentionally wider) removal scope
    /// (`set_image_tags_by_ids`).
    pub async fn remove_all_normal_tags(&self, image_id: ImageId) -> Result<(), DbError> {
        let sql = format!(
            "DELETE FROM image_tags WHERE image_id = {} AND tag_id IN \
             (SELECT id FROM tags WHERE level = 2)",
            CurrentDialect::placeholder(1)
        );

        self.retry(|| async {
            sqlx::query(&sql)
                .bind(image_id)
                .execute(&self.pool)
                .await
                .map_err(|e| DbError::QueryFailed {
                    operation: "remove_all_normal_tags",
                    sql: sql.clone(),
                    source: e,
                })
        })
        .await?;

        Ok(())
    }

    pub async fn get_stats(&self) -> Result<Vec<(TagId, String, i64)>, DbError> {
        let sql = "SELECT id, name, usage_count FROM tags ORDER BY usage_count DESC".to_string();

        let rows = self
            .retry(|| async {
                sqlx::query(&sql)
                    .fetch_all(&self.pool)
                    .await
                    .map_err(|e| DbError::QueryFailed {
                        operation: "get_stats",
                        sql: sql.clone(),
                        source: e,
                    })
            })
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                (
                    row.try_get("id").unwrap(),
                    row.try_get("name").unwrap(),
                    row.try_get("usage_count").unwrap(),
                )
            })
            .collect())
    }

    /// Recomputes `usage_count` for every tag from the association table.
    pub async fn refresh_tag_usage_counts(&self) -> Result<(), DbError> {
        let sql = "UPDATE tags SET usage_count = ( \
             SELECT COUNT(*) FROM image_tags WHERE image_tags.tag_id = tags.id)"
            .to_string();

        self.retry(|| async {
            sqlx::query(&sql)
                .execute(&self.pool)
                .await
                .map_err(|e| DbError::QueryFailed {
                    operation: "refresh_tag_usage_counts",
                    sql: sql.clone(),
                    source: e,
                })
        })
        .await?;

        Ok(())
    }

    pub async fn query_tags(&self, query: crate::query::TagQuery) -> Result<Vec<Tag>, DbError> {
        let (where_sql, params) = query.to_sql();
        let sql = format!("SELECT * FROM tags {where_sql}");

        self.retry(|| async {
            let mut q = sqlx::query_as(&sql);
            for p in &params {
                q = q.bind(p);
            }
            q.fetch_all(&self.pool)
                .await
                .map_err(|e| DbError::QueryFailed {
                    operation: "query_tags",
                    sql: sql.clone(),
                    source: e,
                })
        })
        .await
    }
}
