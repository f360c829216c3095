//! Hybrid search planner: structured filters plus, when the backend
//! supports it, a vector/tag-equality blended score. Built on a composable
//! boolean-expression filter builder extended with score terms, and a
//! batched-hydration step that issues one query per auxiliary dataset
//! (tags, locations) over the whole result page rather than per row.

use crate::db::{Database, DbError};
use crate::dialect::{CurrentDialect, Dialect};
use crate::embedding::{EmbeddingAdapter, EmbeddingError};
use crate::models::{Image, ImageId, ImageLocation, ImageTagView, TagId, UserId};
use sqlx::Row;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("database error: {0}")]
    Db(#[from] DbError),

    #[error("embedding adapter error: {0}")]
    Embedding(#[from] EmbeddingError),
}

/// One page of search input. `text` drives the hybrid vector + tag-equality
/// score; `tags` is an AND filter over tag names; `keyword` matches the
/// description or any tag name as a substring.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub text: Option<String>,
    pub tags: Vec<String>,
    pub keyword: Option<String>,
    pub category_id: Option<TagId>,
    pub resolution_id: Option<TagId>,
    pub user_id: Option<UserId>,
    pub visible_to_user_id: Option<UserId>,
    pub admin_skip_visibility: bool,
    pub pending_only: bool,
    pub duplicates_only: bool,
    pub limit: u32,
    pub offset: u32,
    pub vector_weight: f32,
    pub tag_weight: f32,
    pub threshold: f32,
}

impl Default for SearchRequest {
    fn default() -> Self {
        Self {
            text: None,
            tags: Vec::new(),
            keyword: None,
            category_id: None,
            resolution_id: None,
            user_id: None,
            visible_to_user_id: None,
            admin_skip_visibility: false,
            pending_only: false,
            duplicates_only: false,
            limit: 50,
            offset: 0,
            vector_weight: 0.7,
            tag_weight: 0.3,
            threshold: 0.2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub image: Image,
    pub tags: Vec<ImageTagView>,
    pub locations: Vec<ImageLocation>,
    pub score: Option<f32>,
}

#[derive(Debug, Clone)]
pub struct SearchResult {
    pub hits: Vec<SearchHit>,
    pub total: u64,
}

pub async fn search(
    db: &Database,
    embedder: &dyn EmbeddingAdapter,
    req: &SearchRequest,
) -> Result<SearchResult, SearchError> {
    let (filters, params) = build_filters(req);
    let where_sql = if filters.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", filters.join(" AND "))
    };

    if let Some(text) = &req.text {
        if CurrentDialect::supports_vector_search() {
            #[cfg(feature = "postgres")]
            {
                let query_vector = embedder.embed_text(text).await?;
                return hybrid_search(db, req, text, &where_sql, &params, &query_vector).await;
            }
            #[cfg(not(feature = "postgres"))]
            {
                let _ = embedder;
                unreachable!("supports_vector_search() is false whenever the postgres feature is off");
            }
        }
        return tag_boost_search(db, req, text, &where_sql, &params).await;
    }

    plain_search(db, req, &where_sql, &params).await
}

/// Structured (non-scoring) filters shared by all three search paths:
/// tag AND-filter, category/resolution, ownership, visibility, pending,
/// duplicates, keyword.
fn build_filters(req: &SearchRequest) -> (Vec<String>, Vec<String>) {
    let mut filters = Vec::new();
    let mut params: Vec<String> = Vec::new();

    if !req.tags.is_empty() {
        let start = params.len() + 1;
        params.extend(req.tags.iter().cloned());
        let in_list = crate::dialect::placeholder_list::<CurrentDialect>(start, req.tags.len());
        filters.push(format!(
            "images.id IN (SELECT it.image_id FROM image_tags it JOIN tags t ON t.id = it.tag_id \
             WHERE t.name IN {in_list} GROUP BY it.image_id HAVING COUNT(DISTINCT it.tag_id) = {})",
            req.tags.len()
        ));
    }

    if let Some(category_id) = req.category_id {
        params.push(category_id.to_string());
        filters.push(format!(
            "EXISTS (SELECT 1 FROM image_tags it WHERE it.image_id = images.id AND it.tag_id = {})",
            CurrentDialect::placeholder(params.len())
        ));
    }

    if let Some(resolution_id) = req.resolution_id {
        params.push(resolution_id.to_string());
        filters.push(format!(
            "EXISTS (SELECT 1 FROM image_tags it WHERE it.image_id = images.id AND it.tag_id = {})",
            CurrentDialect::placeholder(params.len())
        ));
    }

    if let Some(user_id) = req.user_id {
        params.push(user_id.to_string());
        filters.push(format!(
            "images.uploaded_by = {}",
            CurrentDialect::placeholder(params.len())
        ));
    }

    if !req.admin_skip_visibility {
        match req.visible_to_user_id {
            Some(v) => {
                params.push(v.to_string());
                filters.push(format!(
                    "(images.is_public = true OR images.uploaded_by = {})",
                    CurrentDialect::placeholder(params.len())
                ));
            }
            None => filters.push("images.is_public = true".to_string()),
        }
    }

    if req.pending_only {
        filters.push("(images.description IS NULL OR images.description = '')".to_string());
    }

    if req.duplicates_only {
        filters.push(
            "images.file_hash IN (SELECT file_hash FROM images WHERE file_hash IS NOT NULL \
             GROUP BY file_hash HAVING COUNT(*) > 1)"
                .to_string(),
        );
    }

    if let Some(keyword) = &req.keyword {
        params.push(format!("%{keyword}%"));
        let desc_ph = CurrentDialect::placeholder(params.len());
        params.push(format!("%{keyword}%"));
        let tag_ph = CurrentDialect::placeholder(params.len());
        filters.push(format!(
            "(images.description LIKE {desc_ph} OR EXISTS (SELECT 1 FROM image_tags it \
             JOIN tags t ON t.id = it.tag_id WHERE it.image_id = images.id AND t.name LIKE {tag_ph}))"
        ));
    }

    (filters, params)
}

async fn count_matching(db: &Database, where_sql: &str, params: &[String]) -> Result<i64, DbError> {
    let sql = format!("SELECT COUNT(*) FROM images {where_sql}");
    db.retry(|| async {
        let mut q = sqlx::query_scalar(&sql);
        for p in params {
            q = q.bind(p);
        }
        q.fetch_one(&db.pool).await.map_err(|e| DbError::QueryFailed {
            operation: "search.count",
            sql: sql.clone(),
            source: e,
        })
    })
    .await
}

/// No `text`: plain filtered listing, newest first.
async fn plain_search(
    db: &Database,
    req: &SearchRequest,
    where_sql: &str,
    params: &[String],
) -> Result<SearchResult, SearchError> {
    let total = count_matching(db, where_sql, params).await?;

    let mut bind_params = params.to_vec();
    bind_params.push(req.limit.to_string());
    let limit_ph = CurrentDialect::placeholder(bind_params.len());
    bind_params.push(req.offset.to_string());
    let offset_ph = CurrentDialect::placeholder(bind_params.len());

    let list_sql = format!(
        "SELECT id FROM images {where_sql} ORDER BY created_at DESC LIMIT {limit_ph} OFFSET {offset_ph}"
    );

    let ids: Vec<ImageId> = db
        .retry(|| async {
            let mut q = sqlx::query_scalar(&list_sql);
            for p in &bind_params {
                q = q.bind(p);
            }
            q.fetch_all(&db.pool).await.map_err(|e| DbError::QueryFailed {
                operation: "search.plain.list",
                sql: list_sql.clone(),
                source: e,
            })
        })
        .await?;

    let hits = hydrate(db, ids, None).await?;
    Ok(SearchResult { hits, total: total.max(0) as u64 })
}

/// `text` given but the backend has no vector support: falls back to a
/// tag-equality-only boost, ordering exact tag-name matches first.
async fn tag_boost_search(
    db: &Database,
    req: &SearchRequest,
    text: &str,
    where_sql: &str,
    params: &[String],
) -> Result<SearchResult, SearchError> {
    let total = count_matching(db, where_sql, params).await?;

    let mut bind_params = params.to_vec();
    bind_params.push(text.to_string());
    let text_ph = CurrentDialect::placeholder(bind_params.len());
    bind_params.push(req.limit.to_string());
    let limit_ph = CurrentDialect::placeholder(bind_params.len());
    bind_params.push(req.offset.to_string());
    let offset_ph = CurrentDialect::placeholder(bind_params.len());

    let list_sql = format!(
        "SELECT images.id AS id, CASE WHEN EXISTS (SELECT 1 FROM image_tags it JOIN tags t ON \
         t.id = it.tag_id WHERE it.image_id = images.id AND t.name = {text_ph}) THEN 1 ELSE 0 END \
         AS tag_match FROM images {where_sql} ORDER BY tag_match DESC, images.created_at DESC \
         LIMIT {limit_ph} OFFSET {offset_ph}"
    );

    let rows = db
        .retry(|| async {
            let mut q = sqlx::query(&list_sql);
            for p in &bind_params {
                q = q.bind(p);
            }
            q.fetch_all(&db.pool).await.map_err(|e| DbError::QueryFailed {
                operation: "search.tag_boost.list",
                sql: list_sql.clone(),
                source: e,
            })
        })
        .await?;

    let mut ids = Vec::with_capacity(rows.len());
    let mut scores = HashMap::new();
    for row in &rows {
        let id: ImageId = row.try_get("id").expect("search result always has id");
        let tag_match: i64 = row.try_get("tag_match").unwrap_or(0);
        scores.insert(id, if tag_match == 1 { req.tag_weight } else { 0.0 });
        ids.push(id);
    }

    let hits = hydrate(db, ids, Some(scores)).await?;
    Ok(SearchResult { hits, total: total.max(0) as u64 })
}

/// Vector + tag-equality blended score, postgres-only (`pgvector`).
/// Candidates pass when `vector_score > threshold` (embedding non-null) or
/// the image carries a tag exactly matching `text`.
#[cfg(feature = "postgres")]
async fn hybrid_search(
    db: &Database,
    req: &SearchRequest,
    text: &str,
    where_sql: &str,
    params: &[String],
    query_vector: &[f32],
) -> Result<SearchResult, SearchError> {
    let vector_idx = params.len() + 1;
    let text_idx = vector_idx + 1;
    let threshold_idx = text_idx + 1;
    let vw_idx = threshold_idx + 1;
    let tw_idx = vw_idx + 1;
    let limit_idx = tw_idx + 1;
    let offset_idx = limit_idx + 1;

    let vector_distance = CurrentDialect::vector_distance_expr("images.embedding", vector_idx);
    let text_ph = CurrentDialect::placeholder(text_idx);
    let threshold_ph = CurrentDialect::placeholder(threshold_idx);
    let vw_ph = CurrentDialect::placeholder(vw_idx);
    let tw_ph = CurrentDialect::placeholder(tw_idx);
    let limit_ph = CurrentDialect::placeholder(limit_idx);
    let offset_ph = CurrentDialect::placeholder(offset_idx);

    let sql = format!(
        "WITH scored AS ( \
           SELECT images.id AS id, \
             CASE WHEN images.embedding IS NULL THEN NULL ELSE 1 - ({vector_distance}) END AS vector_score, \
             CASE WHEN EXISTS (SELECT 1 FROM image_tags it JOIN tags t ON t.id = it.tag_id \
               WHERE it.image_id = images.id AND t.name = {text_ph}) THEN 1.0 ELSE 0.0 END AS tag_score \
           FROM images {where_sql} \
         ) \
         SELECT id, (COALESCE(vector_score, 0) * {vw_ph} + tag_score * {tw_ph}) AS final_score, \
           COUNT(*) OVER() AS total_count \
         FROM scored \
         WHERE (vector_score IS NOT NULL AND vector_score > {threshold_ph}) OR tag_score = 1.0 \
         ORDER BY final_score DESC \
         LIMIT {limit_ph} OFFSET {offset_ph}"
    );

    let vector = pgvector::Vector::from(query_vector.to_vec());

    let rows = db
        .retry(|| async {
            let mut q = sqlx::query(&sql);
            for p in params {
                q = q.bind(p);
            }
            q = q
                .bind(&vector)
                .bind(text)
                .bind(req.threshold)
                .bind(req.vector_weight)
                .bind(req.tag_weight)
                .bind(req.limit as i64)
                .bind(req.offset as i64);
            q.fetch_all(&db.pool).await.map_err(|e| DbError::QueryFailed {
                operation: "search.hybrid.list",
                sql: sql.clone(),
                source: e,
            })
        })
        .await?;

    let mut ids = Vec::with_capacity(rows.len());
    let mut scores = HashMap::new();
    let mut total: i64 = 0;
    for row in &rows {
        let id: ImageId = row.try_get("id").expect("hybrid search result always has id");
        let score: f64 = row.try_get("final_score").unwrap_or(0.0);
        total = row.try_get("total_count").unwrap_or(total);
        scores.insert(id, score as f32);
        ids.push(id);
    }

    let hits = hydrate(db, ids, Some(scores)).await?;
    Ok(SearchResult { hits, total: total.max(0) as u64 })
}

/// Batch-hydrates a page of image ids: one query for the image rows, one
/// for their tags, one for their locations — never one query per row.
async fn hydrate(
    db: &Database,
    ids: Vec<ImageId>,
    scores: Option<HashMap<ImageId, f32>>,
) -> Result<Vec<SearchHit>, SearchError> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let images = db.get_images_by_ids(&ids).await?;
    let mut tags_by_image = db.get_tags_for_images(&ids).await?;
    let mut locations_by_image = db.get_locations_by_image_ids(&ids).await?;
    let images_by_id: HashMap<ImageId, Image> = images.into_iter().map(|i| (i.id, i)).collect();

    let mut hits = Vec::with_capacity(ids.len());
    for id in ids {
        let Some(image) = images_by_id.get(&id) else { continue };
        hits.push(SearchHit {
            image: image.clone(),
            tags: tags_by_image.remove(&id).unwrap_or_default(),
            locations: locations_by_image.remove(&id).unwrap_or_default(),
            score: scores.as_ref().and_then(|s| s.get(&id).copied()),
        });
    }
    Ok(hits)
}
