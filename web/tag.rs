//! `/tags` handlers over the three-level hierarchy `imgtag_core::tags`
//! and `db::tags` expose: querying the vocabulary, resolving/creating a
//! level-2 tag, and batch add/replace operations.

use crate::error::AppError;
use crate::AppState;
use axum::extract::{Query, State};
use axum::Json;
use imgtag_core::models::{Tag, TagId, TagSource, UserId};
use imgtag_core::query::{TagQuery, TagQueryExpr, TagQueryKind};
use serde::{Deserialize, Serialize};

#[derive(Serialize)]
pub struct TagResponse {
    pub id: TagId,
    pub name: String,
    pub level: i16,
    pub source: &'static str,
    pub usage_count: i64,
}

impl From<Tag> for TagResponse {
    fn from(t: Tag) -> Self {
        Self {
            id: t.id,
            name: t.name,
            level: t.level.0,
            source: t.source.as_str(),
            usage_count: t.usage_count,
        }
    }
}

#[derive(Deserialize)]
pub struct TagQueryParams {
    /// Substring match over tag names; omit to list every tag.
    pub search: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

pub async fn get_tags(
    State(state): State<AppState>,
    Query(params): Query<TagQueryParams>,
) -> Result<Json<Vec<TagResponse>>, AppError> {
    let kind = match params.search.as_deref().filter(|s| !s.is_empty()) {
        Some(s) => TagQueryKind::Where(TagQueryExpr::Contains(s.to_string())),
        None => TagQueryKind::All,
    };
    let query = TagQuery::new(kind)
        .with_limit(params.limit.unwrap_or(50))
        .with_offset(params.offset.unwrap_or(0));

    let tags = state.db.query_tags(query).await?;
    Ok(Json(tags.into_iter().map(TagResponse::from).collect()))
}

/// Prefix match used for autocomplete-style tag entry, reusing the same
/// `TagQueryExpr` the full listing endpoint does.
pub async fn suggest_tags(
    State(state): State<AppState>,
    Query(params): Query<TagQueryParams>,
) -> Result<Json<Vec<TagResponse>>, AppError> {
    let Some(prefix) = params.search.filter(|s| !s.is_empty()) else {
        return Ok(Json(Vec::new()));
    };
    let query = TagQuery::new(TagQueryKind::Where(TagQueryExpr::Prefix(prefix)))
        .with_limit(params.limit.unwrap_or(10))
        .with_offset(0);

    let tags = state.db.query_tags(query).await?;
    Ok(Json(tags.into_iter().map(TagResponse::from).collect()))
}

#[derive(Deserialize)]
pub struct ResolveTagBody {
    pub name: String,
}

/// Resolves `name` to its existing tag regardless of level, or creates a
/// new level-2 tag — the behavior `tags::resolve` (via `db::resolve_tag`)
/// guarantees for level-0/1 names that already exist.
pub async fn resolve_tag(
    State(state): State<AppState>,
    Json(body): Json<ResolveTagBody>,
) -> Result<Json<TagResponse>, AppError> {
    let tag = state.db.resolve_tag(&body.name, TagSource::User).await?;
    Ok(Json(tag.into()))
}

#[derive(Deserialize)]
pub struct BatchTagBody {
    pub image_ids: Vec<i64>,
    pub names: Vec<String>,
    pub owner_id: Option<UserId>,
}

#[derive(Serialize)]
pub struct BatchAddResponse {
    pub associations_added: u64,
}

pub async fn batch_add_tags(
    State(state): State<AppState>,
    Json(body): Json<BatchTagBody>,
) -> Result<Json<BatchAddResponse>, AppError> {
    let added = imgtag_core::tags::batch_add_tags_to_images(
        &state.db,
        &body.image_ids,
        &body.names,
        TagSource::User,
        body.owner_id,
    )
    .await?;
    Ok(Json(BatchAddResponse { associations_added: added }))
}

pub async fn batch_replace_tags(
    State(state): State<AppState>,
    Json(body): Json<BatchTagBody>,
) -> Result<axum::http::StatusCode, AppError> {
    imgtag_core::tags::batch_replace_tags_for_images(
        &state.db,
        &body.image_ids,
        &body.names,
        TagSource::User,
        body.owner_id,
    )
    .await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

/// Recomputes `tags.usage_count` from `image_tags`, for an operator to
/// run after a bulk import or migration rather than keeping the counter
/// exactly live on every write.
pub async fn refresh_usage_counts(State(state): State<AppState>) -> Result<axum::http::StatusCode, AppError> {
    state.db.refresh_tag_usage_counts().await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}
