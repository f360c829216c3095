//! `/images` and `/files` handlers: upload (bytes or source URL) with
//! endpoint/category/tag selection, hybrid search, single-image fetch,
//! deletion, patch (description/tags/category/visibility), and serving
//! locally-stored bytes back out through a per-endpoint `StorageRegistry`
//! lookup.

use crate::error::AppError;
use crate::AppState;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;
use imgtag_core::ingest::{self, IngestRequest};
use imgtag_core::models::{Image, ImageId, ImageLocation, ImageTagView, TagId, UserId};
use imgtag_core::search::{self, SearchRequest};
use imgtag_core::update::{self, ImagePatch};
use serde::{Deserialize, Serialize};

#[derive(Serialize)]
pub struct ImageResponse {
    pub id: ImageId,
    pub file_hash: String,
    pub file_type: String,
    pub width: i32,
    pub height: i32,
    pub description: String,
    pub is_public: bool,
    pub tags: Vec<ImageTagView>,
    pub locations: Vec<ImageLocation>,
}

impl ImageResponse {
    fn new(image: Image, tags: Vec<ImageTagView>, locations: Vec<ImageLocation>) -> Self {
        Self {
            id: image.id,
            file_hash: image.file_hash,
            file_type: image.file_type,
            width: image.width,
            height: image.height,
            description: image.description,
            is_public: image.is_public,
            tags,
            locations,
        }
    }
}

/// `x-user-id` is the only identity this transport recognizes; a real
/// deployment would sit a session/JWT layer in front of it, which is out
/// of scope here (auth/authz is external to the core).
fn caller_id(headers: &header::HeaderMap) -> Option<UserId> {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

pub async fn post_image(
    State(state): State<AppState>,
    headers: header::HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<ImageResponse>, AppError> {
    let mut bytes: Option<Vec<u8>> = None;
    let mut original_url: Option<String> = None;
    let mut endpoint_id = None;
    let mut category_id = None;
    let mut tags: Vec<String> = Vec::new();
    let mut description = None;
    let mut is_public = true;
    let mut auto_analyze = true;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "file" => {
                bytes = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| AppError::BadRequest(e.to_string()))?
                        .to_vec(),
                );
            }
            "source_url" => {
                original_url = Some(field.text().await.map_err(|e| AppError::BadRequest(e.to_string()))?);
            }
            "endpoint_id" => {
                let v = field.text().await.map_err(|e| AppError::BadRequest(e.to_string()))?;
                endpoint_id = v.parse().ok();
            }
            "category_id" => {
                let v = field.text().await.map_err(|e| AppError::BadRequest(e.to_string()))?;
                category_id = v.parse().ok();
            }
            "tags" => {
                let v = field.text().await.map_err(|e| AppError::BadRequest(e.to_string()))?;
                tags = v.split_whitespace().map(str::to_string).collect();
            }
            "description" => {
                description = Some(field.text().await.map_err(|e| AppError::BadRequest(e.to_string()))?);
            }
            "is_public" => {
                let v = field.text().await.map_err(|e| AppError::BadRequest(e.to_string()))?;
                is_public = v == "true" || v == "1";
            }
            "auto_analyze" => {
                let v = field.text().await.map_err(|e| AppError::BadRequest(e.to_string()))?;
                auto_analyze = v == "true" || v == "1";
            }
            _ => {}
        }
    }

    let bytes = match (bytes, &original_url) {
        (Some(b), _) => b,
        (None, Some(url)) => ingest::fetch_url(&state.http, url).await?,
        (None, None) => return Err(AppError::BadRequest("missing file or source_url".to_string())),
    };

    let req = IngestRequest {
        bytes,
        original_url,
        endpoint_id,
        category_id,
        tags,
        description,
        is_public,
        uploaded_by: caller_id(&headers),
        auto_analyze,
    };

    let outcome = ingest::ingest(&state.db, &state.storage, &state.queue, req).await?;
    let tags = state.db.get_tags_for_image(outcome.image.id).await?;
    let locations = state.db.get_locations_by_image(outcome.image.id).await?;
    Ok(Json(ImageResponse::new(outcome.image, tags, locations)))
}

#[derive(Deserialize, Default)]
pub struct SearchParams {
    pub text: Option<String>,
    pub tags: Option<String>,
    pub keyword: Option<String>,
    pub category_id: Option<TagId>,
    pub resolution_id: Option<TagId>,
    pub user_id: Option<UserId>,
    pub pending_only: Option<bool>,
    pub duplicates_only: Option<bool>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Serialize)]
pub struct SearchResponse {
    pub hits: Vec<ImageResponse>,
    pub total: u64,
}

pub async fn get_images(
    State(state): State<AppState>,
    headers: header::HeaderMap,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, AppError> {
    let req = SearchRequest {
        text: params.text,
        tags: params
            .tags
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        keyword: params.keyword,
        category_id: params.category_id,
        resolution_id: params.resolution_id,
        user_id: params.user_id,
        visible_to_user_id: caller_id(&headers),
        admin_skip_visibility: false,
        pending_only: params.pending_only.unwrap_or(false),
        duplicates_only: params.duplicates_only.unwrap_or(false),
        limit: params.limit.unwrap_or(50),
        offset: params.offset.unwrap_or(0),
        ..SearchRequest::default()
    };

    let result = search::search(&state.db, state.embedding.as_ref(), &req).await?;
    let hits = result
        .hits
        .into_iter()
        .map(|h| ImageResponse::new(h.image, h.tags, h.locations))
        .collect();
    Ok(Json(SearchResponse { hits, total: result.total }))
}

pub async fn get_image(
    State(state): State<AppState>,
    Path(id): Path<ImageId>,
) -> Result<Json<ImageResponse>, AppError> {
    let image = state
        .db
        .get_image(id)
        .await?
        .ok_or_else(|| AppError::Core(imgtag_core::CoreError::not_found(format!("image {id} not found"))))?;
    let tags = state.db.get_tags_for_image(id).await?;
    let locations = state.db.get_locations_by_image(id).await?;
    Ok(Json(ImageResponse::new(image, tags, locations)))
}

pub async fn delete_image(
    State(state): State<AppState>,
    Path(id): Path<ImageId>,
) -> Result<axum::http::StatusCode, AppError> {
    ingest::delete_image(&state.db, &state.storage, id).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

#[derive(Deserialize, Default)]
pub struct UpdateImageBody {
    pub description: Option<String>,
    pub tag_ids: Option<Vec<TagId>>,
    pub category_id: Option<TagId>,
    pub is_public: Option<bool>,
}

#[derive(Serialize)]
pub struct UpdateImageResponse {
    pub rebuild_enqueued: bool,
}

pub async fn put_image(
    State(state): State<AppState>,
    headers: header::HeaderMap,
    Path(id): Path<ImageId>,
    Json(body): Json<UpdateImageBody>,
) -> Result<Json<UpdateImageResponse>, AppError> {
    let patch = ImagePatch {
        description: body.description,
        tag_ids: body.tag_ids,
        category_id: body.category_id,
        is_public: body.is_public,
    };
    let outcome = update::update_image(&state.db, &state.queue, id, patch, caller_id(&headers)).await?;
    Ok(Json(UpdateImageResponse { rebuild_enqueued: outcome.rebuild_enqueued }))
}

#[derive(Deserialize)]
pub struct PutTagsBody {
    pub tag_ids: Vec<TagId>,
}

pub async fn put_tags(
    State(state): State<AppState>,
    headers: header::HeaderMap,
    Path(id): Path<ImageId>,
    Json(body): Json<PutTagsBody>,
) -> Result<Json<UpdateImageResponse>, AppError> {
    let patch = ImagePatch {
        description: None,
        tag_ids: Some(body.tag_ids),
        category_id: None,
        is_public: None,
    };
    let outcome = update::update_image(&state.db, &state.queue, id, patch, caller_id(&headers)).await?;
    Ok(Json(UpdateImageResponse { rebuild_enqueued: outcome.rebuild_enqueued }))
}

/// Serves bytes for the local URL route `/data/{bucket}/{path_prefix?}/{object_key}`
/// that `storage::build_url` emits for `local`-provider endpoints — `bucket`
/// here is `StorageEndpoint::bucket_name`, not an id, so the object key is
/// resolved back to a concrete endpoint by bucket lookup rather than by id.
pub async fn serve_file(
    State(state): State<AppState>,
    Path((bucket, object_key)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let endpoint = state
        .db
        .get_local_endpoint_by_bucket(&bucket)
        .await?
        .ok_or_else(|| AppError::Core(imgtag_core::CoreError::not_found(format!("no local endpoint serves bucket {bucket}"))))?;

    // `object_key` as received already includes `path_prefix` (it's the
    // literal remainder of the URL path built by `build_url`), so it's
    // downloaded directly through the endpoint's `ObjectStore` rather than
    // through `StorageRegistry::download`, which would prepend the prefix
    // a second time.
    let store = state.storage.open(&endpoint);
    let bytes = store.download(&object_key).await?;
    Ok(bytes)
}
